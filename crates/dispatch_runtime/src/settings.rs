//! Node settings: a TOML [DispatchConfig] plus environment overrides.
//!
//! | variable                     | effect                                   |
//! |------------------------------|------------------------------------------|
//! | `DISPATCH_CONFIG`            | path of the TOML config file             |
//! | `DISPATCH_OFFER_WINDOW_SECS` | overrides `offer_window_secs`            |
//! | `DISPATCH_SWEEP_INTERVAL_MS` | overrides `sweep_interval_ms`            |
//! | `DISPATCH_SNAPSHOT`          | JSON file the store is kept in           |

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use dispatch_core::DispatchConfig;

pub const CONFIG_VAR: &str = "DISPATCH_CONFIG";
pub const OFFER_WINDOW_VAR: &str = "DISPATCH_OFFER_WINDOW_SECS";
pub const SWEEP_INTERVAL_VAR: &str = "DISPATCH_SWEEP_INTERVAL_MS";
pub const SNAPSHOT_VAR: &str = "DISPATCH_SNAPSHOT";

#[derive(Debug, Clone, PartialEq)]
pub struct NodeSettings {
    pub config: DispatchConfig,
    /// Without a snapshot file the node keeps everything in memory.
    pub snapshot_path: Option<PathBuf>,
}

impl NodeSettings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve settings through `lookup` instead of the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = match lookup(CONFIG_VAR) {
            Some(path) => DispatchConfig::from_file(&path)
                .with_context(|| format!("loading {CONFIG_VAR}={path}"))?,
            None => DispatchConfig::default(),
        };
        if let Some(secs) = parse_var(&lookup, OFFER_WINDOW_VAR)? {
            config.offer_window_secs = secs;
        }
        if let Some(ms) = parse_var(&lookup, SWEEP_INTERVAL_VAR)? {
            config.sweep_interval_ms = ms;
        }
        config
            .validate()
            .context("configuration after environment overrides")?;

        Ok(Self {
            config,
            snapshot_path: lookup(SNAPSHOT_VAR).map(PathBuf::from),
        })
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("{name}={raw} is not a valid number"))
        })
        .transpose()
}
