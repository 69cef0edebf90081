//! Dispatch configuration.
//!
//! All fields have defaults, so an empty TOML document is a valid config:
//!
//! ```toml
//! offer_window_secs = 30
//! sweep_interval_ms = 1000
//!
//! [pricing.ride]
//! base_fare = 10000.0
//! per_km_rate = 5000.0
//!
//! [matching]
//! algorithm = "cell_search"
//! resolution = 9
//! max_rings = 16
//!
//! [positions]
//! max_age_secs = 300
//! ```

use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ecs::{OfferWindow, PositionPolicy};
use crate::pricing::{FarePolicy, PricingConfig};

/// Default offer window: 30 seconds.
const DEFAULT_OFFER_WINDOW_SECS: u64 = 30;

/// Default sweep interval for the expiry timer.
const DEFAULT_SWEEP_INTERVAL_MS: u64 = 1_000;

/// Longest accepted offer window: one day.
const MAX_OFFER_WINDOW_SECS: u64 = 86_400;

/// Longest accepted position age: one week.
const MAX_POSITION_AGE_SECS: u64 = 604_800;

const DEFAULT_RESOLUTION: u8 = 9;
const DEFAULT_MAX_RINGS: u32 = 16;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Type of matching algorithm to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchingAlgorithmType {
    /// Exhaustive scan over eligible drivers.
    #[default]
    Nearest,
    /// H3 ring search with exhaustive fallback.
    CellSearch,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MatchingConfig {
    pub algorithm: MatchingAlgorithmType,
    /// H3 resolution of the driver spatial index (0-15).
    pub resolution: u8,
    /// Rings searched before falling back to a full scan.
    pub max_rings: u32,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            algorithm: MatchingAlgorithmType::default(),
            resolution: DEFAULT_RESOLUTION,
            max_rings: DEFAULT_MAX_RINGS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PositionConfig {
    /// Fixes older than this make a driver ineligible. Unset: never stale.
    pub max_age_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatchConfig {
    /// Seconds a driver has to answer an offer.
    pub offer_window_secs: u64,
    /// Interval between expiry sweeps in the runtime.
    pub sweep_interval_ms: u64,
    pub pricing: PricingConfig,
    pub matching: MatchingConfig,
    pub positions: PositionConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            offer_window_secs: DEFAULT_OFFER_WINDOW_SECS,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            pricing: PricingConfig::default(),
            matching: MatchingConfig::default(),
            positions: PositionConfig::default(),
        }
    }
}

fn check_policy(name: &str, policy: &FarePolicy) -> Result<(), ConfigError> {
    let valid = |v: f64| v.is_finite() && v >= 0.0;
    if !valid(policy.base_fare) || !valid(policy.per_km_rate) {
        return Err(ConfigError::Invalid(format!(
            "pricing.{name} rates must be finite and non-negative"
        )));
    }
    Ok(())
}

fn seconds(name: &str, secs: u64) -> Result<Duration, ConfigError> {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| ConfigError::Invalid(format!("{name} = {secs} is out of range")))
}

impl DispatchConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.offer_window_secs == 0 || self.offer_window_secs > MAX_OFFER_WINDOW_SECS {
            return Err(ConfigError::Invalid(format!(
                "offer_window_secs must be within 1-{MAX_OFFER_WINDOW_SECS}"
            )));
        }
        if self
            .positions
            .max_age_secs
            .is_some_and(|secs| secs > MAX_POSITION_AGE_SECS)
        {
            return Err(ConfigError::Invalid(format!(
                "positions.max_age_secs must be at most {MAX_POSITION_AGE_SECS}"
            )));
        }
        if self.sweep_interval_ms == 0 {
            return Err(ConfigError::Invalid("sweep_interval_ms must be > 0".into()));
        }
        if self.matching.resolution > 15 {
            return Err(ConfigError::Invalid(format!(
                "matching.resolution {} outside 0-15",
                self.matching.resolution
            )));
        }
        check_policy("ride", &self.pricing.ride)?;
        check_policy("delivery", &self.pricing.delivery)?;
        Ok(())
    }

    pub fn offer_window(&self) -> Result<OfferWindow, ConfigError> {
        seconds("offer_window_secs", self.offer_window_secs).map(OfferWindow)
    }

    pub fn position_policy(&self) -> Result<PositionPolicy, ConfigError> {
        let max_age = self
            .positions
            .max_age_secs
            .map(|secs| seconds("positions.max_age_secs", secs))
            .transpose()?;
        Ok(PositionPolicy { max_age })
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.sweep_interval_ms)
    }
}
