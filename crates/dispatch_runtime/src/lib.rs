//! Process host for the dispatch engine: settings, logging, the store, and
//! the offer-expiry sweeper.

pub mod settings;
pub mod snapshot_store;
pub mod sweeper;
pub mod telemetry;

use std::sync::Arc;

use anyhow::{Context, Result};
use dispatch_core::notify::LogNotifier;
use dispatch_core::store::{DispatchStore, InMemoryStore};
use dispatch_core::DispatchEngine;

pub use settings::NodeSettings;
pub use snapshot_store::SnapshotStore;
pub use sweeper::spawn_offer_sweeper;

/// Build the engine the node serves: system clock, logging notifier, and the
/// snapshot store when one is configured.
pub fn build_engine(settings: &NodeSettings) -> Result<Arc<DispatchEngine>> {
    let store: Arc<dyn DispatchStore> = match &settings.snapshot_path {
        Some(path) => Arc::new(
            SnapshotStore::open(path)
                .with_context(|| format!("opening snapshot {}", path.display()))?,
        ),
        None => Arc::new(InMemoryStore::new()),
    };
    let engine = DispatchEngine::builder(settings.config)
        .store(store)
        .notifier(Arc::new(LogNotifier))
        .build()
        .context("building dispatch engine")?;
    Ok(Arc::new(engine))
}
