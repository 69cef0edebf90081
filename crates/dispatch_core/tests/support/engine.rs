use std::sync::Arc;

use dispatch_core::config::{DispatchConfig, MatchingAlgorithmType};
use dispatch_core::engine::DispatchEngine;
use dispatch_core::error::DispatchResult;
use dispatch_core::geo::GeoPoint;
use dispatch_core::identity::Caller;
use dispatch_core::model::{AccountId, Place};
use dispatch_core::store::RequestRecord;
use dispatch_core::test_helpers::{FlakyStore, ManualClock, RecordingNotifier};

use super::drivers::{DriverBuilder, TestDriver};

/// Builder for engines wired to a manual clock, a recording notifier and a
/// store that can be made to fail.
#[derive(Debug, Clone, Default)]
pub struct TestEngineBuilder {
    config: DispatchConfig,
    store: Option<Arc<FlakyStore>>,
}

impl TestEngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_offer_window_secs(mut self, secs: u64) -> Self {
        self.config.offer_window_secs = secs;
        self
    }

    pub fn with_algorithm(mut self, algorithm: MatchingAlgorithmType) -> Self {
        self.config.matching.algorithm = algorithm;
        self
    }

    pub fn with_max_position_age_secs(mut self, secs: u64) -> Self {
        self.config.positions.max_age_secs = Some(secs);
        self
    }

    /// Reuse a store, e.g. to rebuild an engine over persisted records.
    pub fn with_store(mut self, store: Arc<FlakyStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> TestEngine {
        self.build_with_clock(Arc::new(ManualClock::at_epoch()))
    }

    pub fn build_with_clock(self, clock: Arc<ManualClock>) -> TestEngine {
        let store = self.store.unwrap_or_else(|| Arc::new(FlakyStore::new()));
        let notifier = Arc::new(RecordingNotifier::new());
        let engine = DispatchEngine::builder(self.config)
            .clock(clock.clone())
            .store(store.clone())
            .notifier(notifier.clone())
            .build()
            .expect("engine builds");
        TestEngine {
            engine: Arc::new(engine),
            clock,
            store,
            notifier,
            admin: Caller::admin(AccountId::from_u128(0xAD)),
        }
    }
}

pub struct TestEngine {
    pub engine: Arc<DispatchEngine>,
    pub clock: Arc<ManualClock>,
    pub store: Arc<FlakyStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub admin: Caller,
}

impl TestEngine {
    pub fn new() -> Self {
        TestEngineBuilder::new().build()
    }

    pub fn add_driver(&self, builder: DriverBuilder) -> TestDriver {
        builder.register(self)
    }

    /// Rider account `n`; accounts below 1000 are riders.
    pub fn rider(&self, n: u128) -> Caller {
        Caller::rider(AccountId::from_u128(n))
    }

    pub fn ride(
        &self,
        rider: &Caller,
        pickup: GeoPoint,
        destination: GeoPoint,
    ) -> DispatchResult<RequestRecord> {
        self.engine.request_ride(
            rider,
            Place::new(pickup, "pickup"),
            Place::new(destination, "destination"),
        )
    }
}
