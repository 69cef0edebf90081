//! Dispatcher: the single writer that owns the world.
//!
//! Operations build a [Txn] against the world and hand it to
//! [Dispatcher::commit], which persists and applies it and then runs the
//! maintenance schedule. Offer deadlines are drained here too, one event per
//! transaction, both from the periodic sweep and at the start of every
//! operation.

use bevy_ecs::prelude::{Schedule, World};
use chrono::{DateTime, Utc};
use tracing::{debug, error};

use crate::clock::DeadlineQueue;
use crate::config::{ConfigError, DispatchConfig};
use crate::ecs::EntityIndex;
use crate::error::{DispatchError, DispatchResult};
use crate::geo::{GeoIndex, SpatialIndex};
use crate::lifecycle;
use crate::matching::{build_matching_algorithm, MatchingAlgorithmResource};
use crate::notify::Notifier;
use crate::store::DispatchStore;
use crate::systems::spatial_index::update_spatial_index_system;
use crate::txn::Txn;

pub fn maintenance_schedule() -> Schedule {
    let mut schedule = Schedule::default();
    schedule.add_systems(update_spatial_index_system);
    schedule
}

/// World with every resource the dispatcher reads, configured from `config`.
pub fn build_world(config: &DispatchConfig) -> DispatchResult<World> {
    let mut world = World::new();
    world.insert_resource(GeoIndex::from_level(config.matching.resolution)?);
    world.insert_resource(SpatialIndex::new());
    world.insert_resource(EntityIndex::default());
    world.insert_resource(DeadlineQueue::default());
    world.insert_resource(config.pricing);
    let invalid = |error: ConfigError| DispatchError::validation(error.to_string());
    world.insert_resource(config.offer_window().map_err(invalid)?);
    world.insert_resource(config.position_policy().map_err(invalid)?);
    world.insert_resource(MatchingAlgorithmResource::new(build_matching_algorithm(
        &config.matching,
    )?));
    Ok(world)
}

pub struct Dispatcher {
    world: World,
    schedule: Schedule,
}

impl Dispatcher {
    pub fn new(world: World) -> Self {
        Self {
            world,
            schedule: maintenance_schedule(),
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    /// Apply records straight to the world without persisting them (hydration).
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn run_maintenance(&mut self) {
        self.schedule.run(&mut self.world);
        self.world.clear_trackers();
    }

    pub fn commit(
        &mut self,
        txn: Txn,
        store: &dyn DispatchStore,
        notifier: &dyn Notifier,
    ) -> DispatchResult<()> {
        if txn.is_empty() {
            return Ok(());
        }
        txn.commit(&mut self.world, store, notifier)?;
        self.run_maintenance();
        Ok(())
    }

    /// Fire every offer deadline due at `now`. Returns how many offers expired.
    ///
    /// A deadline whose commit fails goes back on the queue and the drain
    /// stops; the next drain retries it.
    pub fn drain_due_offers(
        &mut self,
        now: DateTime<Utc>,
        store: &dyn DispatchStore,
        notifier: &dyn Notifier,
    ) -> usize {
        let due = self.world.resource_mut::<DeadlineQueue>().pop_due(now);
        let mut expired = 0;
        let mut pending = due.into_iter();

        while let Some(event) = pending.next() {
            let mut txn = Txn::new(now);
            let result = lifecycle::expire_offer(&self.world, &mut txn, &event)
                .and_then(|outcome| self.commit(txn, store, notifier).map(|()| outcome));
            match result {
                Ok(Some(_)) => expired += 1,
                Ok(None) => {}
                Err(error) => {
                    error!(
                        request_id = %event.request_id,
                        %error,
                        "offer expiry failed, will retry"
                    );
                    let mut queue = self.world.resource_mut::<DeadlineQueue>();
                    queue.schedule(event);
                    for event in pending.by_ref() {
                        queue.schedule(event);
                    }
                    break;
                }
            }
        }
        if expired > 0 {
            debug!(expired, "offer deadlines drained");
        }
        expired
    }
}
