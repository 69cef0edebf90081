//! Public dispatch engine.
//!
//! [DispatchEngine] is shared between callers (`Arc<DispatchEngine>`). All
//! state sits behind one lock, so "list eligible, pick best, assign" runs as a
//! unit with respect to every other operation. Each operation:
//!
//! 1. takes the lock and reads the clock,
//! 2. fires offer deadlines that are already due,
//! 3. checks the caller and stages its changes,
//! 4. persists the changed records, then applies them in memory.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bevy_ecs::prelude::World;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::{Clock, DeadlineQueue, Event, SystemClock};
use crate::config::DispatchConfig;
use crate::error::{DispatchError, DispatchResult};
use crate::geo::GeoPoint;
use crate::identity::Caller;
use crate::lifecycle::{self, OfferOutcome};
use crate::matching::{EligibleDriver, MatchCandidate, MatchingAlgorithmResource};
use crate::model::{
    AccountId, ApprovalState, DriverId, Fix, OnlineState, Place, RequestId, VehicleCategory,
};
use crate::notify::{NoopNotifier, Notifier};
use crate::registry::{self, NewDriver, RegistryView};
use crate::request::{DeliveryDetails, NewRequest};
use crate::runner::{build_world, Dispatcher};
use crate::store::{DispatchStore, DriverRecord, InMemoryStore, RequestRecord};
use crate::txn::Txn;

/// What a driver sees about themselves.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriverStatus {
    pub driver: DriverRecord,
    /// Offers the driver can still answer; never past their deadline.
    pub offers: Vec<RequestRecord>,
}

pub struct DispatchEngineBuilder {
    config: DispatchConfig,
    clock: Arc<dyn Clock>,
    store: Arc<dyn DispatchStore>,
    notifier: Arc<dyn Notifier>,
}

impl DispatchEngineBuilder {
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            store: Arc::new(InMemoryStore::new()),
            notifier: Arc::new(NoopNotifier),
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(mut self, store: Arc<dyn DispatchStore>) -> Self {
        self.store = store;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Build the engine and load whatever the store already holds.
    ///
    /// Outstanding offers go back on the deadline queue; ones that lapsed
    /// while the engine was down expire on the first operation or sweep.
    pub fn build(self) -> DispatchResult<DispatchEngine> {
        self.config
            .validate()
            .map_err(|error| DispatchError::validation(error.to_string()))?;
        let mut dispatcher = Dispatcher::new(build_world(&self.config)?);

        let drivers = self.store.load_drivers()?;
        let requests = self.store.load_requests()?;
        let by_id: HashMap<RequestId, &RequestRecord> =
            requests.iter().map(|record| (record.id, record)).collect();
        let world = dispatcher.world_mut();
        let mut repaired = 0;
        for record in &drivers {
            match reconcile_driver(record, &by_id) {
                Some(fixed) => {
                    warn!(
                        driver_id = %record.id,
                        request_id = ?record.current_request,
                        online = %record.online,
                        "driver held a request that does not hold the driver, released"
                    );
                    registry::apply_driver(world, &fixed);
                    repaired += 1;
                }
                None => registry::apply_driver(world, record),
            }
        }
        let mut rearmed = 0;
        for record in &requests {
            lifecycle::apply_request(world, record);
            if let Some(offer) = record.offer() {
                world
                    .resource_mut::<DeadlineQueue>()
                    .schedule(Event::offer_expired(offer.deadline, record.id, offer.driver_id));
                rearmed += 1;
            }
        }
        dispatcher.run_maintenance();
        info!(
            drivers = drivers.len(),
            requests = requests.len(),
            offers = rearmed,
            repaired,
            algorithm = ?self.config.matching.algorithm,
            offer_window_secs = self.config.offer_window_secs,
            "dispatch engine ready"
        );

        Ok(DispatchEngine {
            dispatcher: Mutex::new(dispatcher),
            clock: self.clock,
            store: self.store,
            notifier: self.notifier,
        })
    }
}

/// A loaded driver whose hold disagrees with the requests, corrected.
///
/// A driver may only reference a request that offers to it or is assigned to
/// it, and is `in_ride` exactly while assigned. Returns `None` when `record`
/// is already consistent.
fn reconcile_driver(
    record: &DriverRecord,
    requests: &HashMap<RequestId, &RequestRecord>,
) -> Option<DriverRecord> {
    let held = record
        .current_request
        .and_then(|id| requests.get(&id))
        .filter(|request| {
            request.offered_driver_id() == Some(record.id)
                || request.assigned_driver_id() == Some(record.id)
        });
    let assigned = held.is_some_and(|request| request.assigned_driver_id() == Some(record.id));

    let mut fixed = record.clone();
    fixed.current_request = held.map(|request| request.id);
    fixed.online = match (record.online, assigned) {
        (_, true) => OnlineState::InRide,
        (OnlineState::InRide, false) => OnlineState::Online,
        (online, false) => online,
    };
    (fixed != *record).then_some(fixed)
}

pub struct DispatchEngine {
    dispatcher: Mutex<Dispatcher>,
    clock: Arc<dyn Clock>,
    store: Arc<dyn DispatchStore>,
    notifier: Arc<dyn Notifier>,
}

impl std::fmt::Debug for DispatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchEngine").finish_non_exhaustive()
    }
}

impl DispatchEngine {
    pub fn builder(config: DispatchConfig) -> DispatchEngineBuilder {
        DispatchEngineBuilder::new(config)
    }

    /// Lock, read the clock and fire due deadlines.
    fn lock(&self) -> (MutexGuard<'_, Dispatcher>, DateTime<Utc>) {
        let mut dispatcher = self.dispatcher.lock().unwrap_or_else(PoisonError::into_inner);
        let now = self.clock.now();
        dispatcher.drain_due_offers(now, self.store.as_ref(), self.notifier.as_ref());
        (dispatcher, now)
    }

    /// Run a mutating operation and commit what it staged.
    fn execute<T>(
        &self,
        op: impl FnOnce(&World, &mut Txn) -> DispatchResult<T>,
    ) -> DispatchResult<T> {
        let (mut dispatcher, now) = self.lock();
        let mut txn = Txn::new(now);
        let value = op(dispatcher.world(), &mut txn)?;
        dispatcher.commit(txn, self.store.as_ref(), self.notifier.as_ref())?;
        Ok(value)
    }

    fn read<T>(
        &self,
        op: impl FnOnce(&World, DateTime<Utc>) -> DispatchResult<T>,
    ) -> DispatchResult<T> {
        let (dispatcher, now) = self.lock();
        op(dispatcher.world(), now)
    }

    // ---- drivers ----------------------------------------------------------

    /// Create a driver profile: `pending` approval, `offline`, no position.
    /// Admins may register any account; anyone else only their own.
    pub fn register_driver(&self, caller: &Caller, new: NewDriver) -> DispatchResult<DriverRecord> {
        if !caller.is_admin() && caller.account_id != new.account_id {
            return Err(DispatchError::forbidden("cannot register a driver for another account"));
        }
        self.execute(|world, txn| registry::register_driver(world, txn, new))
    }

    pub fn set_approval(
        &self,
        caller: &Caller,
        driver_id: DriverId,
        state: ApprovalState,
        reason: Option<String>,
    ) -> DispatchResult<DriverRecord> {
        caller.require_admin()?;
        self.execute(|world, txn| registry::set_approval(world, txn, driver_id, state, reason))
    }

    pub fn approve_driver(
        &self,
        caller: &Caller,
        driver_id: DriverId,
    ) -> DispatchResult<DriverRecord> {
        self.set_approval(caller, driver_id, ApprovalState::Approved, None)
    }

    pub fn reject_driver(
        &self,
        caller: &Caller,
        driver_id: DriverId,
        reason: impl Into<String>,
    ) -> DispatchResult<DriverRecord> {
        self.set_approval(caller, driver_id, ApprovalState::Rejected, Some(reason.into()))
    }

    pub fn delete_driver(&self, caller: &Caller, driver_id: DriverId) -> DispatchResult<()> {
        caller.require_admin()?;
        self.execute(|world, txn| registry::delete_driver(world, txn, driver_id))
    }

    /// Drivers in `approval` state (all drivers for `None`), ordered by id.
    pub fn list_drivers(
        &self,
        caller: &Caller,
        approval: Option<ApprovalState>,
    ) -> DispatchResult<Vec<DriverRecord>> {
        caller.require_admin()?;
        self.read(|world, _| Ok(registry::drivers_by_approval(world, approval)))
    }

    pub fn driver(&self, caller: &Caller, driver_id: DriverId) -> DispatchResult<DriverRecord> {
        self.read(|world, _| {
            let record = registry::load_driver(world, driver_id)
                .ok_or_else(|| DispatchError::driver_not_found(driver_id))?;
            if caller.is_admin() || caller.account_id == record.account_id {
                Ok(record)
            } else {
                Err(DispatchError::forbidden("not this driver's account"))
            }
        })
    }

    /// The caller's own status report, optionally with a position.
    pub fn set_online_state(
        &self,
        caller: &Caller,
        state: OnlineState,
        point: Option<GeoPoint>,
    ) -> DispatchResult<DriverRecord> {
        self.execute(|world, txn| {
            let driver_id = registry::driver_for_account(world, caller.account_id)?;
            registry::set_online_state(world, txn, driver_id, state, point)
        })
    }

    /// The caller's own position report. `at` defaults to now.
    pub fn report_position(
        &self,
        caller: &Caller,
        point: GeoPoint,
        at: Option<DateTime<Utc>>,
    ) -> DispatchResult<DriverRecord> {
        self.execute(|world, txn| {
            let driver_id = registry::driver_for_account(world, caller.account_id)?;
            let fix = Fix {
                point,
                at: at.unwrap_or(txn.now()),
            };
            registry::report_position(world, txn, driver_id, fix)
        })
    }

    pub fn driver_status(&self, caller: &Caller) -> DispatchResult<DriverStatus> {
        self.read(|world, now| {
            let driver_id = registry::driver_for_account(world, caller.account_id)?;
            let driver = registry::load_driver(world, driver_id)
                .ok_or_else(|| DispatchError::driver_not_found(driver_id))?;
            let offers = visible_offers(world, &driver, now);
            Ok(DriverStatus { driver, offers })
        })
    }

    /// Offers the calling driver can still answer.
    pub fn pending_offers(&self, caller: &Caller) -> DispatchResult<Vec<RequestRecord>> {
        self.driver_status(caller).map(|status| status.offers)
    }

    pub fn list_eligible(&self, category: VehicleCategory) -> DispatchResult<Vec<EligibleDriver>> {
        self.read(|world, now| Ok(registry::list_eligible(world, category, now)))
    }

    /// Ask the configured matching strategy for the best driver without
    /// offering anything.
    pub fn select_best_driver(
        &self,
        origin: GeoPoint,
        category: VehicleCategory,
        excluded: &BTreeSet<DriverId>,
    ) -> DispatchResult<Option<MatchCandidate>> {
        self.read(|world, now| {
            let algorithm = world.resource::<MatchingAlgorithmResource>();
            let mut view = RegistryView::new(world, now);
            Ok(algorithm.select_best_driver(&mut view, origin, category, excluded))
        })
    }

    // ---- requests ---------------------------------------------------------

    /// Open a request and offer it to the nearest eligible driver.
    ///
    /// With nobody eligible the request is stored as cancelled and
    /// [DispatchError::NoDriversAvailable] is returned.
    pub fn create_request(
        &self,
        caller: &Caller,
        new: NewRequest,
    ) -> DispatchResult<RequestRecord> {
        let requester = caller.account_id;
        let (record, outcome) = self.execute(|world, txn| {
            let (request_id, outcome) = lifecycle::open_request(world, txn, requester, new)?;
            Ok((txn.request(world, request_id)?.clone(), outcome))
        })?;
        match outcome {
            OfferOutcome::Offered { .. } => Ok(record),
            OfferOutcome::Cancelled => {
                warn!(
                    request_id = %record.id,
                    "request cancelled at creation, no drivers available"
                );
                Err(DispatchError::NoDriversAvailable { request_id: record.id })
            }
        }
    }

    pub fn request_ride(
        &self,
        caller: &Caller,
        pickup: Place,
        destination: Place,
    ) -> DispatchResult<RequestRecord> {
        self.create_request(caller, NewRequest::ride(pickup, destination))
    }

    pub fn request_delivery(
        &self,
        caller: &Caller,
        pickup: Place,
        destination: Place,
        details: DeliveryDetails,
    ) -> DispatchResult<RequestRecord> {
        self.create_request(caller, NewRequest::delivery(pickup, destination, details))
    }

    pub fn accept_offer(
        &self,
        caller: &Caller,
        request_id: RequestId,
    ) -> DispatchResult<RequestRecord> {
        self.driver_transition(caller, request_id, lifecycle::accept_offer)
    }

    /// Decline the offer; the request moves on to the next nearest driver or
    /// is cancelled.
    pub fn reject_offer(
        &self,
        caller: &Caller,
        request_id: RequestId,
    ) -> DispatchResult<OfferOutcome> {
        self.execute(|world, txn| {
            let driver_id = registry::driver_for_account(world, caller.account_id)?;
            lifecycle::reject_offer(world, txn, request_id, driver_id)
        })
    }

    pub fn start_trip(
        &self,
        caller: &Caller,
        request_id: RequestId,
    ) -> DispatchResult<RequestRecord> {
        self.driver_transition(caller, request_id, lifecycle::start_trip)
    }

    pub fn complete_trip(
        &self,
        caller: &Caller,
        request_id: RequestId,
    ) -> DispatchResult<RequestRecord> {
        self.driver_transition(caller, request_id, lifecycle::complete_trip)
    }

    fn driver_transition(
        &self,
        caller: &Caller,
        request_id: RequestId,
        transition: fn(&World, &mut Txn, RequestId, DriverId) -> DispatchResult<()>,
    ) -> DispatchResult<RequestRecord> {
        self.execute(|world, txn| {
            let driver_id = registry::driver_for_account(world, caller.account_id)?;
            transition(world, txn, request_id, driver_id)?;
            Ok(txn.request(world, request_id)?.clone())
        })
    }

    /// A single request, for its requester, its driver or an admin.
    pub fn request_status(
        &self,
        caller: &Caller,
        request_id: RequestId,
    ) -> DispatchResult<RequestRecord> {
        self.read(|world, _| {
            let record = lifecycle::load_request(world, request_id)
                .ok_or_else(|| DispatchError::request_not_found(request_id))?;
            if caller.is_admin() || record.requester == caller.account_id {
                return Ok(record);
            }
            let as_driver = registry::driver_for_account(world, caller.account_id).ok();
            let involved = record.assigned_driver_id().or(record.offered_driver_id());
            if as_driver.is_some() && as_driver == involved {
                Ok(record)
            } else {
                Err(DispatchError::forbidden("not a party to this request"))
            }
        })
    }

    /// The caller's own requests, oldest first.
    pub fn list_my_requests(&self, caller: &Caller) -> DispatchResult<Vec<RequestRecord>> {
        let requester: AccountId = caller.account_id;
        self.read(|world, _| {
            Ok(lifecycle::requests_where(world, |record| {
                record.requester == requester
            }))
        })
    }

    // ---- timers -----------------------------------------------------------

    /// Fire every due offer deadline. Called by the periodic sweeper.
    pub fn expire_due_offers(&self) -> usize {
        let mut dispatcher = self.dispatcher.lock().unwrap_or_else(PoisonError::into_inner);
        let now = self.clock.now();
        dispatcher.drain_due_offers(now, self.store.as_ref(), self.notifier.as_ref())
    }

    /// Earliest pending offer deadline, if any.
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        let dispatcher = self.dispatcher.lock().unwrap_or_else(PoisonError::into_inner);
        dispatcher.world().resource::<DeadlineQueue>().next_due()
    }
}

fn visible_offers(world: &World, driver: &DriverRecord, now: DateTime<Utc>) -> Vec<RequestRecord> {
    let Some(request_id) = driver.current_request else {
        return Vec::new();
    };
    let offers: Vec<RequestRecord> = lifecycle::load_request(world, request_id)
        .filter(|record| {
            record
                .offer()
                .is_some_and(|offer| offer.driver_id == driver.id && offer.is_open_at(now))
        })
        .into_iter()
        .collect();
    debug!(driver_id = %driver.id, visible = offers.len(), "driver polled offers");
    offers
}
