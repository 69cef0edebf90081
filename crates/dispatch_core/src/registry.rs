//! Driver registry: the queryable view of drivers' approval, online state and
//! last known position.
//!
//! Drivers are entities; [DriverRecord] is their persisted shape. This module
//! converts between the two, answers eligibility queries for matching, and
//! holds the driver-side transitions (status reports, approval, deletion).

use bevy_ecs::prelude::{Entity, World};
use chrono::{DateTime, Utc};
use h3o::CellIndex;
use tracing::{debug, info, warn};

use crate::ecs::{
    write_component, write_optional, Approval, Availability, CurrentRequest, Driver, EntityIndex,
    GridCell, LastFix, PositionPolicy,
};
use crate::error::{DispatchError, DispatchResult};
use crate::geo::{GeoIndex, GeoPoint, SpatialIndex};
use crate::lifecycle;
use crate::matching::{CandidateSource, EligibleDriver};
use crate::model::{
    AccountId, ApprovalState, DriverId, Fix, OnlineState, VehicleCategory, VehicleType,
};
use crate::request::ReleaseReason;
use crate::store::DriverRecord;
use crate::txn::{Staged, Txn};

/// Registration input supplied by the account collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewDriver {
    pub id: DriverId,
    pub account_id: AccountId,
    pub category: VehicleCategory,
    pub vehicle: VehicleType,
}

impl NewDriver {
    pub fn new(account_id: AccountId, category: VehicleCategory, vehicle: VehicleType) -> Self {
        Self {
            id: DriverId::new(),
            account_id,
            category,
            vehicle,
        }
    }

    pub fn with_id(mut self, id: DriverId) -> Self {
        self.id = id;
        self
    }
}

/// approved ∧ online ∧ not reserved ∧ fresh position.
fn eligible_fix(
    approval: ApprovalState,
    online: OnlineState,
    reserved: bool,
    fix: Option<Fix>,
    policy: &PositionPolicy,
    now: DateTime<Utc>,
) -> Option<Fix> {
    if approval != ApprovalState::Approved || online != OnlineState::Online || reserved {
        return None;
    }
    fix.filter(|fix| policy.is_fresh(fix, now))
}

impl DriverRecord {
    /// Position to match against, when the driver can take a new offer now.
    pub fn eligible_position(
        &self,
        policy: &PositionPolicy,
        now: DateTime<Utc>,
    ) -> Option<GeoPoint> {
        eligible_fix(
            self.approval,
            self.online,
            self.current_request.is_some(),
            self.last_fix,
            policy,
            now,
        )
        .map(|fix| fix.point)
    }
}

/// Read a driver entity back into its record.
pub fn load_driver(world: &World, id: DriverId) -> Option<DriverRecord> {
    let entity = world.resource::<EntityIndex>().driver(id)?;
    driver_record(world, entity)
}

fn driver_record(world: &World, entity: Entity) -> Option<DriverRecord> {
    let driver = world.get::<Driver>(entity)?;
    let approval = world.get::<Approval>(entity)?;
    Some(DriverRecord {
        id: driver.id,
        account_id: driver.account_id,
        category: driver.category,
        vehicle: driver.vehicle,
        approval: approval.state,
        rejection_reason: approval.reason.clone(),
        online: world.get::<Availability>(entity)?.0,
        last_fix: world.get::<LastFix>(entity).map(|fix| fix.0),
        current_request: world.get::<CurrentRequest>(entity)?.0,
    })
}

/// Every driver record, ordered by id.
pub fn all_drivers(world: &World) -> Vec<DriverRecord> {
    let mut drivers: Vec<DriverRecord> = world
        .resource::<EntityIndex>()
        .drivers
        .values()
        .filter_map(|entity| driver_record(world, *entity))
        .collect();
    drivers.sort_by_key(|driver| driver.id);
    drivers
}

/// Write a record onto its entity, spawning it on first sight.
pub fn apply_driver(world: &mut World, record: &DriverRecord) {
    let cell: Option<CellIndex> = record
        .last_fix
        .and_then(|fix| fix.point.cell(world.resource::<GeoIndex>().resolution()));

    let entity = match world.resource::<EntityIndex>().driver(record.id) {
        Some(entity) => entity,
        None => {
            let entity = world.spawn_empty().id();
            let mut index = world.resource_mut::<EntityIndex>();
            index.drivers.insert(record.id, entity);
            index.driver_accounts.insert(record.account_id, record.id);
            entity
        }
    };

    write_component(
        world,
        entity,
        Driver {
            id: record.id,
            account_id: record.account_id,
            category: record.category,
            vehicle: record.vehicle,
        },
    );
    write_component(
        world,
        entity,
        Approval {
            state: record.approval,
            reason: record.rejection_reason.clone(),
        },
    );
    write_component(world, entity, Availability(record.online));
    write_component(world, entity, CurrentRequest(record.current_request));
    write_optional(world, entity, record.last_fix.map(LastFix));
    write_optional(world, entity, cell.map(GridCell));
}

pub fn despawn_driver(world: &mut World, id: DriverId) {
    let entity = {
        let mut index = world.resource_mut::<EntityIndex>();
        let Some(entity) = index.drivers.remove(&id) else {
            return;
        };
        index.driver_accounts.retain(|_, driver| *driver != id);
        entity
    };
    world.despawn(entity);
}

/// Candidate source over the world, with a transaction's staged drivers
/// taking precedence over their committed components.
pub struct RegistryView<'a> {
    world: &'a World,
    now: DateTime<Utc>,
    policy: PositionPolicy,
    overlay: Option<&'a Txn>,
}

impl<'a> RegistryView<'a> {
    pub fn new(world: &'a World, now: DateTime<Utc>) -> Self {
        Self {
            world,
            now,
            policy: *world.resource::<PositionPolicy>(),
            overlay: None,
        }
    }

    pub fn with_overlay(mut self, txn: &'a Txn) -> Self {
        self.overlay = Some(txn);
        self
    }

    fn candidate(&self, entity: Entity, category: VehicleCategory) -> Option<EligibleDriver> {
        let driver = self.world.get::<Driver>(entity)?;
        if driver.category != category {
            return None;
        }
        let staged = self
            .overlay
            .map_or(Staged::Untouched, |txn| txn.staged_driver(driver.id));
        let position = match staged {
            Staged::Deleted => None,
            Staged::Changed(record) => record.eligible_position(&self.policy, self.now),
            Staged::Untouched => eligible_fix(
                self.world.get::<Approval>(entity)?.state,
                self.world.get::<Availability>(entity)?.0,
                self.world.get::<CurrentRequest>(entity)?.0.is_some(),
                self.world.get::<LastFix>(entity).map(|fix| fix.0),
                &self.policy,
                self.now,
            )
            .map(|fix| fix.point),
        }?;
        Some(EligibleDriver {
            driver_id: driver.id,
            position,
        })
    }

    fn gather(
        &self,
        entities: impl Iterator<Item = Entity>,
        category: VehicleCategory,
    ) -> Vec<EligibleDriver> {
        let mut drivers: Vec<EligibleDriver> = entities
            .filter_map(|entity| self.candidate(entity, category))
            .collect();
        drivers.sort_by_key(|driver| driver.driver_id);
        drivers
    }
}

impl CandidateSource for RegistryView<'_> {
    fn eligible(&mut self, category: VehicleCategory) -> Vec<EligibleDriver> {
        let index = self.world.resource::<EntityIndex>();
        self.gather(index.drivers.values().copied(), category)
    }

    fn eligible_in_cells(
        &mut self,
        category: VehicleCategory,
        cells: &[CellIndex],
    ) -> Vec<EligibleDriver> {
        let entities = self.world.resource::<SpatialIndex>().drivers_in_cells(cells);
        self.gather(entities.into_iter(), category)
    }
}

/// Eligible drivers of a category, ordered by id.
pub fn list_eligible(
    world: &World,
    category: VehicleCategory,
    now: DateTime<Utc>,
) -> Vec<EligibleDriver> {
    RegistryView::new(world, now).eligible(category)
}

pub fn register_driver(
    world: &World,
    txn: &mut Txn,
    new: NewDriver,
) -> DispatchResult<DriverRecord> {
    if new.vehicle.category() != new.category {
        return Err(DispatchError::validation(format!(
            "vehicle type {} does not belong to category {}",
            new.vehicle, new.category
        )));
    }
    let index = world.resource::<EntityIndex>();
    if index.driver(new.id).is_some() {
        return Err(DispatchError::invalid_state(format!("driver {} already exists", new.id)));
    }
    if index.driver_for_account(new.account_id).is_some() {
        return Err(DispatchError::invalid_state(format!(
            "account {} already has a driver profile",
            new.account_id
        )));
    }

    let record = DriverRecord {
        id: new.id,
        account_id: new.account_id,
        category: new.category,
        vehicle: new.vehicle,
        approval: ApprovalState::Pending,
        rejection_reason: None,
        online: OnlineState::Offline,
        last_fix: None,
        current_request: None,
    };
    info!(
        driver_id = %record.id,
        category = %record.category,
        vehicle = %record.vehicle,
        "driver registered"
    );
    txn.insert_driver(record.clone());
    Ok(record)
}

/// Driver-reported status change, optionally carrying a fresh position.
///
/// `in_ride` is owned by dispatch: it can neither be set here nor left while a
/// request is active. Going offline or paused releases an outstanding offer.
pub fn set_online_state(
    world: &World,
    txn: &mut Txn,
    driver_id: DriverId,
    state: OnlineState,
    point: Option<GeoPoint>,
) -> DispatchResult<DriverRecord> {
    if state == OnlineState::InRide {
        return Err(DispatchError::invalid_state("in_ride is only entered by accepting an offer"));
    }
    let now = txn.now();
    let driver = txn.driver(world, driver_id)?;
    if driver.online == OnlineState::InRide {
        warn!(
            %driver_id,
            requested = %state,
            "driver tried to leave in_ride with an active request"
        );
        return Err(DispatchError::invalid_state("cannot leave in_ride while a request is active"));
    }

    let previous = driver.online;
    driver.online = state;
    if let Some(point) = point {
        driver.last_fix = Some(Fix { point, at: now });
    }
    let held_offer = driver.current_request;
    debug!(%driver_id, from = %previous, to = %state, "driver state changed");

    if matches!(state, OnlineState::Offline | OnlineState::Paused) {
        if let Some(request_id) = held_offer {
            lifecycle::release_offer(world, txn, request_id, ReleaseReason::DriverUnavailable)?;
        }
    }
    Ok(txn.driver(world, driver_id)?.clone())
}

/// Record a position report. Reports older than the current fix are ignored.
pub fn report_position(
    world: &World,
    txn: &mut Txn,
    driver_id: DriverId,
    fix: Fix,
) -> DispatchResult<DriverRecord> {
    let driver = txn.driver(world, driver_id)?;
    let superseded = driver.last_fix.is_some_and(|current| current.at > fix.at);
    if superseded {
        debug!(%driver_id, reported_at = %fix.at, "out-of-order position report ignored");
    } else {
        driver.last_fix = Some(fix);
    }
    Ok(driver.clone())
}

/// Admin approval decision. Leaving `approved` releases an outstanding offer;
/// an active ride is left to finish.
pub fn set_approval(
    world: &World,
    txn: &mut Txn,
    driver_id: DriverId,
    state: ApprovalState,
    reason: Option<String>,
) -> DispatchResult<DriverRecord> {
    let driver = txn.driver(world, driver_id)?;
    driver.approval = state;
    driver.rejection_reason = match state {
        ApprovalState::Rejected => reason,
        _ => None,
    };
    let held_offer = match driver.online {
        OnlineState::InRide => None,
        _ => driver.current_request,
    };
    info!(%driver_id, approval = %state, "driver approval changed");

    if state != ApprovalState::Approved {
        if let Some(request_id) = held_offer {
            lifecycle::release_offer(world, txn, request_id, ReleaseReason::DriverUnavailable)?;
        }
    }
    Ok(txn.driver(world, driver_id)?.clone())
}

/// Admin deletion. Refused while the driver has an active request.
pub fn delete_driver(world: &World, txn: &mut Txn, driver_id: DriverId) -> DispatchResult<()> {
    let driver = txn.driver(world, driver_id)?;
    if driver.online == OnlineState::InRide {
        return Err(DispatchError::invalid_state("driver has an active request"));
    }
    if let Some(request_id) = driver.current_request {
        lifecycle::release_offer(world, txn, request_id, ReleaseReason::DriverRemoved)?;
    }
    txn.delete_driver(driver_id);
    info!(%driver_id, "driver deleted");
    Ok(())
}

/// Drivers filtered by approval state, ordered by id.
pub fn drivers_by_approval(world: &World, approval: Option<ApprovalState>) -> Vec<DriverRecord> {
    all_drivers(world)
        .into_iter()
        .filter(|driver| approval.map_or(true, |state| driver.approval == state))
        .collect()
}

/// Driver profile linked to an account, for callers acting as drivers.
pub fn driver_for_account(world: &World, account_id: AccountId) -> DispatchResult<DriverId> {
    world
        .resource::<EntityIndex>()
        .driver_for_account(account_id)
        .ok_or_else(|| DispatchError::driver_not_found(format!("account {account_id}")))
}
