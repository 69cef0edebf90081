use std::collections::{BTreeSet, HashMap};

use bevy_ecs::prelude::{Component, DetectChangesMut, Entity, Resource, World};
use chrono::{DateTime, Duration, Utc};
use h3o::CellIndex;

use crate::model::{
    AccountId, ApprovalState, DriverId, Fix, OnlineState, Place, RequestId, VehicleCategory,
    VehicleType,
};
use crate::pricing::Quote;
use crate::request::RequestDetails;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Component)]
pub struct Driver {
    pub id: DriverId,
    pub account_id: AccountId,
    pub category: VehicleCategory,
    pub vehicle: VehicleType,
}

#[derive(Debug, Clone, PartialEq, Eq, Component)]
pub struct Approval {
    pub state: ApprovalState,
    /// Set by the admin collaborator when rejecting.
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Component)]
pub struct Availability(pub OnlineState);

/// Last position report; absent until the driver reports one.
#[derive(Debug, Clone, Copy, PartialEq, Component)]
pub struct LastFix(pub Fix);

/// H3 cell of `LastFix`, at the index resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Component)]
pub struct GridCell(pub CellIndex);

/// Request the driver is offered or working on. A driver holding an offer is
/// reserved and not eligible for other requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Component)]
pub struct CurrentRequest(pub Option<RequestId>);

#[derive(Debug, Clone, PartialEq, Component)]
pub struct Request {
    pub id: RequestId,
    pub requester: AccountId,
    pub details: RequestDetails,
    pub pickup: Place,
    pub destination: Place,
    /// Pickup to destination, rounded to two decimals.
    pub distance_km: f64,
    pub quote: Quote,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Drivers that rejected, let expire or dropped this request. Only grows.
#[derive(Debug, Clone, PartialEq, Eq, Default, Component)]
pub struct Rejections(pub BTreeSet<DriverId>);

/// Id → entity lookups.
#[derive(Debug, Default, Resource)]
pub struct EntityIndex {
    pub drivers: HashMap<DriverId, Entity>,
    pub driver_accounts: HashMap<AccountId, DriverId>,
    pub requests: HashMap<RequestId, Entity>,
}

impl EntityIndex {
    pub fn driver(&self, id: DriverId) -> Option<Entity> {
        self.drivers.get(&id).copied()
    }

    pub fn driver_for_account(&self, account: AccountId) -> Option<DriverId> {
        self.driver_accounts.get(&account).copied()
    }

    pub fn request(&self, id: RequestId) -> Option<Entity> {
        self.requests.get(&id).copied()
    }
}

/// How long a driver has to answer an offer.
#[derive(Debug, Clone, Copy, Resource)]
pub struct OfferWindow(pub Duration);

impl Default for OfferWindow {
    fn default() -> Self {
        Self(Duration::seconds(30))
    }
}

/// Optional freshness requirement on position reports.
#[derive(Debug, Clone, Copy, Default, Resource)]
pub struct PositionPolicy {
    /// `None`: a fix never goes stale.
    pub max_age: Option<Duration>,
}

impl PositionPolicy {
    pub fn is_fresh(&self, fix: &Fix, now: DateTime<Utc>) -> bool {
        match self.max_age {
            Some(max_age) => now - fix.at <= max_age,
            None => true,
        }
    }
}

/// Write `value` onto `entity`, touching change detection only when it differs.
pub(crate) fn write_component<T: Component + PartialEq>(
    world: &mut World,
    entity: Entity,
    value: T,
) {
    if let Some(mut current) = world.get_mut::<T>(entity) {
        current.set_if_neq(value);
        return;
    }
    world.entity_mut(entity).insert(value);
}

/// Like [write_component], removing the component for `None`.
pub(crate) fn write_optional<T: Component + PartialEq>(
    world: &mut World,
    entity: Entity,
    value: Option<T>,
) {
    match value {
        Some(value) => write_component(world, entity, value),
        None => {
            if world.get::<T>(entity).is_some() {
                world.entity_mut(entity).remove::<T>();
            }
        }
    }
}
