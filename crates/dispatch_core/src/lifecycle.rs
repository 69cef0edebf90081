//! Request lifecycle: offer, accept, reject, reassignment, start, complete.
//!
//! ```text
//! pending(no offer) ──match──▶ pending(offer, T) ──accept──▶ matched ──start──▶ in_progress
//!        │                        │  ▲                                            │
//!        │                        │  └── reject / expire / unavailable:        complete
//!        │                        │      exclude driver, match again              ▼
//!        └── no driver ───────────┴──▶ cancelled                              completed
//! ```
//!
//! Every transition stages its records in a [Txn]; see [crate::txn] for how
//! they reach the store and the world.

use std::collections::BTreeSet;

use bevy_ecs::prelude::World;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::clock::Event;
use crate::ecs::{write_component, EntityIndex, OfferWindow, Rejections, Request};
use crate::error::{DispatchError, DispatchResult};
use crate::geo::{distance_km, round2};
use crate::matching::MatchingAlgorithmResource;
use crate::model::{AccountId, DriverId, OnlineState, RequestId};
use crate::notify::Notification;
use crate::pricing::PricingConfig;
use crate::registry::RegistryView;
use crate::request::{CancelReason, NewRequest, Offer, ReleaseReason, RequestKind, RequestState};
use crate::store::RequestRecord;
use crate::txn::Txn;

/// Where a request ended up after a (re)matching attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OfferOutcome {
    Offered {
        driver_id: DriverId,
        deadline: DateTime<Utc>,
    },
    Cancelled,
}

pub fn load_request(world: &World, id: RequestId) -> Option<RequestRecord> {
    let entity = world.resource::<EntityIndex>().request(id)?;
    let request = world.get::<Request>(entity)?;
    Some(RequestRecord {
        id: request.id,
        requester: request.requester,
        details: request.details.clone(),
        pickup: request.pickup.clone(),
        destination: request.destination.clone(),
        distance_km: request.distance_km,
        quote: request.quote,
        state: world.get::<RequestState>(entity)?.clone(),
        excluded_drivers: world.get::<Rejections>(entity)?.0.clone(),
        created_at: request.created_at,
        updated_at: request.updated_at,
    })
}

/// Every request matching `filter`, oldest first.
pub fn requests_where(
    world: &World,
    filter: impl Fn(&RequestRecord) -> bool,
) -> Vec<RequestRecord> {
    let mut requests: Vec<RequestRecord> = world
        .resource::<EntityIndex>()
        .requests
        .keys()
        .filter_map(|id| load_request(world, *id))
        .filter(|record| filter(record))
        .collect();
    requests.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    requests
}

pub fn apply_request(world: &mut World, record: &RequestRecord) {
    let request = Request {
        id: record.id,
        requester: record.requester,
        details: record.details.clone(),
        pickup: record.pickup.clone(),
        destination: record.destination.clone(),
        distance_km: record.distance_km,
        quote: record.quote,
        created_at: record.created_at,
        updated_at: record.updated_at,
    };
    let state = record.state.clone();
    let rejections = Rejections(record.excluded_drivers.clone());

    match world.resource::<EntityIndex>().request(record.id) {
        Some(entity) => {
            write_component(world, entity, request);
            write_component(world, entity, state);
            write_component(world, entity, rejections);
        }
        None => {
            let entity = world.spawn((request, state, rejections)).id();
            world
                .resource_mut::<EntityIndex>()
                .requests
                .insert(record.id, entity);
        }
    }
}

/// Validate, price and stage a new request, then try to offer it.
pub fn open_request(
    world: &World,
    txn: &mut Txn,
    requester: AccountId,
    new: NewRequest,
) -> DispatchResult<(RequestId, OfferOutcome)> {
    new.details.validate()?;

    let now = txn.now();
    let distance = round2(distance_km(new.pickup.point, new.destination.point));
    let quote = new.details.quote(distance, world.resource::<PricingConfig>());
    let record = RequestRecord {
        id: RequestId::new(),
        requester,
        details: new.details,
        pickup: new.pickup,
        destination: new.destination,
        distance_km: distance,
        quote,
        state: RequestState::Pending { offer: None },
        excluded_drivers: BTreeSet::new(),
        created_at: now,
        updated_at: now,
    };
    let request_id = record.id;
    debug!(
        %request_id,
        kind = record.details.label(),
        distance_km = distance,
        estimated_price = quote.total,
        "request opened"
    );
    txn.insert_request(record);

    let outcome = extend_offer(world, txn, request_id, CancelReason::NoDriversAtCreation)?;
    Ok((request_id, outcome))
}

/// Match the request against eligible drivers minus its exclusions and offer
/// it to the winner, or cancel it with `exhausted` when nobody is left.
pub fn extend_offer(
    world: &World,
    txn: &mut Txn,
    request_id: RequestId,
    exhausted: CancelReason,
) -> DispatchResult<OfferOutcome> {
    let now = txn.now();
    let (origin, category, excluded) = {
        let request = txn.request(world, request_id)?;
        (
            request.pickup.point,
            request.vehicle_category(),
            request.excluded_drivers.clone(),
        )
    };

    let picked = {
        let algorithm = world.resource::<MatchingAlgorithmResource>();
        let mut view = RegistryView::new(world, now).with_overlay(txn);
        algorithm.select_best_driver(&mut view, origin, category, &excluded)
    };

    let Some(candidate) = picked else {
        let request = txn.request(world, request_id)?;
        request.state = RequestState::Cancelled { reason: exhausted };
        let requester = request.requester;
        info!(%request_id, excluded = excluded.len(), "no eligible driver, request cancelled");
        txn.notify(Notification::RequestCancelled {
            request_id,
            requester,
            reason: exhausted,
        });
        return Ok(OfferOutcome::Cancelled);
    };

    let deadline = now
        .checked_add_signed(world.resource::<OfferWindow>().0)
        .ok_or_else(|| DispatchError::invalid_state("offer deadline out of range"))?;
    let offer = Offer {
        driver_id: candidate.driver_id,
        extended_at: now,
        deadline,
    };
    txn.driver(world, offer.driver_id)?.current_request = Some(request_id);
    txn.request(world, request_id)?.state = RequestState::Pending { offer: Some(offer) };
    txn.schedule(Event::offer_expired(offer.deadline, request_id, offer.driver_id));
    txn.notify(Notification::OfferExtended {
        request_id,
        driver_id: offer.driver_id,
        deadline: offer.deadline,
    });
    info!(
        %request_id,
        driver_id = %offer.driver_id,
        pickup_distance_km = round2(candidate.pickup_distance_km),
        deadline = %offer.deadline,
        "offer extended"
    );
    Ok(OfferOutcome::Offered {
        driver_id: offer.driver_id,
        deadline: offer.deadline,
    })
}

/// Take the outstanding offer away from its driver, exclude that driver for
/// good, and match again.
pub fn release_offer(
    world: &World,
    txn: &mut Txn,
    request_id: RequestId,
    reason: ReleaseReason,
) -> DispatchResult<OfferOutcome> {
    let request = txn.request(world, request_id)?;
    let Some(offer) = request.offer().copied() else {
        return Err(DispatchError::invalid_state("request has no outstanding offer"));
    };
    request.excluded_drivers.insert(offer.driver_id);
    request.state = RequestState::Pending { offer: None };

    // The driver may already be staged for deletion.
    if let Ok(driver) = txn.driver(world, offer.driver_id) {
        if driver.current_request == Some(request_id) {
            driver.current_request = None;
        }
    }
    txn.notify(Notification::OfferWithdrawn {
        request_id,
        driver_id: offer.driver_id,
        reason,
    });
    info!(%request_id, driver_id = %offer.driver_id, ?reason, "offer released");

    extend_offer(world, txn, request_id, CancelReason::CandidatesExhausted)
}

/// The offer `driver_id` may answer right now.
fn answerable_offer(
    request: &RequestRecord,
    driver_id: DriverId,
    now: DateTime<Utc>,
) -> DispatchResult<Offer> {
    match &request.state {
        RequestState::Pending { offer: Some(offer) } if offer.driver_id == driver_id => {
            if offer.is_open_at(now) {
                Ok(*offer)
            } else {
                Err(DispatchError::invalid_state("offer expired"))
            }
        }
        _ if request.excluded_drivers.contains(&driver_id) => Err(DispatchError::invalid_state(
            "offer was already declined, expired or withdrawn",
        )),
        state if state.is_terminal() => Err(DispatchError::invalid_state(format!(
            "request is {}",
            state.status()
        ))),
        RequestState::Pending { offer: None } => {
            Err(DispatchError::invalid_state("request has no outstanding offer"))
        }
        RequestState::Matched { driver_id: assigned }
        | RequestState::InProgress { driver_id: assigned }
            if *assigned == driver_id =>
        {
            Err(DispatchError::invalid_state("offer was already accepted"))
        }
        _ => Err(DispatchError::forbidden("request is not offered to this driver")),
    }
}

/// Error for a start/complete attempt that does not fit the request's state.
fn transition_error(request: &RequestRecord, driver_id: DriverId, action: &str) -> DispatchError {
    let involved = match &request.state {
        RequestState::Pending { offer } => offer.as_ref().map(|offer| offer.driver_id),
        RequestState::Matched { driver_id }
        | RequestState::InProgress { driver_id }
        | RequestState::Completed { driver_id, .. } => Some(*driver_id),
        RequestState::Cancelled { .. } => None,
    };
    if involved == Some(driver_id) || request.state.is_terminal() {
        DispatchError::invalid_state(format!("cannot {action} a {} request", request.status()))
    } else {
        DispatchError::forbidden("request is not assigned to this driver")
    }
}

pub fn accept_offer(
    world: &World,
    txn: &mut Txn,
    request_id: RequestId,
    driver_id: DriverId,
) -> DispatchResult<()> {
    let now = txn.now();
    let request = txn.request(world, request_id)?;
    answerable_offer(request, driver_id, now)?;
    request.state = RequestState::Matched { driver_id };
    let requester = request.requester;

    let driver = txn.driver(world, driver_id)?;
    driver.online = OnlineState::InRide;
    driver.current_request = Some(request_id);

    txn.notify(Notification::RequestMatched {
        request_id,
        requester,
        driver_id,
    });
    info!(%request_id, %driver_id, "offer accepted");
    Ok(())
}

pub fn reject_offer(
    world: &World,
    txn: &mut Txn,
    request_id: RequestId,
    driver_id: DriverId,
) -> DispatchResult<OfferOutcome> {
    let now = txn.now();
    let request = txn.request(world, request_id)?;
    answerable_offer(request, driver_id, now)?;
    release_offer(world, txn, request_id, ReleaseReason::Rejected)
}

pub fn start_trip(
    world: &World,
    txn: &mut Txn,
    request_id: RequestId,
    driver_id: DriverId,
) -> DispatchResult<()> {
    let request = txn.request(world, request_id)?;
    match request.state {
        RequestState::Matched { driver_id: assigned } if assigned == driver_id => {
            request.state = RequestState::InProgress { driver_id };
        }
        _ => return Err(transition_error(request, driver_id, "start")),
    }
    let requester = request.requester;
    txn.notify(Notification::TripStarted {
        request_id,
        requester,
    });
    info!(%request_id, %driver_id, "trip started");
    Ok(())
}

pub fn complete_trip(
    world: &World,
    txn: &mut Txn,
    request_id: RequestId,
    driver_id: DriverId,
) -> DispatchResult<()> {
    let request = txn.request(world, request_id)?;
    let final_price = match request.state {
        RequestState::InProgress { driver_id: assigned } if assigned == driver_id => {
            request.quote.total
        }
        _ => return Err(transition_error(request, driver_id, "complete")),
    };
    request.state = RequestState::Completed {
        driver_id,
        final_price,
    };
    let requester = request.requester;

    let driver = txn.driver(world, driver_id)?;
    driver.online = OnlineState::Online;
    driver.current_request = None;

    txn.notify(Notification::TripCompleted {
        request_id,
        requester,
        final_price,
    });
    info!(%request_id, %driver_id, final_price, "trip completed");
    Ok(())
}

/// Fire an offer deadline. Events whose offer was already answered, released
/// or re-extended are stale and ignored.
pub fn expire_offer(
    world: &World,
    txn: &mut Txn,
    event: &Event,
) -> DispatchResult<Option<OfferOutcome>> {
    let current = load_request(world, event.request_id);
    let live = current
        .as_ref()
        .and_then(RequestRecord::offer)
        .is_some_and(|offer| {
            offer.driver_id == event.driver_id && offer.deadline == event.timestamp
        });
    if !live {
        debug!(
            request_id = %event.request_id,
            driver_id = %event.driver_id,
            "stale offer deadline ignored"
        );
        return Ok(None);
    }
    info!(request_id = %event.request_id, driver_id = %event.driver_id, "offer expired");
    release_offer(world, txn, event.request_id, ReleaseReason::Expired).map(Some)
}
