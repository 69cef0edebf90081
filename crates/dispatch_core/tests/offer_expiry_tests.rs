mod support;

use std::collections::BTreeSet;

use chrono::Duration;
use dispatch_core::config::DispatchConfig;
use dispatch_core::error::DispatchError;
use dispatch_core::model::RequestStatus;
use dispatch_core::notify::Notification;
use dispatch_core::request::ReleaseReason;
use dispatch_core::test_helpers::{damascus_center, damascus_east, damascus_south, test_epoch};
use dispatch_core::DispatchEngine;
use support::drivers::DriverBuilder;
use support::engine::{TestEngine, TestEngineBuilder};

#[test]
fn sweep_reassigns_expired_offer() {
    let harness = TestEngine::new();
    let first = harness.add_driver(DriverBuilder::new(1).at(damascus_center()));
    let second = harness.add_driver(DriverBuilder::new(2).at(damascus_east()));
    let rider = harness.rider(1);
    let request = harness
        .ride(&rider, damascus_center(), damascus_south())
        .expect("request created");
    assert_eq!(request.offered_driver_id(), Some(first.id));
    assert_eq!(harness.engine.next_deadline(), Some(test_epoch() + Duration::seconds(30)));

    harness.clock.advance_secs(29);
    assert_eq!(harness.engine.expire_due_offers(), 0);

    harness.clock.advance_secs(1);
    assert_eq!(harness.engine.expire_due_offers(), 1);

    let current = harness.engine.request_status(&rider, request.id).expect("status");
    assert_eq!(current.offered_driver_id(), Some(second.id));
    assert_eq!(current.excluded_drivers, BTreeSet::from([first.id]));
    assert_eq!(
        current.driver_response_deadline(),
        Some(test_epoch() + Duration::seconds(60))
    );
    assert!(harness.notifier.sent().iter().any(|n| matches!(
        n,
        Notification::OfferWithdrawn {
            reason: ReleaseReason::Expired,
            driver_id,
            ..
        } if *driver_id == first.id
    )));
}

#[test]
fn poll_never_returns_an_offer_at_or_past_its_deadline() {
    let harness = TestEngine::new();
    let driver = harness.add_driver(DriverBuilder::new(1));
    let rider = harness.rider(1);
    let request = harness
        .ride(&rider, damascus_center(), damascus_east())
        .expect("request created");

    harness.clock.advance_secs(29);
    assert_eq!(harness.engine.pending_offers(&driver.caller).expect("poll").len(), 1);

    // No sweep has run: the poll itself fires the deadline.
    harness.clock.advance_secs(1);
    assert!(harness.engine.pending_offers(&driver.caller).expect("poll").is_empty());

    let current = harness.engine.request_status(&rider, request.id).expect("status");
    assert_eq!(current.status(), RequestStatus::Cancelled);
    assert_eq!(current.excluded_drivers, BTreeSet::from([driver.id]));
}

#[test]
fn accepting_after_expiry_is_invalid_state() {
    let harness = TestEngine::new();
    let driver = harness.add_driver(DriverBuilder::new(1));
    harness.add_driver(DriverBuilder::new(2).at(damascus_east()));
    let rider = harness.rider(1);
    let request = harness
        .ride(&rider, damascus_center(), damascus_east())
        .expect("request created");
    assert_eq!(request.offered_driver_id(), Some(driver.id));

    harness.clock.advance_secs(45);
    let err = harness
        .engine
        .accept_offer(&driver.caller, request.id)
        .expect_err("offer expired");
    assert!(matches!(err, DispatchError::InvalidState(_)), "{err:?}");

    let err = harness
        .engine
        .reject_offer(&driver.caller, request.id)
        .expect_err("offer expired");
    assert!(matches!(err, DispatchError::InvalidState(_)), "{err:?}");
}

#[test]
fn answered_offer_leaves_a_stale_deadline_that_changes_nothing() {
    let harness = TestEngine::new();
    let driver = harness.add_driver(DriverBuilder::new(1));
    let rider = harness.rider(1);
    let request = harness
        .ride(&rider, damascus_center(), damascus_east())
        .expect("request created");
    harness
        .engine
        .accept_offer(&driver.caller, request.id)
        .expect("accept");

    harness.clock.advance_secs(120);
    assert_eq!(harness.engine.expire_due_offers(), 0);
    assert_eq!(harness.engine.next_deadline(), None);

    let current = harness.engine.request_status(&rider, request.id).expect("status");
    assert_eq!(current.status(), RequestStatus::Matched);
    assert_eq!(current.assigned_driver_id(), Some(driver.id));
}

#[test]
fn stale_deadline_from_earlier_offer_does_not_cut_new_offer_short() {
    let harness = TestEngine::new();
    let first = harness.add_driver(DriverBuilder::new(1).at(damascus_center()));
    let second = harness.add_driver(DriverBuilder::new(2).at(damascus_east()));
    let rider = harness.rider(1);
    let request = harness
        .ride(&rider, damascus_center(), damascus_south())
        .expect("request created");

    harness.clock.advance_secs(20);
    harness
        .engine
        .reject_offer(&first.caller, request.id)
        .expect("reject");

    // First offer's deadline (t=30) fires but the live offer runs to t=50.
    harness.clock.advance_secs(15);
    assert_eq!(harness.engine.expire_due_offers(), 0);
    let offers = harness.engine.pending_offers(&second.caller).expect("poll");
    assert_eq!(offers.len(), 1);
    assert_eq!(
        offers[0].driver_response_deadline(),
        Some(test_epoch() + Duration::seconds(50))
    );
}

#[test]
fn offer_window_is_configurable() {
    let harness = TestEngineBuilder::new().with_offer_window_secs(5).build();
    harness.add_driver(DriverBuilder::new(1));
    let rider = harness.rider(1);
    let request = harness
        .ride(&rider, damascus_center(), damascus_east())
        .expect("request created");
    assert_eq!(
        request.driver_response_deadline(),
        Some(test_epoch() + Duration::seconds(5))
    );

    harness.clock.advance_secs(5);
    assert_eq!(harness.engine.expire_due_offers(), 1);
}

#[test]
fn engine_refuses_window_beyond_a_day() {
    let mut config = DispatchConfig::default();
    config.offer_window_secs = 10_000_000_000_000;
    let built = DispatchEngine::builder(config).build();
    assert!(matches!(built, Err(DispatchError::Validation(_))));
}
