//! Notification collaborator. Delivery (push, SMS, websocket) is not ours;
//! the engine only says what happened and to whom.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::model::{AccountId, DriverId, RequestId};
use crate::request::{CancelReason, ReleaseReason};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    OfferExtended {
        request_id: RequestId,
        driver_id: DriverId,
        deadline: DateTime<Utc>,
    },
    OfferWithdrawn {
        request_id: RequestId,
        driver_id: DriverId,
        reason: ReleaseReason,
    },
    RequestMatched {
        request_id: RequestId,
        requester: AccountId,
        driver_id: DriverId,
    },
    TripStarted {
        request_id: RequestId,
        requester: AccountId,
    },
    TripCompleted {
        request_id: RequestId,
        requester: AccountId,
        final_price: f64,
    },
    RequestCancelled {
        request_id: RequestId,
        requester: AccountId,
        reason: CancelReason,
    },
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _notification: &Notification) {}
}

/// Writes every notification to the `dispatch::notify` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) {
        match serde_json::to_string(notification) {
            Ok(payload) => info!(target: "dispatch::notify", %payload, "notification"),
            Err(error) => info!(target: "dispatch::notify", ?notification, %error, "notification"),
        }
    }
}
