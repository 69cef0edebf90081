use std::cmp::Ordering;
use std::collections::BinaryHeap;

use bevy_ecs::prelude::Resource;
use chrono::{DateTime, Utc};

use crate::model::{DriverId, RequestId};

/// Source of wall time for deadlines.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventKind {
    /// An outstanding offer reached its response deadline.
    OfferExpired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub request_id: RequestId,
    /// Driver the offer was made to; a mismatch at fire time means the event is stale.
    pub driver_id: DriverId,
}

impl Event {
    pub fn offer_expired(
        deadline: DateTime<Utc>,
        request_id: RequestId,
        driver_id: DriverId,
    ) -> Self {
        Self {
            timestamp: deadline,
            kind: EventKind::OfferExpired,
            request_id,
            driver_id,
        }
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering to make BinaryHeap a min-heap by timestamp.
        other
            .timestamp
            .cmp(&self.timestamp)
            .then_with(|| self.kind.cmp(&other.kind))
            .then_with(|| other.request_id.cmp(&self.request_id))
            .then_with(|| other.driver_id.cmp(&self.driver_id))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Pending offer deadlines, earliest first.
///
/// Events are never removed when an offer is answered early; they are checked
/// against the request's current offer when they fire.
#[derive(Debug, Default, Resource)]
pub struct DeadlineQueue {
    events: BinaryHeap<Event>,
}

impl DeadlineQueue {
    pub fn schedule(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Pop every event due at `now` (timestamp <= now), in time order.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Vec<Event> {
        let mut due = Vec::new();
        while self.events.peek().is_some_and(|event| event.timestamp <= now) {
            if let Some(event) = self.events.pop() {
                due.push(event);
            }
        }
        due
    }

    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.events.peek().map(|event| event.timestamp)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
