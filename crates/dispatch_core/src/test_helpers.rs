//! Test helpers shared by unit tests, integration tests and benches.
//!
//! Deterministic clock, recording notifier, a store that can be told to fail,
//! and a small seeded geography around central Damascus.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::clock::Clock;
use crate::geo::GeoPoint;
use crate::model::{DriverId, Place};
use crate::notify::{Notification, Notifier};
use crate::request::DeliveryDetails;
use crate::store::{DispatchStore, DriverRecord, InMemoryStore, RequestRecord, StoreError};

/// Fixed start time for deterministic tests: 2024-03-01 08:00:00 UTC.
pub fn test_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0)
        .single()
        .expect("valid test epoch")
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn at_epoch() -> Self {
        Self::new(test_epoch())
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }

    pub fn advance_secs(&self, secs: i64) {
        self.advance(Duration::seconds(secs));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Notifier that keeps everything it is told.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Drain and return what was recorded so far.
    pub fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.sent.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: &Notification) {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification.clone());
    }
}

/// In-memory store whose writes can be switched to fail.
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: InMemoryStore,
    failing: AtomicBool,
    rejecting_requests: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Refuse request writes only; driver writes still land.
    pub fn set_rejecting_requests(&self, rejecting: bool) {
        self.rejecting_requests.store(rejecting, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("injected failure".into()))
        } else {
            Ok(())
        }
    }
}

impl DispatchStore for FlakyStore {
    fn upsert_driver(&self, record: &DriverRecord) -> Result<(), StoreError> {
        self.check()?;
        self.inner.upsert_driver(record)
    }

    fn delete_driver(&self, id: DriverId) -> Result<(), StoreError> {
        self.check()?;
        self.inner.delete_driver(id)
    }

    fn upsert_request(&self, record: &RequestRecord) -> Result<(), StoreError> {
        self.check()?;
        if self.rejecting_requests.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected(format!("request {}", record.id)));
        }
        self.inner.upsert_request(record)
    }

    fn load_drivers(&self) -> Result<Vec<DriverRecord>, StoreError> {
        self.inner.load_drivers()
    }

    fn load_requests(&self) -> Result<Vec<RequestRecord>, StoreError> {
        self.inner.load_requests()
    }
}

fn point(lat: f64, lng: f64) -> GeoPoint {
    GeoPoint::new(lat, lng).expect("seeded point is valid")
}

/// Central Damascus: (33.51, 36.29).
pub fn damascus_center() -> GeoPoint {
    point(33.51, 36.29)
}

/// About 1.4 km north-east of [damascus_center]: (33.52, 36.30).
pub fn damascus_east() -> GeoPoint {
    point(33.52, 36.30)
}

/// About 2.9 km south-west of [damascus_center]: (33.49, 36.27).
pub fn damascus_south() -> GeoPoint {
    point(33.49, 36.27)
}

/// Offset from [damascus_center] by the given degrees.
pub fn near_center(dlat: f64, dlng: f64) -> GeoPoint {
    point(33.51 + dlat, 36.29 + dlng)
}

pub fn place(point: GeoPoint, address: &str) -> Place {
    Place::new(point, address)
}

/// Delivery payload that passes validation.
pub fn sample_delivery() -> DeliveryDetails {
    DeliveryDetails {
        order_type: "documents".into(),
        pickup_details: Some("reception desk".into()),
        sender_name: "Rami".into(),
        delivery_details: None,
        receiver_name: "Lina".into(),
        receiver_phone: "0991234567".into(),
        receiver_national_id: "01234567890".into(),
        driver_pays: false,
        product_amount: 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{distance_km, round2};

    #[test]
    fn manual_clock_moves_only_when_told() {
        let clock = ManualClock::at_epoch();
        assert_eq!(clock.now(), test_epoch());
        clock.advance_secs(31);
        assert_eq!(clock.now(), test_epoch() + Duration::seconds(31));
    }

    #[test]
    fn seeded_points_have_expected_spacing() {
        let d = round2(distance_km(damascus_center(), damascus_east()));
        assert!((1.40..=1.50).contains(&d));
        assert!(distance_km(damascus_center(), damascus_south()) > 2.5);
    }

    #[test]
    fn flaky_store_fails_writes_on_demand() {
        let store = FlakyStore::new();
        store.set_failing(true);
        assert!(store.delete_driver(DriverId::from_u128(1)).is_err());
        store.set_failing(false);
        assert!(store.delete_driver(DriverId::from_u128(1)).is_ok());
    }
}
