//! Persistence collaborator contract.
//!
//! The engine writes every record an operation changed through
//! [DispatchStore] before applying the change in memory, and can be rebuilt
//! from `load_drivers`/`load_requests` at boot.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{
    AccountId, ApprovalState, DriverId, Fix, OnlineState, Place, RequestId, RequestStatus,
    VehicleCategory, VehicleType,
};
use crate::pricing::Quote;
use crate::request::{Offer, RequestDetails, RequestKind, RequestState};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("write rejected: {0}")]
    Rejected(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persisted shape of a driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverRecord {
    pub id: DriverId,
    pub account_id: AccountId,
    pub category: VehicleCategory,
    pub vehicle: VehicleType,
    pub approval: ApprovalState,
    pub rejection_reason: Option<String>,
    pub online: OnlineState,
    pub last_fix: Option<Fix>,
    pub current_request: Option<RequestId>,
}

/// Persisted shape of a ride or delivery request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: RequestId,
    pub requester: AccountId,
    pub details: RequestDetails,
    pub pickup: Place,
    pub destination: Place,
    pub distance_km: f64,
    pub quote: Quote,
    pub state: RequestState,
    pub excluded_drivers: BTreeSet<DriverId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RequestRecord {
    pub fn status(&self) -> RequestStatus {
        self.state.status()
    }

    pub fn vehicle_category(&self) -> VehicleCategory {
        self.details.vehicle_category()
    }

    pub fn assigned_driver_id(&self) -> Option<DriverId> {
        self.state.assigned_driver_id()
    }

    pub fn offer(&self) -> Option<&Offer> {
        self.state.offer()
    }

    pub fn offered_driver_id(&self) -> Option<DriverId> {
        self.offer().map(|offer| offer.driver_id)
    }

    pub fn driver_response_deadline(&self) -> Option<DateTime<Utc>> {
        self.state.driver_response_deadline()
    }

    pub fn estimated_price(&self) -> f64 {
        self.quote.total
    }

    pub fn final_price(&self) -> Option<f64> {
        self.state.final_price()
    }
}

pub trait DispatchStore: Send + Sync {
    fn upsert_driver(&self, record: &DriverRecord) -> Result<(), StoreError>;

    fn delete_driver(&self, id: DriverId) -> Result<(), StoreError>;

    fn upsert_request(&self, record: &RequestRecord) -> Result<(), StoreError>;

    fn load_drivers(&self) -> Result<Vec<DriverRecord>, StoreError>;

    fn load_requests(&self) -> Result<Vec<RequestRecord>, StoreError>;
}

/// Process-local store; the default collaborator and the test double.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    drivers: Mutex<BTreeMap<DriverId, DriverRecord>>,
    requests: Mutex<BTreeMap<RequestId, RequestRecord>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn driver(&self, id: DriverId) -> Option<DriverRecord> {
        lock(&self.drivers).get(&id).cloned()
    }

    pub fn request(&self, id: RequestId) -> Option<RequestRecord> {
        lock(&self.requests).get(&id).cloned()
    }

    pub fn driver_count(&self) -> usize {
        lock(&self.drivers).len()
    }

    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn remove_request(&self, id: RequestId) -> Option<RequestRecord> {
        lock(&self.requests).remove(&id)
    }

    /// Copy of every record, ordered by id.
    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            drivers: lock(&self.drivers).values().cloned().collect(),
            requests: lock(&self.requests).values().cloned().collect(),
        }
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let store = Self::new();
        lock(&store.drivers).extend(snapshot.drivers.into_iter().map(|record| (record.id, record)));
        lock(&store.requests).extend(
            snapshot
                .requests
                .into_iter()
                .map(|record| (record.id, record)),
        );
        store
    }
}

/// Everything an [InMemoryStore] holds, in a serializable form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub drivers: Vec<DriverRecord>,
    pub requests: Vec<RequestRecord>,
}

impl StoreSnapshot {
    pub fn to_json(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        Ok(serde_json::from_str(json)?)
    }
}

impl DispatchStore for InMemoryStore {
    fn upsert_driver(&self, record: &DriverRecord) -> Result<(), StoreError> {
        lock(&self.drivers).insert(record.id, record.clone());
        Ok(())
    }

    fn delete_driver(&self, id: DriverId) -> Result<(), StoreError> {
        lock(&self.drivers).remove(&id);
        Ok(())
    }

    fn upsert_request(&self, record: &RequestRecord) -> Result<(), StoreError> {
        lock(&self.requests).insert(record.id, record.clone());
        Ok(())
    }

    fn load_drivers(&self) -> Result<Vec<DriverRecord>, StoreError> {
        Ok(lock(&self.drivers).values().cloned().collect())
    }

    fn load_requests(&self) -> Result<Vec<RequestRecord>, StoreError> {
        Ok(lock(&self.requests).values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver(n: u128) -> DriverRecord {
        DriverRecord {
            id: DriverId::from_u128(n),
            account_id: AccountId::from_u128(1000 + n),
            category: VehicleCategory::Taxi,
            vehicle: VehicleType::Sedan,
            approval: ApprovalState::Pending,
            rejection_reason: None,
            online: OnlineState::Offline,
            last_fix: None,
            current_request: None,
        }
    }

    #[test]
    fn upsert_replaces_and_delete_removes() {
        let store = InMemoryStore::new();
        store.upsert_driver(&driver(1)).unwrap();
        let mut approved = driver(1);
        approved.approval = ApprovalState::Approved;
        store.upsert_driver(&approved).unwrap();
        assert_eq!(store.driver_count(), 1);
        assert_eq!(store.driver(approved.id), Some(approved.clone()));

        store.delete_driver(approved.id).unwrap();
        assert_eq!(store.driver(approved.id), None);
        store.delete_driver(approved.id).unwrap();
    }

    #[test]
    fn snapshot_survives_json() {
        let store = InMemoryStore::new();
        store.upsert_driver(&driver(2)).unwrap();
        store.upsert_driver(&driver(1)).unwrap();

        let json = store.snapshot().to_json().unwrap();
        let restored = InMemoryStore::from_snapshot(StoreSnapshot::from_json(&json).unwrap());
        let ids: Vec<DriverId> = restored.load_drivers().unwrap().iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![DriverId::from_u128(1), DriverId::from_u128(2)]);
        assert_eq!(restored.request_count(), 0);
    }

    #[test]
    fn malformed_snapshot_is_a_serialization_error() {
        assert!(matches!(
            StoreSnapshot::from_json("{\"drivers\": 3}"),
            Err(StoreError::Serialization(_))
        ));
    }
}
