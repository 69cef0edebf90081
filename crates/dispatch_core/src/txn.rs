//! Staged changes of a single dispatch operation.
//!
//! Operations read through a [Txn], which copies the records they touch out of
//! the world and lets them be mutated freely. Nothing reaches the world until
//! [Txn::commit]: every changed record is written to the store first and only
//! applied in memory once the store accepted all of them. Timers and
//! notifications are released after the apply.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use bevy_ecs::prelude::World;
use chrono::{DateTime, Utc};
use tracing::error;

use crate::clock::{DeadlineQueue, Event};
use crate::error::{DispatchError, DispatchResult};
use crate::lifecycle;
use crate::model::{DriverId, RequestId};
use crate::notify::{Notification, Notifier};
use crate::registry;
use crate::store::{DispatchStore, DriverRecord, RequestRecord, StoreError};

/// How a driver looks from inside a transaction.
#[derive(Debug, Clone, Copy)]
pub enum Staged<'a> {
    /// Not touched; the world is authoritative.
    Untouched,
    Changed(&'a DriverRecord),
    Deleted,
}

#[derive(Debug)]
pub struct Txn {
    now: DateTime<Utc>,
    drivers: BTreeMap<DriverId, DriverRecord>,
    deleted_drivers: BTreeSet<DriverId>,
    requests: BTreeMap<RequestId, RequestRecord>,
    timers: Vec<Event>,
    notifications: Vec<Notification>,
}

impl Txn {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            drivers: BTreeMap::new(),
            deleted_drivers: BTreeSet::new(),
            requests: BTreeMap::new(),
            timers: Vec::new(),
            notifications: Vec::new(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Stage a driver for mutation.
    pub fn driver(&mut self, world: &World, id: DriverId) -> DispatchResult<&mut DriverRecord> {
        if self.deleted_drivers.contains(&id) {
            return Err(DispatchError::driver_not_found(id));
        }
        match self.drivers.entry(id) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let record = registry::load_driver(world, id)
                    .ok_or_else(|| DispatchError::driver_not_found(id))?;
                Ok(entry.insert(record))
            }
        }
    }

    /// Stage a request for mutation. Its `updated_at` moves to the txn time.
    pub fn request(&mut self, world: &World, id: RequestId) -> DispatchResult<&mut RequestRecord> {
        match self.requests.entry(id) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let mut record = lifecycle::load_request(world, id)
                    .ok_or_else(|| DispatchError::request_not_found(id))?;
                record.updated_at = self.now;
                Ok(entry.insert(record))
            }
        }
    }

    pub fn insert_driver(&mut self, record: DriverRecord) {
        self.deleted_drivers.remove(&record.id);
        self.drivers.insert(record.id, record);
    }

    pub fn insert_request(&mut self, record: RequestRecord) {
        self.requests.insert(record.id, record);
    }

    pub fn delete_driver(&mut self, id: DriverId) {
        self.drivers.remove(&id);
        self.deleted_drivers.insert(id);
    }

    pub fn staged_driver(&self, id: DriverId) -> Staged<'_> {
        if self.deleted_drivers.contains(&id) {
            return Staged::Deleted;
        }
        match self.drivers.get(&id) {
            Some(record) => Staged::Changed(record),
            None => Staged::Untouched,
        }
    }

    pub fn schedule(&mut self, event: Event) {
        self.timers.push(event);
    }

    pub fn notify(&mut self, notification: Notification) {
        self.notifications.push(notification);
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty() && self.deleted_drivers.is_empty() && self.requests.is_empty()
    }

    /// Records are written one by one; a driver left holding an unsaved request
    /// is released when the engine is next built.
    fn persist(&self, store: &dyn DispatchStore) -> Result<(), StoreError> {
        for record in self.drivers.values() {
            store.upsert_driver(record)?;
        }
        for id in &self.deleted_drivers {
            store.delete_driver(*id)?;
        }
        for record in self.requests.values() {
            store.upsert_request(record)?;
        }
        Ok(())
    }

    /// Persist, then apply to the world, then release timers and notifications.
    ///
    /// On a store failure the world is left exactly as it was.
    pub fn commit(
        self,
        world: &mut World,
        store: &dyn DispatchStore,
        notifier: &dyn Notifier,
    ) -> DispatchResult<()> {
        if let Err(error) = self.persist(store) {
            error!(
                %error,
                drivers = self.drivers.len(),
                requests = self.requests.len(),
                "persisting dispatch changes failed"
            );
            return Err(error.into());
        }

        for record in self.drivers.values() {
            registry::apply_driver(world, record);
        }
        for id in &self.deleted_drivers {
            registry::despawn_driver(world, *id);
        }
        for record in self.requests.values() {
            lifecycle::apply_request(world, record);
        }

        let mut queue = world.resource_mut::<DeadlineQueue>();
        for event in self.timers {
            queue.schedule(event);
        }
        for notification in &self.notifications {
            notifier.notify(notification);
        }
        Ok(())
    }
}
