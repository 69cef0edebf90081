//! Write-through JSON file store.
//!
//! Every write rewrites the whole snapshot (temp file plus rename). A failed
//! file write rolls the in-memory copy back, so the file and what
//! `load_*` returns never disagree.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use dispatch_core::model::{DriverId, RequestId};
use dispatch_core::store::{
    DispatchStore, DriverRecord, InMemoryStore, RequestRecord, StoreError, StoreSnapshot,
};
use tracing::{debug, info};

#[derive(Debug)]
pub struct SnapshotStore {
    path: PathBuf,
    records: InMemoryStore,
    write: Mutex<()>,
}

fn unavailable(path: &Path, action: &str, error: std::io::Error) -> StoreError {
    StoreError::Unavailable(format!("{action} {}: {error}", path.display()))
}

impl SnapshotStore {
    /// Open `path`, starting empty if it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let records = match fs::read_to_string(&path) {
            Ok(json) => InMemoryStore::from_snapshot(StoreSnapshot::from_json(&json)?),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => InMemoryStore::new(),
            Err(error) => return Err(unavailable(&path, "reading", error)),
        };
        info!(
            path = %path.display(),
            drivers = records.driver_count(),
            requests = records.request_count(),
            "snapshot store opened"
        );
        Ok(Self {
            path,
            records,
            write: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<(), StoreError> {
        let json = self.records.snapshot().to_json()?;
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, json).map_err(|error| unavailable(&staging, "writing", error))?;
        fs::rename(&staging, &self.path)
            .map_err(|error| unavailable(&self.path, "replacing", error))?;
        debug!(path = %self.path.display(), "snapshot flushed");
        Ok(())
    }

    fn restore_driver(
        &self,
        id: DriverId,
        previous: Option<DriverRecord>,
    ) -> Result<(), StoreError> {
        match previous {
            Some(record) => self.records.upsert_driver(&record),
            None => self.records.delete_driver(id),
        }
    }

    fn restore_request(
        &self,
        id: RequestId,
        previous: Option<RequestRecord>,
    ) -> Result<(), StoreError> {
        match previous {
            Some(record) => self.records.upsert_request(&record),
            None => {
                self.records.remove_request(id);
                Ok(())
            }
        }
    }
}

impl DispatchStore for SnapshotStore {
    fn upsert_driver(&self, record: &DriverRecord) -> Result<(), StoreError> {
        let _guard = self.write.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = self.records.driver(record.id);
        self.records.upsert_driver(record)?;
        self.flush().or_else(|error| {
            self.restore_driver(record.id, previous)?;
            Err(error)
        })
    }

    fn delete_driver(&self, id: DriverId) -> Result<(), StoreError> {
        let _guard = self.write.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = self.records.driver(id);
        self.records.delete_driver(id)?;
        self.flush().or_else(|error| {
            self.restore_driver(id, previous)?;
            Err(error)
        })
    }

    fn upsert_request(&self, record: &RequestRecord) -> Result<(), StoreError> {
        let _guard = self.write.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = self.records.request(record.id);
        self.records.upsert_request(record)?;
        self.flush().or_else(|error| {
            self.restore_request(record.id, previous)?;
            Err(error)
        })
    }

    fn load_drivers(&self) -> Result<Vec<DriverRecord>, StoreError> {
        self.records.load_drivers()
    }

    fn load_requests(&self) -> Result<Vec<RequestRecord>, StoreError> {
        self.records.load_requests()
    }
}
