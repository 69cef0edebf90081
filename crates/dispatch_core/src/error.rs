//! Error types for dispatch operations.
//!
//! Every error is scoped to the single operation that raised it. None of them
//! are retried by the engine; retry is a caller decision.

use thiserror::Error;

use crate::model::RequestId;
use crate::store::StoreError;

/// Kind of entity an operation failed to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Driver,
    Request,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Driver => f.write_str("driver"),
            EntityKind::Request => f.write_str("request"),
        }
    }
}

/// Errors that can occur in dispatch operations.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Driver or request absent
    #[error("{entity} not found: {id}")]
    NotFound { entity: EntityKind, id: String },

    /// Caller is not the owner / offered driver / an admin
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Transition attempted from a state that disallows it
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Matching found no eligible driver; the request was cancelled
    #[error("no drivers available for request {request_id}")]
    NoDriversAvailable { request_id: RequestId },

    /// Malformed coordinates, unknown category/status strings, bad payloads
    #[error("validation failed: {0}")]
    Validation(String),

    /// The persistence collaborator refused a write
    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),
}

impl DispatchError {
    pub fn driver_not_found(id: impl ToString) -> Self {
        DispatchError::NotFound {
            entity: EntityKind::Driver,
            id: id.to_string(),
        }
    }

    pub fn request_not_found(id: impl ToString) -> Self {
        DispatchError::NotFound {
            entity: EntityKind::Request,
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        DispatchError::Validation(message.into())
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        DispatchError::InvalidState(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        DispatchError::Forbidden(message.into())
    }
}

/// Result type for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;
