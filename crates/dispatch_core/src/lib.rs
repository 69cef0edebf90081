//! Driver dispatch and matching engine.
//!
//! Drivers report availability and position; requests (rides and deliveries)
//! are priced, offered to the nearest eligible driver for a bounded window,
//! reassigned on rejection or expiry, and driven through
//! `pending → matched → in_progress → completed`.
//!
//! Entry point: [engine::DispatchEngine].

pub mod clock;
pub mod config;
pub mod ecs;
pub mod engine;
pub mod error;
pub mod geo;
pub mod identity;
pub mod lifecycle;
pub mod matching;
pub mod model;
pub mod notify;
pub mod pricing;
pub mod registry;
pub mod request;
pub mod runner;
pub mod store;
pub mod systems;
pub mod txn;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use config::DispatchConfig;
pub use engine::{DispatchEngine, DispatchEngineBuilder, DriverStatus};
pub use error::{DispatchError, DispatchResult};
