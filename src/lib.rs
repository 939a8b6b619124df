//! modgate - module and feature status engine
//!
//! Answers "is this module active / is this feature enabled" from a tiered
//! cache (memory, durable, verification results) kept coherent with a remote
//! authoritative store and with sibling execution contexts.
//!
//! Protected modules always resolve active, on every path.

pub mod cache;
pub mod cli;
pub mod clock;
pub mod config;
pub mod engine;
pub mod errors;
pub mod gateway;
pub mod guard;
pub mod model;
pub mod observability;
pub mod sync;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use engine::{EngineState, Resolution, StatusEngine};
pub use errors::{StatusError, StatusResult};
pub use guard::{InvariantGuard, RequestedValue};
pub use model::{FeatureKey, FeatureRecord, ModuleRecord, ModuleStatus, SyncMessage};
