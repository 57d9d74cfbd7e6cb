//! Core domain types and error taxonomy

pub mod errors;
pub mod types;

pub use errors::{
    CacheComputeError, CapacityExceeded, ConfigurationError, ConnectionLost, DispatchError,
    IntakeError,
};
pub use types::{
    AlertId, HubEvent, MetricKind, OwnerId, Severity, SignalCategory, SignalSample, Topic,
    TransitionEvent, TransitionKind,
};
