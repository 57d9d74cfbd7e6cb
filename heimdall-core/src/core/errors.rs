//! Error taxonomy for the alerting core
//!
//! The policy split matters more than the types themselves:
//! - transient upstream conditions are retried with bounded backoff and
//!   surfaced as a `Failed` record when exhausted
//! - malformed configurations are rejected at write time and never reach
//!   evaluation
//! - unknown metrics drop the sample, bump a counter, and nothing else
//! - capacity denials carry retry guidance and never lose admitted work
//! - a lost connection cleans up locally and is not an error anywhere else

use crate::core::types::{AlertId, MetricKind};
use std::time::Duration;
use thiserror::Error;

/// Failures normalizing raw upstream events at intake
#[derive(Debug, Clone, Error, PartialEq)]
pub enum IntakeError {
    /// Metric string not in the known set. Non-fatal: dropped and counted.
    #[error("unknown metric '{name}'")]
    UnknownMetric { name: String },

    /// NaN/infinite values are never valid observations
    #[error("non-finite value {value} for metric {metric}")]
    NonFiniteValue { metric: MetricKind, value: f64 },
}

/// Write-time rejection of a malformed alert configuration
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigurationError {
    #[error("threshold must be finite, got {value}")]
    NonFiniteThreshold { value: f64 },

    #[error("evaluation window must be non-empty")]
    EmptyWindow,

    #[error("enabled alert must have at least one notification channel")]
    NoChannels,

    #[error("baseline offset percent must be finite, got {percent}")]
    NonFinitePercent { percent: f64 },

    #[error("alert {id} not found")]
    NotFound { id: AlertId },

    #[error("owner '{owner}' does not own alert {id}")]
    NotOwner { id: AlertId, owner: String },

    #[error("version conflict on alert {id}: expected {expected}, current {current}")]
    VersionConflict { id: AlertId, expected: u64, current: u64 },
}

/// Rate-limiter denial. Never blocks; carries guidance for the caller.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("capacity exceeded for '{identity}', retry after {retry_after:?}")]
pub struct CapacityExceeded {
    pub identity: String,
    pub retry_after: Duration,
}

/// Failures in the notification delivery path
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DispatchError {
    /// A single channel send failed. Retryable.
    #[error("channel '{channel}' send failed: {reason}")]
    ChannelSend { channel: String, reason: String },

    /// All retry attempts exhausted. Terminal: recorded as Failed.
    #[error("channel '{channel}' exhausted {attempts} attempts for alert {alert_id}")]
    RetriesExhausted {
        channel: String,
        alert_id: AlertId,
        attempts: u32,
    },
}

/// A subscriber's transport went away. Strictly local: the hub tears down
/// that one connection and nothing else.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("connection lost")]
pub struct ConnectionLost;

/// Failure propagated to all single-flight waiters of a cache key.
///
/// The underlying error is flattened to a message so every waiter can own
/// a copy; the computing caller keeps the original.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("cached computation for '{key}' failed: {message}")]
pub struct CacheComputeError {
    pub key: String,
    pub message: String,
}
