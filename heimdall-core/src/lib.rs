//! Heimdall Core - Blockchain Signal Alerting and Live Fan-Out
//!
//! Heimdall watches a stream of on-chain and infrastructure signals,
//! evaluates user-defined alerts against it, delivers notifications, and
//! fans the live feed out to subscribed clients.
//!
//! ## Architecture
//! - **Intake** validates upstream signal events into typed samples
//! - **Engine** runs each sample through per-alert state machines
//!   (Ok -> Pending -> Triggered) with sliding windows and hysteresis
//! - **Dispatch** delivers transitions over notification channels with
//!   bounded retry, per-channel backpressure, and trigger/resolve
//!   coalescing
//! - **Hub** fans events out to filtered subscribers over bounded
//!   per-connection queues with replay on reconnect
//! - **Cache** memoizes expensive lookups (baseline statistics) with
//!   TTL expiry and single-flight computation
//! - **Ratelimit** token-buckets configuration traffic per identity
//!
//! ## Core Modules
//! - `core`: Domain types (samples, transitions, topics) and errors
//! - `engine`: Alert registry, baselines, and the evaluation engine
//! - `dispatch`: Notification channels, records, and the dispatcher
//! - `hub`: Subscription hub, wire protocol, and replay buffer
//! - `monitoring`: Prometheus metrics and the scrape server

pub mod cache;
pub mod config;
pub mod core;
pub mod dispatch;
pub mod engine;
pub mod hub;
pub mod intake;
pub mod monitoring;
pub mod ratelimit;
pub mod resilience;
pub mod utils;

// Re-export the domain vocabulary
pub use crate::core::{
    AlertId, HubEvent, MetricKind, OwnerId, Severity, SignalCategory, SignalSample, Topic,
    TransitionEvent, TransitionKind,
};

// Re-export the main component surfaces
pub use cache::ResultCache;
pub use dispatch::{Dispatcher, DispatcherConfig};
pub use engine::{AlertRegistry, EngineConfig, EvaluationEngine};
pub use hub::{HubConfig, SubscriptionHub};
pub use intake::IntakeAdapter;
pub use ratelimit::{Identity, RateLimiter, RateLimiterConfig};

// Re-export error types
pub use anyhow::{Error, Result};
