//! Monitoring and observability module
//!
//! Prometheus metrics export and the HTTP server Prometheus scrapes them
//! from. Components expose cheap snapshot structs; the exporter feeds
//! those into the registered gauges.

pub mod metrics;
pub mod server;

pub use metrics::{
    CacheGauges, DispatchGauges, EngineGauges, HubGauges, IntakeGauges, LimiterGauges,
    MetricsRegistry,
};
pub use server::{MetricsServer, MetricsServerConfig};
