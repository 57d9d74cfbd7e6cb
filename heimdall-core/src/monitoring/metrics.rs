//! Prometheus metrics for the alerting pipeline
//!
//! Provides metric families for:
//! - Intake (accepted/rejected events)
//! - Evaluation (transitions, baseline failures)
//! - Dispatch (sent, failed, suppressed, retries)
//! - Hub fan-out (connections, dropped frames)
//! - Cache and rate limiter health
//!
//! Components keep their own atomic counters; an exporter task feeds
//! their snapshots into these gauges on a fixed cadence rather than
//! threading metric handles through every hot path.

use crate::cache::CacheStats;
use crate::dispatch::dispatcher::DispatcherStats;
use crate::engine::EngineStats;
use crate::hub::HubStats;
use crate::intake::IntakeStats;
use crate::ratelimit::RateLimiter;
use prometheus::{IntGauge, Registry};
use std::sync::Arc;
use tracing::info;

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGauge, prometheus::Error> {
    let g = IntGauge::new(format!("heimdall_{name}"), help)?;
    registry.register(Box::new(g.clone()))?;
    Ok(g)
}

/// Central registry for all Prometheus metrics
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Arc<Registry>,
    intake: Arc<IntakeGauges>,
    engine: Arc<EngineGauges>,
    dispatch: Arc<DispatchGauges>,
    hub: Arc<HubGauges>,
    cache: Arc<CacheGauges>,
    limiter: Arc<LimiterGauges>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Arc::new(Registry::new());

        let intake = Arc::new(IntakeGauges::new(&registry)?);
        let engine = Arc::new(EngineGauges::new(&registry)?);
        let dispatch = Arc::new(DispatchGauges::new(&registry)?);
        let hub = Arc::new(HubGauges::new(&registry)?);
        let cache = Arc::new(CacheGauges::new(&registry)?);
        let limiter = Arc::new(LimiterGauges::new(&registry)?);

        info!("Prometheus metrics registry initialized");

        Ok(Self {
            registry,
            intake,
            engine,
            dispatch,
            hub,
            cache,
            limiter,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn intake(&self) -> &IntakeGauges {
        &self.intake
    }

    pub fn engine(&self) -> &EngineGauges {
        &self.engine
    }

    pub fn dispatch(&self) -> &DispatchGauges {
        &self.dispatch
    }

    pub fn hub(&self) -> &HubGauges {
        &self.hub
    }

    pub fn cache(&self) -> &CacheGauges {
        &self.cache
    }

    pub fn limiter(&self) -> &LimiterGauges {
        &self.limiter
    }
}

pub struct IntakeGauges {
    pub accepted_total: IntGauge,
    pub rejected_total: IntGauge,
    pub transitions_total: IntGauge,
}

impl IntakeGauges {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        Ok(Self {
            accepted_total: gauge(
                registry,
                "intake_accepted_total",
                "Upstream signal events accepted",
            )?,
            rejected_total: gauge(
                registry,
                "intake_rejected_total",
                "Upstream signal events rejected as malformed or unknown",
            )?,
            transitions_total: gauge(
                registry,
                "intake_transitions_total",
                "Alert transitions produced by ingested events",
            )?,
        })
    }

    pub fn update(&self, stats: &IntakeStats) {
        self.accepted_total.set(stats.accepted as i64);
        self.rejected_total.set(stats.rejected as i64);
        self.transitions_total.set(stats.transitions as i64);
    }
}

pub struct EngineGauges {
    pub evaluations_total: IntGauge,
    pub transitions_total: IntGauge,
    pub baseline_failures_total: IntGauge,
    pub tracked_alerts: IntGauge,
}

impl EngineGauges {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        Ok(Self {
            evaluations_total: gauge(
                registry,
                "engine_evaluations_total",
                "Alert evaluations performed",
            )?,
            transitions_total: gauge(
                registry,
                "engine_transitions_total",
                "State transitions emitted by the engine",
            )?,
            baseline_failures_total: gauge(
                registry,
                "engine_baseline_failures_total",
                "Evaluations skipped because the baseline lookup failed",
            )?,
            tracked_alerts: gauge(
                registry,
                "engine_tracked_alerts",
                "Alerts with live evaluation state",
            )?,
        })
    }

    pub fn update(&self, stats: &EngineStats) {
        self.evaluations_total.set(stats.evaluations as i64);
        self.transitions_total.set(stats.transitions as i64);
        self.baseline_failures_total
            .set(stats.baseline_failures as i64);
        self.tracked_alerts.set(stats.tracked_alerts as i64);
    }
}

pub struct DispatchGauges {
    pub sent_total: IntGauge,
    pub failed_total: IntGauge,
    pub suppressed_total: IntGauge,
    pub retries_total: IntGauge,
}

impl DispatchGauges {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        Ok(Self {
            sent_total: gauge(
                registry,
                "dispatch_sent_total",
                "Notifications delivered successfully",
            )?,
            failed_total: gauge(
                registry,
                "dispatch_failed_total",
                "Notifications that exhausted their retries",
            )?,
            suppressed_total: gauge(
                registry,
                "dispatch_suppressed_total",
                "Notifications superseded before leaving the queue",
            )?,
            retries_total: gauge(registry, "dispatch_retries_total", "Delivery retry attempts")?,
        })
    }

    pub fn update(&self, stats: &DispatcherStats) {
        self.sent_total.set(stats.sent as i64);
        self.failed_total.set(stats.failed as i64);
        self.suppressed_total.set(stats.suppressed as i64);
        self.retries_total.set(stats.retries as i64);
    }
}

pub struct HubGauges {
    pub connections: IntGauge,
    pub published_total: IntGauge,
    pub enqueued_total: IntGauge,
    pub dropped_total: IntGauge,
}

impl HubGauges {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        Ok(Self {
            connections: gauge(registry, "hub_connections", "Live subscriber connections")?,
            published_total: gauge(registry, "hub_published_total", "Events published")?,
            enqueued_total: gauge(
                registry,
                "hub_enqueued_total",
                "Frames enqueued across all connections",
            )?,
            dropped_total: gauge(
                registry,
                "hub_dropped_total",
                "Frames dropped to slow-consumer queue overflow",
            )?,
        })
    }

    pub fn update(&self, stats: &HubStats) {
        self.connections.set(stats.connections as i64);
        self.published_total.set(stats.published as i64);
        self.enqueued_total.set(stats.enqueued as i64);
        self.dropped_total.set(stats.dropped as i64);
    }
}

pub struct CacheGauges {
    pub hits_total: IntGauge,
    pub misses_total: IntGauge,
    pub coalesced_total: IntGauge,
    pub invalidations_total: IntGauge,
    pub entries: IntGauge,
}

impl CacheGauges {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        Ok(Self {
            hits_total: gauge(registry, "cache_hits_total", "Cache hits")?,
            misses_total: gauge(registry, "cache_misses_total", "Cache misses")?,
            coalesced_total: gauge(
                registry,
                "cache_coalesced_total",
                "Lookups that waited on an in-flight computation",
            )?,
            invalidations_total: gauge(
                registry,
                "cache_invalidations_total",
                "Explicit invalidations",
            )?,
            entries: gauge(registry, "cache_entries", "Completed entries resident")?,
        })
    }

    pub fn update(&self, stats: &CacheStats) {
        self.hits_total.set(stats.hits as i64);
        self.misses_total.set(stats.misses as i64);
        self.coalesced_total.set(stats.coalesced as i64);
        self.invalidations_total.set(stats.invalidations as i64);
        self.entries.set(stats.entries as i64);
    }
}

pub struct LimiterGauges {
    pub allowed_total: IntGauge,
    pub denied_total: IntGauge,
    pub tracked_identities: IntGauge,
}

impl LimiterGauges {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        Ok(Self {
            allowed_total: gauge(registry, "ratelimit_allowed_total", "Requests permitted")?,
            denied_total: gauge(registry, "ratelimit_denied_total", "Requests denied")?,
            tracked_identities: gauge(
                registry,
                "ratelimit_tracked_identities",
                "Identities with live token buckets",
            )?,
        })
    }

    pub fn update(&self, limiter: &RateLimiter) {
        self.allowed_total.set(limiter.total_allowed() as i64);
        self.denied_total.set(limiter.total_denied() as i64);
        self.tracked_identities
            .set(limiter.tracked_identities() as i64);
    }
}
