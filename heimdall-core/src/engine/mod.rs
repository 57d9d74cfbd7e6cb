//! Alert evaluation engine
//!
//! ```text
//!  SignalSample ──► enabled configs for metric ──► threshold resolution
//!                                                  (absolute | baseline)
//!                                                        │
//!                                        per-alert state machine
//!                                     Ok ──► Pending ──► Triggered
//!                                                        │
//!                                     TransitionEvent + channel targets
//! ```
//!
//! Evaluation reads a snapshot of each configuration, so a concurrent
//! update never produces a torn read; the new version applies from the
//! next sample onward. Baseline thresholds resolve through the
//! single-flight cache before the per-alert state lock is taken, so no
//! lock is held across an await point.

pub mod baseline;
pub mod registry;
pub mod state;

pub use baseline::{BaselineProvider, BaselineStat, BaselineStats, CachedBaselines};
pub use registry::{AlertConfiguration, AlertRegistry, AlertUpdate, NewAlert, Threshold};
pub use state::{
    AlertState, AlertStatus, Comparison, EvaluationWindow, WindowAggregate, CMP_EPSILON,
};

use crate::core::errors::ConfigurationError;
use crate::core::types::{AlertId, OwnerId, SignalSample, TransitionEvent};
use crate::dispatch::channel::ChannelTarget;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Engine tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Floor between repeat notifications while an alert stays Triggered
    pub min_renotify_interval: Duration,
    /// Baseline statistics freshness
    pub baseline_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_renotify_interval: Duration::from_secs(60),
            baseline_ttl: Duration::from_secs(60),
        }
    }
}

/// A transition the engine decided the outside world must hear about,
/// paired with where to send it
#[derive(Debug, Clone)]
pub struct EngineOutput {
    pub event: TransitionEvent,
    pub channels: Vec<ChannelTarget>,
}

/// Point-in-time engine counters
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct EngineStats {
    pub evaluations: u64,
    pub transitions: u64,
    pub baseline_failures: u64,
    pub tracked_alerts: usize,
}

pub struct EvaluationEngine {
    config: EngineConfig,
    registry: Arc<AlertRegistry>,
    states: DashMap<AlertId, AlertState>,
    baselines: Option<CachedBaselines>,
    evaluations: AtomicU64,
    transitions: AtomicU64,
    baseline_failures: AtomicU64,
}

impl EvaluationEngine {
    pub fn new(config: EngineConfig, registry: Arc<AlertRegistry>) -> Self {
        Self {
            config,
            registry,
            states: DashMap::new(),
            baselines: None,
            evaluations: AtomicU64::new(0),
            transitions: AtomicU64::new(0),
            baseline_failures: AtomicU64::new(0),
        }
    }

    /// Attach a historical store for baseline-relative thresholds
    pub fn with_baselines(mut self, provider: Arc<dyn BaselineProvider>) -> Self {
        self.baselines = Some(CachedBaselines::new(provider, self.config.baseline_ttl));
        self
    }

    pub fn registry(&self) -> &Arc<AlertRegistry> {
        &self.registry
    }

    pub fn baselines(&self) -> Option<&CachedBaselines> {
        self.baselines.as_ref()
    }

    /// Run one sample through every enabled alert watching its metric.
    /// Returns the transitions that fired, ready for dispatch and fan-out.
    pub async fn evaluate_sample(&self, sample: &SignalSample) -> Vec<EngineOutput> {
        let configs = self.registry.enabled_for_metric(sample.metric);
        let mut outputs = Vec::new();

        for config in configs {
            self.evaluations.fetch_add(1, Ordering::Relaxed);
            // Resolve before touching the state entry so nothing is held
            // across the cache await
            let threshold = match self.effective_threshold(&config).await {
                Some(t) => t,
                None => continue,
            };
            let renotify_ms = self.renotify_interval_ms(&config.window);

            let transition = {
                let mut state = self.states.entry(config.id).or_default();
                state.observe(
                    config.window,
                    config.aggregate,
                    config.op,
                    threshold,
                    sample,
                    renotify_ms,
                )
            };

            if let Some(kind) = transition {
                self.transitions.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "{} {} on {} at value {} (threshold {})",
                    config.id,
                    kind.as_str(),
                    config.metric,
                    sample.value,
                    threshold
                );
                outputs.push(EngineOutput {
                    event: TransitionEvent {
                        alert_id: config.id,
                        owner: config.owner.clone(),
                        kind,
                        metric: config.metric,
                        severity: config.severity,
                        value: sample.value,
                        threshold,
                        block_height: sample.block_height,
                        observed_at_ms: sample.observed_at_ms,
                    },
                    channels: config.channels,
                });
            }
        }
        outputs
    }

    async fn effective_threshold(&self, config: &AlertConfiguration) -> Option<f64> {
        match config.threshold {
            Threshold::Absolute { value } => Some(value),
            Threshold::BaselineOffset { stat, percent } => {
                let baselines = match &self.baselines {
                    Some(b) => b,
                    None => {
                        warn!("{} needs baselines but no provider is attached", config.id);
                        self.baseline_failures.fetch_add(1, Ordering::Relaxed);
                        return None;
                    }
                };
                match baselines.get(config.metric).await {
                    Ok(stats) => Some(stats.stat(stat) * (1.0 + percent / 100.0)),
                    Err(err) => {
                        // Skip this evaluation rather than fire on garbage
                        warn!("{} baseline lookup failed: {}", config.id, err);
                        self.baseline_failures.fetch_add(1, Ordering::Relaxed);
                        None
                    }
                }
            }
        }
    }

    /// Duration windows stretch the renotify floor so an alert is never
    /// re-announced faster than its own window closes
    fn renotify_interval_ms(&self, window: &EvaluationWindow) -> u64 {
        let floor = self.config.min_renotify_interval.as_millis() as u64;
        match *window {
            EvaluationWindow::Samples(_) => floor,
            EvaluationWindow::Duration { ms } => ms.max(floor),
        }
    }

    // Write operations delegate to the registry and keep evaluation state
    // in step. Any definition change restarts that alert's window from
    // scratch; a half-old, half-new window would be meaningless.

    pub fn create_alert(
        &self,
        owner: OwnerId,
        new: NewAlert,
    ) -> Result<AlertConfiguration, ConfigurationError> {
        let config = self.registry.create(owner, new)?;
        self.states.insert(config.id, AlertState::new());
        Ok(config)
    }

    pub fn update_alert(
        &self,
        id: AlertId,
        owner: &OwnerId,
        update: AlertUpdate,
    ) -> Result<AlertConfiguration, ConfigurationError> {
        let config = self.registry.update(id, owner, update)?;
        self.states.insert(id, AlertState::new());
        Ok(config)
    }

    pub fn delete_alert(&self, id: AlertId, owner: &OwnerId) -> Result<(), ConfigurationError> {
        self.registry.delete(id, owner)?;
        self.states.remove(&id);
        Ok(())
    }

    pub fn set_enabled(
        &self,
        id: AlertId,
        owner: &OwnerId,
        enabled: bool,
    ) -> Result<AlertConfiguration, ConfigurationError> {
        let config = self.registry.set_enabled(id, owner, enabled)?;
        if !enabled {
            self.states.remove(&id);
        }
        Ok(config)
    }

    /// Current lifecycle status, Ok for untracked alerts
    pub fn status(&self, id: AlertId) -> AlertStatus {
        self.states
            .get(&id)
            .map(|s| s.status)
            .unwrap_or(AlertStatus::Ok)
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            evaluations: self.evaluations.load(Ordering::Relaxed),
            transitions: self.transitions.load(Ordering::Relaxed),
            baseline_failures: self.baseline_failures.load(Ordering::Relaxed),
            tracked_alerts: self.states.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{MetricKind, Severity, TransitionKind};
    use crate::dispatch::channel::ChannelKind;
    use async_trait::async_trait;

    fn sample(value: f64, n: u64) -> SignalSample {
        SignalSample::new(MetricKind::CpuUsage, value, n, n * 1000)
    }

    fn cpu_alert(threshold: Threshold) -> NewAlert {
        NewAlert {
            metric: MetricKind::CpuUsage,
            op: Comparison::Gt,
            threshold,
            window: EvaluationWindow::Samples(3),
            aggregate: WindowAggregate::Each,
            severity: Severity::Warning,
            channels: vec![ChannelTarget::new(ChannelKind::Email, "ops@example.com")],
            enabled: true,
        }
    }

    fn engine() -> EvaluationEngine {
        EvaluationEngine::new(EngineConfig::default(), Arc::new(AlertRegistry::new()))
    }

    #[tokio::test]
    async fn test_sustained_breach_triggers_once() {
        let engine = engine();
        let config = engine
            .create_alert(
                OwnerId::new("alice"),
                cpu_alert(Threshold::Absolute { value: 80.0 }),
            )
            .unwrap();

        assert!(engine.evaluate_sample(&sample(85.0, 1)).await.is_empty());
        assert!(engine.evaluate_sample(&sample(82.0, 2)).await.is_empty());
        let out = engine.evaluate_sample(&sample(90.0, 3)).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].event.kind, TransitionKind::Triggered);
        assert_eq!(out[0].event.alert_id, config.id);
        assert_eq!(out[0].channels.len(), 1);
        assert_eq!(engine.status(config.id), AlertStatus::Triggered);
    }

    #[tokio::test]
    async fn test_interrupted_breach_stays_quiet() {
        let engine = engine();
        engine
            .create_alert(
                OwnerId::new("alice"),
                cpu_alert(Threshold::Absolute { value: 80.0 }),
            )
            .unwrap();

        for (i, v) in [85.0, 70.0, 90.0].iter().enumerate() {
            let out = engine.evaluate_sample(&sample(*v, i as u64 + 1)).await;
            assert!(out.is_empty(), "no transition for sample {v}");
        }
    }

    #[tokio::test]
    async fn test_resolve_emitted_on_recovery() {
        let engine = engine();
        engine
            .create_alert(
                OwnerId::new("alice"),
                cpu_alert(Threshold::Absolute { value: 80.0 }),
            )
            .unwrap();

        for n in 1..=3 {
            engine.evaluate_sample(&sample(90.0, n)).await;
        }
        let out = engine.evaluate_sample(&sample(50.0, 4)).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].event.kind, TransitionKind::Resolved);
    }

    struct FixedBaseline;

    #[async_trait]
    impl BaselineProvider for FixedBaseline {
        async fn baseline(&self, _metric: MetricKind) -> anyhow::Result<BaselineStats> {
            Ok(BaselineStats {
                mean: 100.0,
                median: 100.0,
                std_dev: 5.0,
                p95: 110.0,
                p99: 115.0,
            })
        }
    }

    #[tokio::test]
    async fn test_baseline_offset_threshold_resolution() {
        let engine = EvaluationEngine::new(EngineConfig::default(), Arc::new(AlertRegistry::new()))
            .with_baselines(Arc::new(FixedBaseline));
        let mut alert = cpu_alert(Threshold::BaselineOffset {
            stat: BaselineStat::Mean,
            percent: 20.0,
        });
        alert.window = EvaluationWindow::Samples(1);
        engine.create_alert(OwnerId::new("alice"), alert).unwrap();

        // Effective threshold is 120; 115 stays quiet, 125 fires
        assert!(engine.evaluate_sample(&sample(115.0, 1)).await.is_empty());
        let out = engine.evaluate_sample(&sample(125.0, 2)).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].event.threshold, 120.0);
    }

    struct BrokenBaseline;

    #[async_trait]
    impl BaselineProvider for BrokenBaseline {
        async fn baseline(&self, _metric: MetricKind) -> anyhow::Result<BaselineStats> {
            anyhow::bail!("historical store offline")
        }
    }

    #[tokio::test]
    async fn test_baseline_failure_skips_evaluation() {
        let engine = EvaluationEngine::new(EngineConfig::default(), Arc::new(AlertRegistry::new()))
            .with_baselines(Arc::new(BrokenBaseline));
        let mut alert = cpu_alert(Threshold::BaselineOffset {
            stat: BaselineStat::Mean,
            percent: 20.0,
        });
        alert.window = EvaluationWindow::Samples(1);
        engine.create_alert(OwnerId::new("alice"), alert).unwrap();

        let out = engine.evaluate_sample(&sample(999.0, 1)).await;
        assert!(out.is_empty());
        assert_eq!(engine.stats().baseline_failures, 1);
    }

    #[tokio::test]
    async fn test_update_resets_window_state() {
        let engine = engine();
        let config = engine
            .create_alert(
                OwnerId::new("alice"),
                cpu_alert(Threshold::Absolute { value: 80.0 }),
            )
            .unwrap();

        // Two breaches accumulated, then the definition changes
        engine.evaluate_sample(&sample(85.0, 1)).await;
        engine.evaluate_sample(&sample(85.0, 2)).await;
        engine
            .update_alert(
                config.id,
                &OwnerId::new("alice"),
                AlertUpdate {
                    op: Comparison::Gt,
                    threshold: Threshold::Absolute { value: 80.0 },
                    window: EvaluationWindow::Samples(3),
                    aggregate: WindowAggregate::Each,
                    severity: Severity::Warning,
                    channels: config.channels.clone(),
                    enabled: true,
                    expected_version: config.version,
                },
            )
            .unwrap();

        // The old partial window no longer counts
        assert!(engine.evaluate_sample(&sample(85.0, 3)).await.is_empty());
        assert!(engine.evaluate_sample(&sample(85.0, 4)).await.is_empty());
        assert_eq!(engine.evaluate_sample(&sample(85.0, 5)).await.len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_alert_not_evaluated() {
        let engine = engine();
        let mut alert = cpu_alert(Threshold::Absolute { value: 80.0 });
        alert.window = EvaluationWindow::Samples(1);
        let config = engine.create_alert(OwnerId::new("alice"), alert).unwrap();
        engine
            .set_enabled(config.id, &OwnerId::new("alice"), false)
            .unwrap();

        assert!(engine.evaluate_sample(&sample(999.0, 1)).await.is_empty());
    }
}
