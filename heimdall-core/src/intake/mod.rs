//! Signal intake: normalize upstream events and drive the pipeline
//!
//! The upstream signal pipeline speaks loosely typed events (metric as a
//! string, values unchecked). Intake validates each event into a
//! [`SignalSample`], publishes it to the live feed, runs the evaluation
//! engine, and hands any resulting transitions to the dispatcher.
//! Malformed input is rejected and counted, never silently coerced.
//!
//! Dispatch happens inline, so channel backpressure propagates to the
//! caller: a saturated channel slows intake instead of growing an
//! unbounded backlog.

use crate::core::errors::{ConfigurationError, IntakeError};
use crate::core::types::{AlertId, HubEvent, MetricKind, OwnerId, SignalSample, TransitionEvent};
use crate::dispatch::dispatcher::Dispatcher;
use crate::engine::{AlertConfiguration, EvaluationEngine};
use crate::hub::SubscriptionHub;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Wire shape of one upstream signal event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSignalEvent {
    pub metric: String,
    pub value: f64,
    pub block_height: u64,
    pub observed_at_ms: u64,
}

/// Validate an upstream event into a typed sample
pub fn normalize(raw: &RawSignalEvent) -> Result<SignalSample, IntakeError> {
    let metric = MetricKind::parse(&raw.metric).ok_or_else(|| IntakeError::UnknownMetric {
        name: raw.metric.clone(),
    })?;
    if !raw.value.is_finite() {
        return Err(IntakeError::NonFiniteValue {
            metric,
            value: raw.value,
        });
    }
    Ok(SignalSample::new(
        metric,
        raw.value,
        raw.block_height,
        raw.observed_at_ms,
    ))
}

/// Point-in-time intake counters
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct IntakeStats {
    pub accepted: u64,
    pub rejected: u64,
    pub transitions: u64,
}

/// Entry point wiring engine, hub, and dispatcher together
pub struct IntakeAdapter {
    engine: Arc<EvaluationEngine>,
    hub: Arc<SubscriptionHub>,
    dispatcher: Arc<Dispatcher>,
    accepted: AtomicU64,
    rejected: AtomicU64,
    transitions: AtomicU64,
}

impl IntakeAdapter {
    pub fn new(
        engine: Arc<EvaluationEngine>,
        hub: Arc<SubscriptionHub>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            engine,
            hub,
            dispatcher,
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            transitions: AtomicU64::new(0),
        }
    }

    pub fn engine(&self) -> &Arc<EvaluationEngine> {
        &self.engine
    }

    pub fn hub(&self) -> &Arc<SubscriptionHub> {
        &self.hub
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Process one upstream event end to end. Returns the transitions it
    /// caused, after their notifications have been recorded.
    pub async fn ingest(&self, raw: RawSignalEvent) -> anyhow::Result<Vec<TransitionEvent>> {
        let sample = match normalize(&raw) {
            Ok(sample) => sample,
            Err(err) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                warn!("rejected upstream event: {err}");
                return Err(err.into());
            }
        };
        self.accepted.fetch_add(1, Ordering::Relaxed);

        self.hub.publish(HubEvent::Signal(sample));
        let outputs = self.engine.evaluate_sample(&sample).await;

        let mut events = Vec::with_capacity(outputs.len());
        for output in outputs {
            self.transitions.fetch_add(1, Ordering::Relaxed);
            self.hub.publish(HubEvent::Alert(output.event.clone()));
            self.dispatcher
                .dispatch(&output.event, &output.channels)
                .await?;
            events.push(output.event);
        }
        Ok(events)
    }

    /// Deleting an alert clears every piece of runtime state attached
    /// to it, the dispatcher's coalescing entry included.
    pub fn remove_alert(&self, id: AlertId, owner: &OwnerId) -> Result<(), ConfigurationError> {
        self.engine.delete_alert(id, owner)?;
        self.dispatcher.forget_alert(id);
        Ok(())
    }

    pub fn set_alert_enabled(
        &self,
        id: AlertId,
        owner: &OwnerId,
        enabled: bool,
    ) -> Result<AlertConfiguration, ConfigurationError> {
        let config = self.engine.set_enabled(id, owner, enabled)?;
        if !enabled {
            self.dispatcher.forget_alert(id);
        }
        Ok(config)
    }

    pub fn stats(&self) -> IntakeStats {
        IntakeStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            transitions: self.transitions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Severity;
    use crate::dispatch::channel::{ChannelKind, ChannelTarget, LogChannel};
    use crate::dispatch::dispatcher::DispatcherConfig;
    use crate::dispatch::record::InMemoryRecordStore;
    use crate::engine::state::{Comparison, EvaluationWindow, WindowAggregate};
    use crate::engine::{AlertRegistry, EngineConfig, NewAlert, Threshold};
    use crate::hub::{ConnectionRegistry, HubConfig};

    fn raw(metric: &str, value: f64) -> RawSignalEvent {
        RawSignalEvent {
            metric: metric.to_string(),
            value,
            block_height: 10,
            observed_at_ms: 10_000,
        }
    }

    #[test]
    fn test_normalize_accepts_known_metric() {
        let sample = normalize(&raw("mempool_depth", 42.0)).unwrap();
        assert_eq!(sample.metric, MetricKind::MempoolDepth);
        assert_eq!(sample.value, 42.0);
    }

    #[test]
    fn test_normalize_rejects_unknown_metric() {
        let err = normalize(&raw("gas_price", 1.0)).unwrap_err();
        assert!(matches!(err, IntakeError::UnknownMetric { .. }));
    }

    #[test]
    fn test_normalize_rejects_non_finite_values() {
        assert!(matches!(
            normalize(&raw("cpu_usage", f64::NAN)),
            Err(IntakeError::NonFiniteValue { .. })
        ));
        assert!(matches!(
            normalize(&raw("cpu_usage", f64::INFINITY)),
            Err(IntakeError::NonFiniteValue { .. })
        ));
    }

    #[tokio::test]
    async fn test_remove_alert_clears_engine_and_dispatch_state() {
        let registry = Arc::new(AlertRegistry::new());
        let engine = Arc::new(EvaluationEngine::new(EngineConfig::default(), registry));
        let hub = Arc::new(crate::hub::SubscriptionHub::new(
            HubConfig::default(),
            ConnectionRegistry::new(),
        ));
        let dispatcher = Arc::new(
            Dispatcher::new(
                DispatcherConfig::default(),
                Arc::new(InMemoryRecordStore::new()),
            )
            .with_channel(Arc::new(LogChannel::new(ChannelKind::Webhook))),
        );
        let intake = IntakeAdapter::new(engine.clone(), hub, dispatcher.clone());

        let owner = OwnerId::new("ops");
        let config = engine
            .create_alert(
                owner.clone(),
                NewAlert {
                    metric: MetricKind::CpuUsage,
                    op: Comparison::Gt,
                    threshold: Threshold::Absolute { value: 80.0 },
                    window: EvaluationWindow::Samples(1),
                    aggregate: WindowAggregate::Each,
                    severity: Severity::Warning,
                    channels: vec![ChannelTarget::new(
                        ChannelKind::Webhook,
                        "https://hooks.example/x",
                    )],
                    enabled: true,
                },
            )
            .unwrap();

        intake.ingest(raw("cpu_usage", 95.0)).await.unwrap();
        assert_eq!(dispatcher.tracked_alerts(), 1);

        intake.remove_alert(config.id, &owner).unwrap();
        assert_eq!(dispatcher.tracked_alerts(), 0);
        assert!(engine.registry().get(config.id).is_none());
    }

    #[test]
    fn test_raw_event_deserializes_from_upstream_json() {
        let json = r#"{"metric":"fee_rate","value":18.5,"block_height":812000,"observed_at_ms":1700000000000}"#;
        let raw: RawSignalEvent = serde_json::from_str(json).unwrap();
        let sample = normalize(&raw).unwrap();
        assert_eq!(sample.metric, MetricKind::FeeRate);
        assert_eq!(sample.block_height, 812_000);
    }
}
