//! Notification dispatcher
//!
//! Turns a trigger/resolve transition into one delivery per configured
//! channel target. Three rules govern the path:
//!
//! - **Backpressure**: a bounded number of outstanding deliveries per
//!   channel kind (`tokio::sync::Semaphore`). When the bound is reached,
//!   `dispatch` waits; it never drops an admitted event.
//! - **Bounded retry**: each delivery retries with exponential backoff up
//!   to a finite attempt cap, then is recorded `Failed` and surfaced.
//! - **Coalescing**: a transition that is superseded by a newer one for
//!   the same alert before it leaves the dispatcher is recorded
//!   `Suppressed` instead of sent (see `CoalesceGate`).

use crate::core::types::{TransitionEvent, TransitionKind};
use crate::dispatch::channel::{ChannelKind, ChannelTarget, NotificationChannel, NotificationPayload};
use crate::dispatch::coalesce::CoalesceGate;
use crate::dispatch::record::{NotificationRecord, NotificationStatus, RecordStore};
use crate::resilience::backoff::{Backoff, RetryPolicy};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Retry policy applied to every delivery
    pub retry: RetryPolicy,
    /// Maximum in-flight deliveries per channel kind
    pub per_channel_outstanding: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            per_channel_outstanding: 8,
        }
    }
}

/// Aggregate delivery counters
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatcherStats {
    pub sent: u64,
    pub failed: u64,
    pub suppressed: u64,
    pub retries: u64,
}

/// Notification dispatcher, shared behind `Arc`
pub struct Dispatcher {
    config: DispatcherConfig,
    channels: HashMap<ChannelKind, Arc<dyn NotificationChannel>>,
    capacity: HashMap<ChannelKind, Arc<Semaphore>>,
    gate: CoalesceGate,
    store: Arc<dyn RecordStore>,
    next_record_id: AtomicU64,
    sent: AtomicU64,
    failed: AtomicU64,
    suppressed: AtomicU64,
    retried: AtomicU64,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, store: Arc<dyn RecordStore>) -> Self {
        Self {
            config,
            channels: HashMap::new(),
            capacity: HashMap::new(),
            gate: CoalesceGate::new(),
            store,
            next_record_id: AtomicU64::new(1),
            sent: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
            retried: AtomicU64::new(0),
        }
    }

    /// Register the transport for one channel kind
    pub fn with_channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        let kind = channel.kind();
        self.capacity.insert(
            kind,
            Arc::new(Semaphore::new(self.config.per_channel_outstanding)),
        );
        self.channels.insert(kind, channel);
        self
    }

    /// Deliver one transition event across its channel targets.
    ///
    /// Returns one record per target with its final status. Waits for
    /// channel capacity rather than dropping, so a saturated channel
    /// backpressures the caller.
    pub async fn dispatch(
        self: &Arc<Self>,
        event: &TransitionEvent,
        targets: &[ChannelTarget],
    ) -> Result<Vec<NotificationRecord>> {
        let generation = self.gate.register(event.alert_id);
        debug!(
            alert = %event.alert_id,
            kind = event.kind.as_str(),
            generation,
            targets = targets.len(),
            "dispatching transition"
        );

        let mut set = JoinSet::new();
        for target in targets {
            let this = Arc::clone(self);
            let event = event.clone();
            let target = target.clone();
            set.spawn(async move { this.deliver_one(event, generation, target).await });
        }

        let mut records = Vec::with_capacity(targets.len());
        while let Some(joined) = set.join_next().await {
            records.push(joined?);
        }
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    /// Drop coalescing state for a deleted alert
    pub fn forget_alert(&self, alert_id: crate::core::types::AlertId) {
        self.gate.forget(alert_id);
    }

    /// Alerts the coalescing gate is still tracking
    pub fn tracked_alerts(&self) -> usize {
        self.gate.tracked_alerts()
    }

    /// Record store notifications are journaled into
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            retries: self.retried.load(Ordering::Relaxed),
        }
    }

    async fn deliver_one(
        &self,
        event: TransitionEvent,
        generation: u64,
        target: ChannelTarget,
    ) -> NotificationRecord {
        let resolved_at_ms = match event.kind {
            TransitionKind::Resolved => Some(event.observed_at_ms),
            _ => None,
        };
        let mut record = NotificationRecord {
            id: self.next_record_id.fetch_add(1, Ordering::Relaxed),
            alert_id: event.alert_id,
            channel: target.kind,
            target: target.target.clone(),
            status: NotificationStatus::Pending,
            attempt_count: 0,
            triggered_at_ms: event.observed_at_ms,
            resolved_at_ms,
        };
        if let Err(e) = self.store.append(record.clone()).await {
            warn!("failed to persist notification record {}: {}", record.id, e);
        }

        let Some(channel) = self.channels.get(&target.kind) else {
            error!(
                "no transport registered for channel '{}', marking record {} failed",
                target.kind, record.id
            );
            record.status = NotificationStatus::Failed;
            self.failed.fetch_add(1, Ordering::Relaxed);
            self.finalize(&record).await;
            return record;
        };

        // Bounded outstanding deliveries per channel: waiting here is the
        // backpressure the evaluation engine feels.
        let semaphore = Arc::clone(&self.capacity[&target.kind]);
        let _permit = match semaphore.acquire_owned().await {
            Ok(p) => p,
            Err(_) => {
                record.status = NotificationStatus::Failed;
                self.failed.fetch_add(1, Ordering::Relaxed);
                self.finalize(&record).await;
                return record;
            }
        };

        // Coalescing: a newer transition for this alert registered while
        // we were queued means this one is stale. Suppress, don't send.
        if !self.gate.is_current(event.alert_id, generation) {
            debug!(
                alert = %event.alert_id,
                record = record.id,
                "superseded before leaving dispatcher, suppressing"
            );
            record.status = NotificationStatus::Suppressed;
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            self.finalize(&record).await;
            return record;
        }

        let payload = NotificationPayload::from_event(&event);
        let mut backoff = Backoff::new(self.config.retry.clone());
        loop {
            record.attempt_count += 1;
            match channel.send(&target.target, &payload).await {
                Ok(()) => {
                    record.status = NotificationStatus::Sent;
                    self.sent.fetch_add(1, Ordering::Relaxed);
                    break;
                }
                Err(e) => {
                    warn!(
                        channel = target.kind.as_str(),
                        attempt = record.attempt_count,
                        "delivery failed: {}",
                        e
                    );
                    match backoff.next_delay() {
                        Some(delay) => {
                            self.retried.fetch_add(1, Ordering::Relaxed);
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            error!(
                                channel = target.kind.as_str(),
                                alert = %event.alert_id,
                                attempts = record.attempt_count,
                                "retries exhausted, marking failed"
                            );
                            record.status = NotificationStatus::Failed;
                            self.failed.fetch_add(1, Ordering::Relaxed);
                            break;
                        }
                    }
                }
            }
        }

        self.finalize(&record).await;
        record
    }

    async fn finalize(&self, record: &NotificationRecord) {
        if let Err(e) = self
            .store
            .update_status(
                record.id,
                record.status,
                record.attempt_count,
                record.resolved_at_ms,
            )
            .await
        {
            warn!("failed to update notification record {}: {}", record.id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::DispatchError;
    use crate::core::types::{AlertId, MetricKind, OwnerId, Severity};
    use crate::dispatch::record::InMemoryRecordStore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn event(alert: u64, kind: TransitionKind) -> TransitionEvent {
        TransitionEvent {
            alert_id: AlertId(alert),
            owner: OwnerId::new("ops"),
            kind,
            metric: MetricKind::CpuUsage,
            severity: Severity::Critical,
            value: 92.0,
            threshold: 80.0,
            block_height: 800_000,
            observed_at_ms: 1_700_000_000_000,
        }
    }

    /// Fails the first `fail_first` sends, then succeeds
    struct FlakyChannel {
        kind: ChannelKind,
        fail_first: u32,
        calls: AtomicU32,
    }

    impl FlakyChannel {
        fn new(kind: ChannelKind, fail_first: u32) -> Self {
            Self {
                kind,
                fail_first,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl NotificationChannel for FlakyChannel {
        fn kind(&self) -> ChannelKind {
            self.kind
        }

        async fn send(&self, _: &str, _: &NotificationPayload) -> Result<(), DispatchError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(DispatchError::ChannelSend {
                    channel: self.kind.to_string(),
                    reason: "simulated outage".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    /// Succeeds after a fixed delay, to occupy channel capacity
    struct SlowChannel {
        kind: ChannelKind,
        delay: Duration,
    }

    #[async_trait]
    impl NotificationChannel for SlowChannel {
        fn kind(&self) -> ChannelKind {
            self.kind
        }

        async fn send(&self, _: &str, _: &NotificationPayload) -> Result<(), DispatchError> {
            tokio::time::sleep(self.delay).await;
            Ok(())
        }
    }

    fn test_config(outstanding: usize) -> DispatcherConfig {
        DispatcherConfig {
            retry: RetryPolicy::fast(),
            per_channel_outstanding: outstanding,
        }
    }

    #[tokio::test]
    async fn test_one_record_per_channel() {
        let store = Arc::new(InMemoryRecordStore::new());
        let dispatcher = Arc::new(
            Dispatcher::new(test_config(8), store.clone())
                .with_channel(Arc::new(FlakyChannel::new(ChannelKind::Email, 0)))
                .with_channel(Arc::new(FlakyChannel::new(ChannelKind::Webhook, 0))),
        );

        let targets = vec![
            ChannelTarget::new(ChannelKind::Email, "ops@example.com"),
            ChannelTarget::new(ChannelKind::Webhook, "https://hooks.example/x"),
        ];
        let records = dispatcher
            .dispatch(&event(1, TransitionKind::Triggered), &targets)
            .await
            .unwrap();

        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.status == NotificationStatus::Sent));
        assert_eq!(store.len(), 2);
        assert_eq!(dispatcher.stats().sent, 2);
    }

    #[tokio::test]
    async fn test_forget_alert_drops_coalesce_state() {
        let store = Arc::new(InMemoryRecordStore::new());
        let dispatcher = Arc::new(
            Dispatcher::new(test_config(8), store)
                .with_channel(Arc::new(FlakyChannel::new(ChannelKind::Email, 0))),
        );
        let targets = vec![ChannelTarget::new(ChannelKind::Email, "ops@example.com")];

        dispatcher
            .dispatch(&event(1, TransitionKind::Triggered), &targets)
            .await
            .unwrap();
        assert_eq!(dispatcher.tracked_alerts(), 1);

        dispatcher.forget_alert(AlertId(1));
        assert_eq!(dispatcher.tracked_alerts(), 0);
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let store = Arc::new(InMemoryRecordStore::new());
        let dispatcher = Arc::new(
            Dispatcher::new(test_config(8), store.clone())
                .with_channel(Arc::new(FlakyChannel::new(ChannelKind::Webhook, 2))),
        );

        let targets = vec![ChannelTarget::new(ChannelKind::Webhook, "https://hooks.example/x")];
        let records = dispatcher
            .dispatch(&event(1, TransitionKind::Triggered), &targets)
            .await
            .unwrap();

        assert_eq!(records[0].status, NotificationStatus::Sent);
        assert_eq!(records[0].attempt_count, 3);
        assert_eq!(dispatcher.stats().retries, 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_failed() {
        let store = Arc::new(InMemoryRecordStore::new());
        // fast() allows 3 attempts; fail more than that
        let dispatcher = Arc::new(
            Dispatcher::new(test_config(8), store.clone())
                .with_channel(Arc::new(FlakyChannel::new(ChannelKind::Sms, 100))),
        );

        let targets = vec![ChannelTarget::new(ChannelKind::Sms, "+15550100")];
        let records = dispatcher
            .dispatch(&event(1, TransitionKind::Triggered), &targets)
            .await
            .unwrap();

        assert_eq!(records[0].status, NotificationStatus::Failed);
        assert_eq!(records[0].attempt_count, 3);
        assert_eq!(dispatcher.stats().failed, 1);

        // Surfaced in the store too, never silently dropped
        let stored = store.for_alert(AlertId(1)).await.unwrap();
        assert_eq!(stored[0].status, NotificationStatus::Failed);
    }

    #[tokio::test]
    async fn test_rapid_trigger_resolve_coalesces() {
        let store = Arc::new(InMemoryRecordStore::new());
        let dispatcher = Arc::new(
            Dispatcher::new(test_config(1), store.clone()).with_channel(Arc::new(SlowChannel {
                kind: ChannelKind::Webhook,
                delay: Duration::from_millis(50),
            })),
        );
        let targets = vec![ChannelTarget::new(ChannelKind::Webhook, "https://hooks.example/x")];

        // Occupy the single permit with an unrelated alert
        let d = dispatcher.clone();
        let t = targets.clone();
        let blocker = tokio::spawn(async move { d.dispatch(&event(99, TransitionKind::Triggered), &t).await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Queue the trigger for alert 1, then immediately supersede it
        let d = dispatcher.clone();
        let t = targets.clone();
        let trigger = tokio::spawn(async move { d.dispatch(&event(1, TransitionKind::Triggered), &t).await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let resolve = dispatcher
            .dispatch(&event(1, TransitionKind::Resolved), &targets)
            .await
            .unwrap();

        let trigger = trigger.await.unwrap().unwrap();
        blocker.await.unwrap().unwrap();

        assert_eq!(trigger[0].status, NotificationStatus::Suppressed);
        assert_eq!(resolve[0].status, NotificationStatus::Sent);
        assert_eq!(dispatcher.stats().suppressed, 1);
    }

    #[tokio::test]
    async fn test_backpressure_blocks_until_capacity_frees() {
        let store = Arc::new(InMemoryRecordStore::new());
        let delay = Duration::from_millis(40);
        let dispatcher = Arc::new(
            Dispatcher::new(test_config(1), store).with_channel(Arc::new(SlowChannel {
                kind: ChannelKind::Email,
                delay,
            })),
        );
        let targets = vec![ChannelTarget::new(ChannelKind::Email, "ops@example.com")];

        let d = dispatcher.clone();
        let t = targets.clone();
        let first = tokio::spawn(async move { d.dispatch(&event(1, TransitionKind::Triggered), &t).await });
        tokio::time::sleep(Duration::from_millis(5)).await;

        let start = std::time::Instant::now();
        let second = dispatcher
            .dispatch(&event(2, TransitionKind::Triggered), &targets)
            .await
            .unwrap();
        first.await.unwrap().unwrap();

        // Second dispatch had to wait for the first delivery's permit
        assert!(start.elapsed() >= delay / 2);
        assert_eq!(second[0].status, NotificationStatus::Sent);
    }
}
