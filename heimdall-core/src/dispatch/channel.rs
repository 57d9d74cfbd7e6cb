//! Notification channel abstraction
//!
//! A closed set of channel kinds behind one send capability. Real
//! transports (SMTP relay, chat webhook, SMS gateway) live outside the
//! core and implement `NotificationChannel`; adding a kind means adding a
//! variant and an implementation, nothing structural.

use crate::core::errors::DispatchError;
use crate::core::types::{MetricKind, Severity, TransitionEvent, TransitionKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

/// Supported notification channel kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Email,
    Webhook,
    Sms,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Webhook => "webhook",
            Self::Sms => "sms",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One configured delivery destination on an alert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelTarget {
    pub kind: ChannelKind,
    /// Address/URL/number, interpreted by the transport
    pub target: String,
}

impl ChannelTarget {
    pub fn new(kind: ChannelKind, target: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
        }
    }
}

/// Payload handed to a channel transport for one delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub alert_id: crate::core::types::AlertId,
    pub kind: TransitionKind,
    pub metric: MetricKind,
    pub severity: Severity,
    pub value: f64,
    pub threshold: f64,
    pub message: String,
    pub observed_at_ms: u64,
}

impl NotificationPayload {
    pub fn from_event(event: &TransitionEvent) -> Self {
        let message = match event.kind {
            TransitionKind::Triggered | TransitionKind::Renotified => format!(
                "[{}] {} breached: {} (threshold {})",
                event.severity.as_str(),
                event.metric,
                event.value,
                event.threshold
            ),
            TransitionKind::Resolved => format!(
                "[{}] {} recovered: {} (threshold {})",
                event.severity.as_str(),
                event.metric,
                event.value,
                event.threshold
            ),
        };
        Self {
            alert_id: event.alert_id,
            kind: event.kind,
            metric: event.metric,
            severity: event.severity,
            value: event.value,
            threshold: event.threshold,
            message,
            observed_at_ms: event.observed_at_ms,
        }
    }
}

/// Abstract send contract every channel transport implements
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Attempt one delivery. Failures are retryable; the dispatcher owns
    /// the retry policy.
    async fn send(&self, target: &str, payload: &NotificationPayload) -> Result<(), DispatchError>;
}

/// Log-only transport, useful as a default sink and in development
pub struct LogChannel {
    kind: ChannelKind,
}

impl LogChannel {
    pub fn new(kind: ChannelKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl NotificationChannel for LogChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn send(&self, target: &str, payload: &NotificationPayload) -> Result<(), DispatchError> {
        info!(
            channel = self.kind.as_str(),
            target,
            alert = %payload.alert_id,
            "{}",
            payload.message
        );
        Ok(())
    }
}
