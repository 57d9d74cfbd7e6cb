//! Wire protocol for live subscriptions
//!
//! The transport (WebSocket server) is an external collaborator; the core
//! owns the frame shapes, the filter descriptor a client connects with,
//! and the reconnection cursor.

use crate::core::types::{HubEvent, MetricKind, Severity, SignalCategory, Topic};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Filter descriptor presented at connect time.
///
/// An unset field matches everything; a set field must match. Severity
/// applies only to alert events; raw signal frames pass a severity filter
/// untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscriptionFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<HashSet<MetricKind>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<HashSet<SignalCategory>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_severity: Option<Severity>,
}

impl SubscriptionFilter {
    /// Match-everything filter
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_category(category: SignalCategory) -> Self {
        Self {
            categories: Some(HashSet::from([category])),
            ..Self::default()
        }
    }

    pub fn for_metric(metric: MetricKind) -> Self {
        Self {
            metrics: Some(HashSet::from([metric])),
            ..Self::default()
        }
    }

    /// Applied to every event before enqueue; nothing bypasses this.
    pub fn matches(&self, event: &HubEvent) -> bool {
        if let Some(metrics) = &self.metrics {
            if !metrics.contains(&event.metric()) {
                return false;
            }
        }
        if let Some(categories) = &self.categories {
            if !categories.contains(&event.category()) {
                return false;
            }
        }
        if let Some(min) = self.min_severity {
            if let Some(severity) = event.severity() {
                if severity < min {
                    return false;
                }
            }
        }
        true
    }
}

/// Last-seen position presented by a reconnecting client
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Cursor {
    pub topic: Topic,
    pub last_sequence: u64,
}

/// Server-to-client frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum Frame {
    /// Ordinary delivery, sequenced per topic
    Event {
        sequence: u64,
        topic: Topic,
        payload: HubEvent,
    },
    /// Periodic control frame: total messages this connection has lost to
    /// queue overflow. Non-decreasing.
    Dropped { dropped_count: u64 },
    /// Replay from the requested cursor was impossible; client state may
    /// be stale.
    Gap { gap: bool },
}

impl Frame {
    pub fn gap() -> Self {
        Frame::Gap { gap: true }
    }
}
