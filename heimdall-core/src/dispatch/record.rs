//! Notification delivery records
//!
//! Append-only audit trail of every delivery attempt set. Only `status`
//! and `attempt_count` are ever updated after creation. The durable store
//! is an external collaborator behind `RecordStore`; the in-memory
//! implementation backs tests and single-process deployments.

use crate::core::types::AlertId;
use crate::dispatch::channel::ChannelKind;
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Delivery outcome of one notification record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
    /// Superseded by a newer transition before leaving the dispatcher
    Suppressed,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Suppressed => "suppressed",
        }
    }
}

/// One per (transition event, channel target)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: u64,
    pub alert_id: AlertId,
    pub channel: ChannelKind,
    pub target: String,
    pub status: NotificationStatus,
    pub attempt_count: u32,
    pub triggered_at_ms: u64,
    pub resolved_at_ms: Option<u64>,
}

/// Persistence boundary for notification records.
///
/// Records are never deleted. `update_status` may only touch
/// status/attempt_count/resolved_at.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn append(&self, record: NotificationRecord) -> Result<()>;

    async fn update_status(
        &self,
        id: u64,
        status: NotificationStatus,
        attempt_count: u32,
        resolved_at_ms: Option<u64>,
    ) -> Result<()>;

    async fn for_alert(&self, alert_id: AlertId) -> Result<Vec<NotificationRecord>>;
}

/// In-memory record store
#[derive(Default)]
pub struct InMemoryRecordStore {
    records: RwLock<Vec<NotificationRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn append(&self, record: NotificationRecord) -> Result<()> {
        self.records.write().push(record);
        Ok(())
    }

    async fn update_status(
        &self,
        id: u64,
        status: NotificationStatus,
        attempt_count: u32,
        resolved_at_ms: Option<u64>,
    ) -> Result<()> {
        let mut records = self.records.write();
        if let Some(rec) = records.iter_mut().find(|r| r.id == id) {
            rec.status = status;
            rec.attempt_count = attempt_count;
            if resolved_at_ms.is_some() {
                rec.resolved_at_ms = resolved_at_ms;
            }
        }
        Ok(())
    }

    async fn for_alert(&self, alert_id: AlertId) -> Result<Vec<NotificationRecord>> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|r| r.alert_id == alert_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u64, alert: u64) -> NotificationRecord {
        NotificationRecord {
            id,
            alert_id: AlertId(alert),
            channel: ChannelKind::Email,
            target: "ops@example.com".into(),
            status: NotificationStatus::Pending,
            attempt_count: 0,
            triggered_at_ms: 1_700_000_000_000,
            resolved_at_ms: None,
        }
    }

    #[tokio::test]
    async fn test_append_and_query() {
        let store = InMemoryRecordStore::new();
        store.append(record(1, 10)).await.unwrap();
        store.append(record(2, 10)).await.unwrap();
        store.append(record(3, 11)).await.unwrap();

        let for_10 = store.for_alert(AlertId(10)).await.unwrap();
        assert_eq!(for_10.len(), 2);
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn test_update_touches_only_status_fields() {
        let store = InMemoryRecordStore::new();
        store.append(record(1, 10)).await.unwrap();
        store
            .update_status(1, NotificationStatus::Sent, 2, None)
            .await
            .unwrap();

        let recs = store.for_alert(AlertId(10)).await.unwrap();
        assert_eq!(recs[0].status, NotificationStatus::Sent);
        assert_eq!(recs[0].attempt_count, 2);
        assert_eq!(recs[0].target, "ops@example.com");
        assert_eq!(recs[0].resolved_at_ms, None);
    }
}
