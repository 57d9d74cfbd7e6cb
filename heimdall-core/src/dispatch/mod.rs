//! Notification dispatch: channels, coalescing, records, and the
//! dispatcher that ties them together with retry and backpressure

pub mod channel;
pub mod coalesce;
pub mod dispatcher;
pub mod record;

pub use channel::{ChannelKind, ChannelTarget, LogChannel, NotificationChannel, NotificationPayload};
pub use coalesce::CoalesceGate;
pub use dispatcher::{Dispatcher, DispatcherConfig, DispatcherStats};
pub use record::{InMemoryRecordStore, NotificationRecord, NotificationStatus, RecordStore};
