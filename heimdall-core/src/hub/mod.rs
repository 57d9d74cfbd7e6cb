//! Subscription hub: fan-out of live events to filtered subscribers
//!
//! ```text
//!                       ┌──────────────────────────────┐
//!   publish(event) ───► │ topic channel                │
//!                       │   sequence  += 1             │
//!                       │   replay ring push           │
//!                       └──────────────┬───────────────┘
//!                                      │ filter check per connection
//!                       ┌──────────────▼───────────────┐
//!                       │ bounded FIFO queue (per conn)│──► delivery loop ──► sink
//!                       └──────────────────────────────┘
//! ```
//!
//! Publication is synchronous and never blocks: the event is matched
//! against each connection's filter and either enqueued or skipped before
//! `publish` returns. Delivery to the transport happens on the
//! connection's own task. Sequences are per topic, contiguous, and
//! assigned under the topic lock so two events can never share a number.

pub mod connection;
pub mod protocol;
pub mod replay;

pub use connection::{ConnectionHandle, ConnectionId, ConnectionRegistry, FrameSink};
pub use protocol::{Cursor, Frame, SubscriptionFilter};
pub use replay::{ReplayBuffer, ReplayOutcome, DEFAULT_REPLAY_CAPACITY};

use crate::core::types::{HubEvent, Topic};
use connection::{run_delivery, ConnectionShared};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Hub tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Per-connection queue bound; oldest frame is dropped on overflow
    pub queue_capacity: usize,
    /// Per-topic replay ring size for reconnect catch-up
    pub replay_capacity: usize,
    /// How often a connection's delivery loop reports accumulated drops
    pub drop_report_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            replay_capacity: DEFAULT_REPLAY_CAPACITY,
            drop_report_interval: Duration::from_secs(5),
        }
    }
}

/// Sequence counter and replay ring for one topic
struct TopicChannel {
    last_sequence: u64,
    replay: ReplayBuffer,
}

impl TopicChannel {
    fn new(replay_capacity: usize) -> Self {
        Self {
            last_sequence: 0,
            replay: ReplayBuffer::new(replay_capacity),
        }
    }
}

/// Point-in-time hub counters
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct HubStats {
    pub connections: usize,
    pub published: u64,
    pub enqueued: u64,
    pub dropped: u64,
}

pub struct SubscriptionHub {
    config: HubConfig,
    topics: DashMap<Topic, Mutex<TopicChannel>>,
    registry: ConnectionRegistry,
    next_connection_id: AtomicU64,
    published: AtomicU64,
    enqueued: AtomicU64,
    dropped: AtomicU64,
}

impl SubscriptionHub {
    pub fn new(config: HubConfig, registry: ConnectionRegistry) -> Self {
        Self {
            config,
            topics: DashMap::new(),
            registry,
            next_connection_id: AtomicU64::new(1),
            published: AtomicU64::new(0),
            enqueued: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Publish one event to its topic. Assigns the topic sequence number,
    /// records the event for replay, and enqueues a frame on every
    /// connection whose filter matches. Returns the assigned sequence.
    ///
    /// Never blocks and never fails: a slow subscriber costs itself
    /// frames, not the publisher.
    pub fn publish(&self, event: HubEvent) -> u64 {
        let topic = event.topic();
        let sequence = {
            let channel = self
                .topics
                .entry(topic)
                .or_insert_with(|| Mutex::new(TopicChannel::new(self.config.replay_capacity)));
            let mut channel = channel.lock();
            channel.last_sequence += 1;
            let sequence = channel.last_sequence;
            channel.replay.push(sequence, event.clone());
            sequence
        };
        self.published.fetch_add(1, Ordering::Relaxed);

        self.registry.for_each(|conn| {
            if conn.is_closed() || !conn.filter().matches(&event) {
                return;
            }
            let frame = Frame::Event {
                sequence,
                topic,
                payload: event.clone(),
            };
            if conn.enqueue(frame) {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            self.enqueued.fetch_add(1, Ordering::Relaxed);
        });
        sequence
    }

    /// Register a subscriber and start its delivery loop.
    ///
    /// With a cursor, frames the client missed since `last_sequence` are
    /// queued first (filtered like live traffic); if the ring no longer
    /// covers that range the first frame is a gap marker instead, and the
    /// client should refetch a snapshot out of band.
    pub fn subscribe(
        &self,
        filter: SubscriptionFilter,
        cursor: Option<Cursor>,
        sink: Arc<dyn FrameSink>,
    ) -> ConnectionHandle {
        let id = ConnectionId(self.next_connection_id.fetch_add(1, Ordering::Relaxed));
        let shared = Arc::new(ConnectionShared::new(id, filter, self.config.queue_capacity));

        match cursor {
            Some(cursor) => {
                let synced_to = self.replay_into(&cursor, &shared);
                self.registry.insert(shared.clone());
                // An event sequenced between the replay read and
                // registration is in neither the replay nor the live
                // path; re-read the ring to cover that window. A frame
                // racing both paths can arrive twice, and clients dedupe
                // by sequence.
                let catch_up = Cursor {
                    topic: cursor.topic,
                    last_sequence: synced_to,
                };
                self.replay_into(&catch_up, &shared);
            }
            None => self.registry.insert(shared.clone()),
        }
        let task = tokio::spawn(run_delivery(
            shared.clone(),
            sink,
            self.registry.clone(),
            self.config.drop_report_interval,
        ));
        ConnectionHandle::new(shared, task)
    }

    /// Queue whatever the cursor missed and return the sequence the
    /// connection is now synced to.
    fn replay_into(&self, cursor: &Cursor, conn: &Arc<ConnectionShared>) -> u64 {
        let (outcome, synced_to) = match self.topics.get(&cursor.topic) {
            Some(channel) => {
                let channel = channel.lock();
                (
                    channel
                        .replay
                        .replay_after(cursor.last_sequence, channel.last_sequence),
                    channel.last_sequence.max(cursor.last_sequence),
                )
            }
            // Topic has never published; nothing was missed
            None => (ReplayOutcome::UpToDate, cursor.last_sequence),
        };
        match outcome {
            ReplayOutcome::UpToDate => {}
            ReplayOutcome::Events(events) => {
                for (sequence, event) in events {
                    if conn.filter().matches(&event) {
                        conn.enqueue(Frame::Event {
                            sequence,
                            topic: cursor.topic,
                            payload: event,
                        });
                    }
                }
            }
            ReplayOutcome::Gap => {
                conn.enqueue(Frame::gap());
            }
        }
        synced_to
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Close every live connection; their loops tear down and deregister
    pub fn close_all(&self) {
        self.registry.for_each(|conn| conn.close());
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            connections: self.registry.len(),
            published: self.published.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}
