//! Per-connection delivery state and loop
//!
//! Every subscriber gets an independent, cancellable delivery loop fed by
//! a bounded FIFO queue. A slow consumer overflows its own queue and loses
//! its own oldest frames; it can never block the publisher or any other
//! connection. Loss is surfaced, not hidden: the drop counter is
//! non-decreasing and reported to the client in periodic control frames.

use crate::core::errors::ConnectionLost;
use crate::hub::protocol::{Frame, SubscriptionFilter};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

/// Identifier for one live connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Transport half of a connection. The WebSocket server (external)
/// implements this; tests use in-memory sinks.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send(&self, frame: Frame) -> Result<(), ConnectionLost>;
}

/// Shared state between the hub (enqueue side) and the delivery loop
pub struct ConnectionShared {
    id: ConnectionId,
    filter: SubscriptionFilter,
    capacity: usize,
    queue: Mutex<VecDeque<Frame>>,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
    reported_dropped: AtomicU64,
}

impl ConnectionShared {
    pub(crate) fn new(id: ConnectionId, filter: SubscriptionFilter, capacity: usize) -> Self {
        Self {
            id,
            filter,
            capacity: capacity.max(1),
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            reported_dropped: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub(crate) fn filter(&self) -> &SubscriptionFilter {
        &self.filter
    }

    /// Append a frame, dropping this connection's oldest frame on
    /// overflow. Returns true if a frame was dropped. Never blocks.
    pub(crate) fn enqueue(&self, frame: Frame) -> bool {
        if self.is_closed() {
            // Delivering to a closed connection is a no-op, not an error
            return false;
        }
        let dropped = {
            let mut queue = self.queue.lock();
            let dropped = if queue.len() >= self.capacity {
                queue.pop_front();
                true
            } else {
                false
            };
            queue.push_back(frame);
            dropped
        };
        if dropped {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        dropped
    }

    fn pop(&self) -> Option<Frame> {
        self.queue.lock().pop_front()
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Frames lost to queue overflow since connect. Non-decreasing.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn drain(&self) {
        self.queue.lock().clear();
    }
}

/// Registry of live connections, keyed by connection id.
///
/// Constructed by the caller and handed to the hub explicitly; there is
/// no ambient global.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<DashMap<u64, Arc<ConnectionShared>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub(crate) fn insert(&self, conn: Arc<ConnectionShared>) {
        self.inner.insert(conn.id().0, conn);
    }

    pub(crate) fn remove(&self, id: ConnectionId) {
        self.inner.remove(&id.0);
    }

    pub(crate) fn for_each(&self, mut f: impl FnMut(&Arc<ConnectionShared>)) {
        for entry in self.inner.iter() {
            f(entry.value());
        }
    }
}

/// Handle returned by `subscribe`; dropping it does not disconnect
pub struct ConnectionHandle {
    shared: Arc<ConnectionShared>,
    task: JoinHandle<()>,
}

impl ConnectionHandle {
    pub(crate) fn new(shared: Arc<ConnectionShared>, task: JoinHandle<()>) -> Self {
        Self { shared, task }
    }

    pub fn id(&self) -> ConnectionId {
        self.shared.id()
    }

    pub fn dropped_count(&self) -> u64 {
        self.shared.dropped_count()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Cancel this connection's delivery loop. Only this connection is
    /// affected.
    pub fn disconnect(&self) {
        self.shared.close();
    }

    /// Wait for the delivery loop to finish tearing down
    pub async fn closed(self) {
        let _ = self.task.await;
    }
}

/// Delivery loop: drain the queue into the sink, report drops
/// periodically, tear down on close or sink failure.
pub(crate) async fn run_delivery(
    shared: Arc<ConnectionShared>,
    sink: Arc<dyn FrameSink>,
    registry: ConnectionRegistry,
    report_interval: Duration,
) {
    let mut ticker = tokio::time::interval(report_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // First tick fires immediately; consume it
    ticker.tick().await;

    'outer: loop {
        while let Some(frame) = shared.pop() {
            if sink.send(frame).await.is_err() {
                debug!("{} sink failed, tearing down", shared.id());
                break 'outer;
            }
            if shared.is_closed() {
                break 'outer;
            }
        }
        if shared.is_closed() {
            break;
        }

        tokio::select! {
            _ = shared.notify.notified() => {}
            _ = ticker.tick() => {
                let dropped = shared.dropped.load(Ordering::Relaxed);
                let reported = shared.reported_dropped.swap(dropped, Ordering::Relaxed);
                if dropped > reported {
                    if sink.send(Frame::Dropped { dropped_count: dropped }).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    shared.close();
    shared.drain();
    registry.remove(shared.id());
    debug!("{} released", shared.id());
}
