//! Best-effort replay buffer
//!
//! One bounded ring per topic holding the most recent published events.
//! The bound is conservative (default 256 events per topic, drop-oldest):
//! nothing elsewhere in the system assumes a stronger guarantee, and a
//! client whose cursor has aged out of the ring is told so explicitly via
//! a gap frame rather than silently missing data.

use crate::core::types::HubEvent;
use std::collections::VecDeque;

/// Default per-topic ring capacity
pub const DEFAULT_REPLAY_CAPACITY: usize = 256;

/// Outcome of a replay request against the ring
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayOutcome {
    /// Cursor is current; nothing to send
    UpToDate,
    /// Contiguous events after the cursor
    Events(Vec<(u64, HubEvent)>),
    /// Cursor aged out of the ring; client state is potentially stale
    Gap,
}

/// Bounded drop-oldest ring of `(sequence, event)` for one topic
pub struct ReplayBuffer {
    capacity: usize,
    ring: VecDeque<(u64, HubEvent)>,
}

impl ReplayBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ring: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    pub fn push(&mut self, sequence: u64, event: HubEvent) {
        if self.ring.len() == self.capacity {
            self.ring.pop_front();
        }
        self.ring.push_back((sequence, event));
    }

    /// Events with sequence strictly greater than `last_seen`, if the ring
    /// can prove nothing in between was lost.
    pub fn replay_after(&self, last_seen: u64, current_sequence: u64) -> ReplayOutcome {
        if last_seen >= current_sequence {
            return ReplayOutcome::UpToDate;
        }
        let Some((oldest, _)) = self.ring.front() else {
            // Ring drained but sequences advanced past the cursor
            return ReplayOutcome::Gap;
        };
        if last_seen + 1 < *oldest {
            return ReplayOutcome::Gap;
        }
        let events: Vec<_> = self
            .ring
            .iter()
            .filter(|(seq, _)| *seq > last_seen)
            .cloned()
            .collect();
        if events.is_empty() {
            ReplayOutcome::UpToDate
        } else {
            ReplayOutcome::Events(events)
        }
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{MetricKind, SignalSample};

    fn event(n: u64) -> HubEvent {
        HubEvent::Signal(SignalSample::new(MetricKind::FeeRate, n as f64, n, n))
    }

    fn filled(capacity: usize, n: u64) -> ReplayBuffer {
        let mut buf = ReplayBuffer::new(capacity);
        for seq in 1..=n {
            buf.push(seq, event(seq));
        }
        buf
    }

    #[test]
    fn test_replay_from_recent_cursor() {
        let buf = filled(8, 5);
        match buf.replay_after(3, 5) {
            ReplayOutcome::Events(events) => {
                assert_eq!(events.iter().map(|(s, _)| *s).collect::<Vec<_>>(), vec![4, 5]);
            }
            other => panic!("expected events, got {:?}", other),
        }
    }

    #[test]
    fn test_up_to_date_cursor() {
        let buf = filled(8, 5);
        assert_eq!(buf.replay_after(5, 5), ReplayOutcome::UpToDate);
    }

    #[test]
    fn test_aged_out_cursor_signals_gap() {
        // Capacity 4, sequences 1..=10: only 7..=10 retained
        let buf = filled(4, 10);
        assert_eq!(buf.len(), 4);
        assert_eq!(buf.replay_after(2, 10), ReplayOutcome::Gap);
    }

    #[test]
    fn test_boundary_cursor_just_inside_ring() {
        let buf = filled(4, 10); // retains 7..=10
        match buf.replay_after(6, 10) {
            ReplayOutcome::Events(events) => assert_eq!(events.len(), 4),
            other => panic!("expected events, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_ring_with_advanced_sequence_is_gap() {
        let buf = ReplayBuffer::new(4);
        assert_eq!(buf.replay_after(3, 9), ReplayOutcome::Gap);
        assert_eq!(buf.replay_after(9, 9), ReplayOutcome::UpToDate);
    }
}
