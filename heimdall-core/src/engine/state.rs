//! Per-alert evaluation state machine
//!
//! One `AlertState` per enabled configuration, exclusively owned by the
//! engine. Transitions:
//!
//! ```text
//! Ok ──breach──▶ Pending ──breach persists full window──▶ Triggered
//!  ▲               │                                        │
//!  └──non-breach───┘ (transient, no event)                  │
//!  ◀──────────────── non-breach (Resolved event) ───────────┘
//! ```
//!
//! Triggered re-entry emits nothing; `last_notified_at_ms` throttles
//! re-notification to at least the evaluation window. Transitions are pure
//! functions of `(config, state, sample)` so the machine is testable
//! without a clock or runtime.

use crate::core::types::{SignalSample, TransitionKind};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Absolute tolerance for the `==` comparison. Exact float equality is
/// useless against computed signals; this constant is deliberately not
/// configurable.
pub const CMP_EPSILON: f64 = 1e-9;

/// Total-order comparison predicate against the threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
}

impl Comparison {
    pub fn satisfied(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Gt => value > threshold,
            Self::Lt => value < threshold,
            Self::Ge => value >= threshold,
            Self::Le => value <= threshold,
            Self::Eq => (value - threshold).abs() <= CMP_EPSILON,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Eq => "==",
        }
    }
}

/// Span a breach must persist before the alert fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationWindow {
    /// Breach must hold for this many consecutive samples
    Samples(u32),
    /// Breach must hold for this long (by sample timestamps)
    Duration { ms: u64 },
}

/// How samples inside the window combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowAggregate {
    /// Every sample in the window must satisfy the comparison
    Each,
    /// The mean over the window must satisfy it (rate-style metrics)
    Mean,
}

/// Alert lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Ok,
    Pending,
    Triggered,
}

/// Mutable evaluation state for one enabled alert configuration.
///
/// Not shared: the engine serializes access per alert. Samples must arrive
/// in order per alert; the dedupe key drops exact replays.
#[derive(Debug, Clone)]
pub struct AlertState {
    pub status: AlertStatus,
    /// Breach samples accumulated while Pending: (observed_at_ms, value)
    buffer: VecDeque<(u64, f64)>,
    /// Timestamp of the first breach of the current Pending run
    pending_since_ms: Option<u64>,
    pub last_transition_at_ms: u64,
    pub last_notified_at_ms: Option<u64>,
    last_sample_key: Option<(u64, u64)>,
}

impl AlertState {
    pub fn new() -> Self {
        Self {
            status: AlertStatus::Ok,
            buffer: VecDeque::new(),
            pending_since_ms: None,
            last_transition_at_ms: 0,
            last_notified_at_ms: None,
            last_sample_key: None,
        }
    }

    /// Feed one sample through the state machine.
    ///
    /// `breach` is the comparison result against the effective threshold
    /// (already baseline-resolved by the engine). `renotify_interval_ms`
    /// throttles `Renotified` while continuously triggered.
    pub fn observe(
        &mut self,
        window: EvaluationWindow,
        aggregate: WindowAggregate,
        op: Comparison,
        threshold: f64,
        sample: &SignalSample,
        renotify_interval_ms: u64,
    ) -> Option<TransitionKind> {
        // Exact replay of an already-processed sample is a no-op
        if self.last_sample_key == Some(sample.dedupe_key()) {
            return None;
        }
        self.last_sample_key = Some(sample.dedupe_key());

        let breach = op.satisfied(sample.value, threshold);

        match self.status {
            AlertStatus::Ok => {
                if !breach {
                    return None;
                }
                self.status = AlertStatus::Pending;
                self.pending_since_ms = Some(sample.observed_at_ms);
                self.buffer.clear();
                self.buffer.push_back((sample.observed_at_ms, sample.value));
                self.try_promote(window, aggregate, op, threshold, sample.observed_at_ms)
            }
            AlertStatus::Pending => {
                if !breach && aggregate == WindowAggregate::Each {
                    // Transient breach: back to Ok, no event emitted
                    self.reset_to_ok(sample.observed_at_ms);
                    return None;
                }
                self.buffer.push_back((sample.observed_at_ms, sample.value));
                self.prune(window);
                self.try_promote(window, aggregate, op, threshold, sample.observed_at_ms)
            }
            AlertStatus::Triggered => {
                if !breach {
                    self.reset_to_ok(sample.observed_at_ms);
                    return Some(TransitionKind::Resolved);
                }
                // Re-entrant: no new trigger, only throttled re-notification
                let due = match self.last_notified_at_ms {
                    Some(last) => sample.observed_at_ms.saturating_sub(last) >= renotify_interval_ms,
                    None => true,
                };
                if due {
                    self.last_notified_at_ms = Some(sample.observed_at_ms);
                    Some(TransitionKind::Renotified)
                } else {
                    None
                }
            }
        }
    }

    /// Promote Pending to Triggered if the window is satisfied. In Mean
    /// mode a completed window whose mean does not breach resets to Ok.
    fn try_promote(
        &mut self,
        window: EvaluationWindow,
        aggregate: WindowAggregate,
        op: Comparison,
        threshold: f64,
        now_ms: u64,
    ) -> Option<TransitionKind> {
        if !self.window_complete(window, now_ms) {
            return None;
        }

        let satisfied = match aggregate {
            // Each: buffer only ever holds breaching samples
            WindowAggregate::Each => true,
            WindowAggregate::Mean => {
                let n = self.buffer.len().max(1) as f64;
                let mean = self.buffer.iter().map(|(_, v)| v).sum::<f64>() / n;
                op.satisfied(mean, threshold)
            }
        };

        if satisfied {
            self.status = AlertStatus::Triggered;
            self.last_transition_at_ms = now_ms;
            self.last_notified_at_ms = Some(now_ms);
            self.buffer.clear();
            self.pending_since_ms = None;
            Some(TransitionKind::Triggered)
        } else {
            self.reset_to_ok(now_ms);
            None
        }
    }

    fn window_complete(&self, window: EvaluationWindow, now_ms: u64) -> bool {
        match window {
            EvaluationWindow::Samples(n) => self.buffer.len() >= n as usize,
            EvaluationWindow::Duration { ms } => match self.pending_since_ms {
                Some(since) => now_ms.saturating_sub(since) >= ms,
                None => false,
            },
        }
    }

    /// Keep the buffer bounded to what the window can ever need
    fn prune(&mut self, window: EvaluationWindow) {
        match window {
            EvaluationWindow::Samples(n) => {
                while self.buffer.len() > n as usize {
                    self.buffer.pop_front();
                }
            }
            EvaluationWindow::Duration { ms } => {
                if let Some((newest, _)) = self.buffer.back().copied() {
                    let floor = newest.saturating_sub(ms);
                    while matches!(self.buffer.front(), Some((ts, _)) if *ts < floor) {
                        self.buffer.pop_front();
                    }
                }
            }
        }
    }

    fn reset_to_ok(&mut self, now_ms: u64) {
        self.status = AlertStatus::Ok;
        self.buffer.clear();
        self.pending_since_ms = None;
        self.last_transition_at_ms = now_ms;
    }
}

impl Default for AlertState {
    fn default() -> Self {
        Self::new()
    }
}
