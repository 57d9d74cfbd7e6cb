//! Coalescing of rapid trigger/resolve sequences
//!
//! Explicit merge rule at the dispatcher boundary: for each alert, only
//! the latest transition that has not yet left the dispatcher is worth
//! delivering. A queued delivery checks its generation once it acquires
//! channel capacity; if a newer transition registered in the meantime, the
//! older one is suppressed instead of sent.

use crate::core::types::AlertId;
use dashmap::DashMap;

/// Generation gate, one monotone counter per alert
#[derive(Default)]
pub struct CoalesceGate {
    latest: DashMap<AlertId, u64>,
}

impl CoalesceGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new transition for the alert, superseding any queued
    /// older one. Returns this transition's generation.
    pub fn register(&self, alert_id: AlertId) -> u64 {
        let mut entry = self.latest.entry(alert_id).or_insert(0);
        *entry += 1;
        *entry
    }

    /// True if `generation` is still the newest registered transition
    pub fn is_current(&self, alert_id: AlertId, generation: u64) -> bool {
        self.latest
            .get(&alert_id)
            .map(|g| *g == generation)
            .unwrap_or(false)
    }

    /// Forget an alert entirely (configuration deleted)
    pub fn forget(&self, alert_id: AlertId) {
        self.latest.remove(&alert_id);
    }

    /// Number of alerts with live coalescing state
    pub fn tracked_alerts(&self) -> usize {
        self.latest.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newer_generation_supersedes() {
        let gate = CoalesceGate::new();
        let g1 = gate.register(AlertId(1));
        assert!(gate.is_current(AlertId(1), g1));

        let g2 = gate.register(AlertId(1));
        assert!(!gate.is_current(AlertId(1), g1));
        assert!(gate.is_current(AlertId(1), g2));
    }

    #[test]
    fn test_alerts_are_independent() {
        let gate = CoalesceGate::new();
        let a = gate.register(AlertId(1));
        let b = gate.register(AlertId(2));
        gate.register(AlertId(1));

        assert!(!gate.is_current(AlertId(1), a));
        assert!(gate.is_current(AlertId(2), b));
    }

    #[test]
    fn test_forget_clears_state() {
        let gate = CoalesceGate::new();
        let g = gate.register(AlertId(1));
        gate.forget(AlertId(1));
        assert!(!gate.is_current(AlertId(1), g));
    }
}
