//! Exponential backoff for notification retries
//!
//! Attempt-bounded by construction: unbounded retry of a failing channel
//! is not allowed anywhere in the dispatcher, so the policy has no
//! "unlimited" escape hatch. Jitter spreads retries of simultaneously
//! failing deliveries.

use rand::Rng;
use std::time::Duration;

/// Retry policy for one delivery attempt set
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Cap on any single delay
    pub max_delay: Duration,
    /// Growth factor per retry
    pub multiplier: f64,
    /// Total attempts including the first (always finite)
    pub max_attempts: u32,
    /// Randomization applied to each delay (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            max_attempts: 4,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Tight delays for tests
    pub fn fast() -> Self {
        Self {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            multiplier: 2.0,
            max_attempts: 3,
            jitter_factor: 0.0,
        }
    }
}

/// Delay sequence for one delivery's retries
pub struct Backoff {
    policy: RetryPolicy,
    attempt: u32,
    current_delay: Duration,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            current_delay: policy.initial_delay,
            attempt: 0,
            policy,
        }
    }

    /// Delay before the next retry, or None when attempts are exhausted.
    /// The first call corresponds to the retry after attempt 1 failed.
    pub fn next_delay(&mut self) -> Option<Duration> {
        // attempt N has N-1 retries behind it
        if self.attempt + 1 >= self.policy.max_attempts {
            return None;
        }

        let delay = self.jittered(self.current_delay);
        self.attempt += 1;
        self.current_delay = std::cmp::min(
            Duration::from_secs_f64(self.current_delay.as_secs_f64() * self.policy.multiplier),
            self.policy.max_delay,
        );
        Some(delay)
    }

    /// Attempts consumed so far (retries, not counting the first try)
    pub fn retries(&self) -> u32 {
        self.attempt
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.policy.jitter_factor == 0.0 {
            return delay;
        }
        let mut rng = rand::thread_rng();
        let jitter = rng.gen::<f64>() * self.policy.jitter_factor;
        let multiplier = 1.0 + (jitter - self.policy.jitter_factor / 2.0);
        Duration::from_secs_f64(delay.as_secs_f64() * multiplier)
    }
}
