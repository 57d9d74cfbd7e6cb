//! Per-identity rate limiting
//!
//! Token bucket per caller identity, guarding every externally reachable
//! entry point including WebSocket connection attempts. The limiter never
//! blocks: it answers permit or deny, and a denial carries the time until
//! the next token so the caller can back off or surface a retry hint.

use crate::core::errors::CapacityExceeded;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::warn;

/// Caller identity classes sharing one bucket each
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    User(String),
    ApiKey(String),
    /// All unauthenticated callers share one bucket
    Anonymous,
}

impl Identity {
    fn key(&self) -> String {
        match self {
            Self::User(u) => format!("user:{u}"),
            Self::ApiKey(k) => format!("api:{k}"),
            Self::Anonymous => "anon".to_string(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Rate limiter configuration
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    /// Bucket capacity (burst allowance)
    pub capacity: f64,
    /// Sustained refill rate, tokens per second
    pub refill_per_sec: f64,
}

impl RateLimiterConfig {
    /// Tight limits for anonymous-heavy deployments
    pub fn conservative() -> Self {
        Self {
            capacity: 10.0,
            refill_per_sec: 2.0,
        }
    }

    /// Standard limits
    pub fn standard() -> Self {
        Self {
            capacity: 60.0,
            refill_per_sec: 20.0,
        }
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::standard()
    }
}

/// Outcome of a rate check
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    Permit,
    Deny { retry_after: Duration },
}

impl Decision {
    pub fn is_permit(&self) -> bool {
        matches!(self, Decision::Permit)
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket rate limiter keyed per identity
pub struct RateLimiter {
    config: RateLimiterConfig,
    buckets: DashMap<String, Mutex<Bucket>>,
    total_allowed: AtomicU64,
    total_denied: AtomicU64,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
            total_allowed: AtomicU64::new(0),
            total_denied: AtomicU64::new(0),
        }
    }

    /// Check one request against the identity's bucket. Never blocks.
    pub fn check(&self, identity: &Identity) -> Decision {
        let key = identity.key();
        let bucket = self.buckets.entry(key).or_insert_with(|| {
            Mutex::new(Bucket {
                tokens: self.config.capacity,
                last_refill: Instant::now(),
            })
        });

        let mut bucket = bucket.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens =
            (bucket.tokens + elapsed * self.config.refill_per_sec).min(self.config.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            self.total_allowed.fetch_add(1, Ordering::Relaxed);
            Decision::Permit
        } else {
            let deficit = 1.0 - bucket.tokens;
            let retry_after = Duration::from_secs_f64(deficit / self.config.refill_per_sec);
            let denied = self.total_denied.fetch_add(1, Ordering::Relaxed) + 1;
            if denied % 100 == 1 {
                warn!(
                    "rate limit exceeded for {} ({} denied total)",
                    identity, denied
                );
            }
            Decision::Deny { retry_after }
        }
    }

    /// `check`, surfaced as the capacity error callers propagate
    pub fn check_or_err(&self, identity: &Identity) -> Result<(), CapacityExceeded> {
        match self.check(identity) {
            Decision::Permit => Ok(()),
            Decision::Deny { retry_after } => Err(CapacityExceeded {
                identity: identity.key(),
                retry_after,
            }),
        }
    }

    pub fn total_allowed(&self) -> u64 {
        self.total_allowed.load(Ordering::Relaxed)
    }

    pub fn total_denied(&self) -> u64 {
        self.total_denied.load(Ordering::Relaxed)
    }

    /// Number of identities with a bucket
    pub fn tracked_identities(&self) -> usize {
        self.buckets.len()
    }

    /// Drop buckets idle for at least `max_idle`, returning how many
    /// were removed. A bucket is only dropped once it has refilled to
    /// capacity, where it is indistinguishable from a fresh one, so
    /// eviction can never hand an identity extra tokens.
    pub fn prune_idle(&self, max_idle: Duration) -> usize {
        let before = self.buckets.len();
        let now = Instant::now();
        self.buckets.retain(|_, bucket| {
            let bucket = bucket.lock();
            let idle = now.saturating_duration_since(bucket.last_refill);
            idle < max_idle
                || bucket.tokens + idle.as_secs_f64() * self.config.refill_per_sec
                    < self.config.capacity
        });
        before - self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(capacity: f64, refill: f64) -> RateLimiter {
        RateLimiter::new(RateLimiterConfig {
            capacity,
            refill_per_sec: refill,
        })
    }

    #[test]
    fn test_burst_then_deny() {
        let rl = limiter(5.0, 1.0);
        let id = Identity::User("alice".into());

        for _ in 0..5 {
            assert!(rl.check(&id).is_permit());
        }
        match rl.check(&id) {
            Decision::Deny { retry_after } => {
                assert!(retry_after > Duration::ZERO);
                assert!(retry_after <= Duration::from_secs(1));
            }
            Decision::Permit => panic!("sixth request should be denied"),
        }
        assert_eq!(rl.total_allowed(), 5);
        assert_eq!(rl.total_denied(), 1);
    }

    #[test]
    fn test_identities_are_isolated() {
        let rl = limiter(2.0, 1.0);
        let alice = Identity::User("alice".into());
        let bob = Identity::User("bob".into());

        assert!(rl.check(&alice).is_permit());
        assert!(rl.check(&alice).is_permit());
        assert!(!rl.check(&alice).is_permit());

        // Alice exhausting her bucket does not touch Bob's
        assert!(rl.check(&bob).is_permit());
        assert_eq!(rl.tracked_identities(), 2);
    }

    #[test]
    fn test_refill_restores_tokens() {
        let rl = limiter(1.0, 50.0);
        let id = Identity::ApiKey("k1".into());

        assert!(rl.check(&id).is_permit());
        assert!(!rl.check(&id).is_permit());

        std::thread::sleep(Duration::from_millis(40));
        assert!(rl.check(&id).is_permit());
    }

    #[test]
    fn test_check_or_err_carries_retry_guidance() {
        let rl = limiter(1.0, 2.0);
        let id = Identity::Anonymous;

        assert!(rl.check_or_err(&id).is_ok());
        let err = rl.check_or_err(&id).unwrap_err();
        assert_eq!(err.identity, "anon");
        assert!(err.retry_after <= Duration::from_millis(500));
    }

    #[test]
    fn test_prune_drops_refilled_idle_buckets() {
        let rl = limiter(1.0, 100.0);
        rl.check(&Identity::User("alice".into()));
        rl.check(&Identity::User("bob".into()));
        assert_eq!(rl.tracked_identities(), 2);

        // Nothing is idle past the horizon yet
        assert_eq!(rl.prune_idle(Duration::from_secs(60)), 0);

        std::thread::sleep(Duration::from_millis(30));
        // Both idle and fully refilled (1 token at 100/s)
        assert_eq!(rl.prune_idle(Duration::from_millis(10)), 2);
        assert_eq!(rl.tracked_identities(), 0);
    }

    #[test]
    fn test_prune_keeps_buckets_still_owing_tokens() {
        let rl = limiter(5.0, 0.01);
        rl.check(&Identity::ApiKey("k1".into()));

        std::thread::sleep(Duration::from_millis(20));
        // Idle, but far from refilled at 0.01 tokens per second
        assert_eq!(rl.prune_idle(Duration::from_millis(5)), 0);
        assert_eq!(rl.tracked_identities(), 1);
    }

    #[test]
    fn test_concurrent_checks_count_all_requests() {
        let rl = std::sync::Arc::new(limiter(1000.0, 1000.0));
        let mut handles = Vec::new();
        for i in 0..4 {
            let rl = rl.clone();
            handles.push(std::thread::spawn(move || {
                let id = Identity::User(format!("user-{i}"));
                for _ in 0..50 {
                    rl.check(&id);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(rl.total_allowed() + rl.total_denied(), 200);
    }
}
