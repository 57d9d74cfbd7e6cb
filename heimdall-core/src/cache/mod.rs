//! Single-flight result cache
//!
//! TTL memoization that shields expensive aggregate computations (baseline
//! statistics, feedback rollups) from duplicate concurrent work: for any
//! key, at most one computation is in flight, and every concurrent caller
//! for that key receives the same outcome. Failures propagate to all
//! waiters and store nothing, so the next caller retries. A computation
//! whose caller is cancelled mid-flight clears its slot the same way.
//!
//! `invalidate` removes completed entries only; it never cancels an
//! in-flight computation. A writer that must not trust a computation that
//! raced its write invalidates again once the write is durable.

use crate::core::errors::CacheComputeError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;

type Outcome<V> = Option<Result<V, CacheComputeError>>;

enum Slot<V> {
    Ready {
        value: V,
        expires_at: Instant,
    },
    /// In-flight computation. The epoch identifies this particular
    /// flight so stale cleanup can never evict a successor's slot.
    Pending {
        rx: watch::Receiver<Outcome<V>>,
        epoch: u64,
    },
}

enum Action<V> {
    Hit(V),
    Wait {
        rx: watch::Receiver<Outcome<V>>,
        epoch: u64,
    },
    Compute {
        tx: watch::Sender<Outcome<V>>,
        epoch: u64,
    },
}

/// Clears the pending slot if the computing future is dropped before it
/// publishes, so a cancelled computation cannot wedge the key.
struct PendingGuard<'a, V> {
    cache: &'a ResultCache<V>,
    key: &'a str,
    epoch: u64,
    armed: bool,
}

impl<V> Drop for PendingGuard<'_, V> {
    fn drop(&mut self) {
        if self.armed {
            self.cache.remove_pending(self.key, self.epoch);
        }
    }
}

/// Counter snapshot for monitoring
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub invalidations: u64,
    pub entries: usize,
}

/// Single-flight memoization cache keyed by string
pub struct ResultCache<V> {
    entries: Mutex<HashMap<String, Slot<V>>>,
    next_epoch: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    invalidations: AtomicU64,
}

impl<V> ResultCache<V> {
    /// Remove the pending slot for `key`, but only if it still belongs
    /// to the flight identified by `epoch`.
    fn remove_pending(&self, key: &str, epoch: u64) {
        let mut entries = self.entries.lock();
        if matches!(entries.get(key), Some(Slot::Pending { epoch: e, .. }) if *e == epoch) {
            entries.remove(key);
        }
    }
}

impl<V> ResultCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_epoch: AtomicU64::new(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    /// Return a fresh cached value, or compute it exactly once.
    ///
    /// Concurrent callers for the same key await the single in-flight
    /// computation instead of re-invoking `compute`.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<V, CacheComputeError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>>,
    {
        let action = {
            let mut entries = self.entries.lock();
            match entries.get(key) {
                Some(Slot::Ready { value, expires_at }) if *expires_at > Instant::now() => {
                    Action::Hit(value.clone())
                }
                Some(Slot::Pending { rx, epoch }) => Action::Wait {
                    rx: rx.clone(),
                    epoch: *epoch,
                },
                // Missing or expired: this caller computes
                _ => {
                    let (tx, rx) = watch::channel(None);
                    let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
                    entries.insert(key.to_string(), Slot::Pending { rx, epoch });
                    Action::Compute { tx, epoch }
                }
            }
        };

        match action {
            Action::Hit(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(value)
            }
            Action::Wait { mut rx, epoch } => {
                self.coalesced.fetch_add(1, Ordering::Relaxed);
                loop {
                    if let Some(outcome) = rx.borrow_and_update().clone() {
                        return outcome;
                    }
                    if rx.changed().await.is_err() {
                        // Computing task dropped without publishing.
                        // Clear the dead slot so the next caller
                        // computes instead of joining the same corpse.
                        self.remove_pending(key, epoch);
                        return Err(CacheComputeError {
                            key: key.to_string(),
                            message: "computation abandoned".to_string(),
                        });
                    }
                }
            }
            Action::Compute { tx, epoch } => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                let mut guard = PendingGuard {
                    cache: self,
                    key,
                    epoch,
                    armed: true,
                };
                let computed = compute().await;
                guard.armed = false;
                match computed {
                    Ok(value) => {
                        {
                            let mut entries = self.entries.lock();
                            entries.insert(
                                key.to_string(),
                                Slot::Ready {
                                    value: value.clone(),
                                    expires_at: Instant::now() + ttl,
                                },
                            );
                        }
                        let _ = tx.send(Some(Ok(value.clone())));
                        Ok(value)
                    }
                    Err(e) => {
                        self.remove_pending(key, epoch);
                        let err = CacheComputeError {
                            key: key.to_string(),
                            message: format!("{e:#}"),
                        };
                        let _ = tx.send(Some(Err(err.clone())));
                        Err(err)
                    }
                }
            }
        }
    }

    /// Remove a completed entry immediately. In-flight computations are
    /// left untouched.
    pub fn invalidate(&self, key: &str) {
        let mut entries = self.entries.lock();
        if matches!(entries.get(key), Some(Slot::Ready { .. })) {
            entries.remove(key);
            self.invalidations.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            entries: self.entries.lock().len(),
        }
    }
}

impl<V> Default for ResultCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_hit_after_compute() {
        let cache: ResultCache<u64> = ResultCache::new();
        let v = cache
            .get_or_compute("k", Duration::from_secs(60), || async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(v, 7);

        let v = cache
            .get_or_compute("k", Duration::from_secs(60), || async {
                panic!("must not recompute a fresh entry")
            })
            .await
            .unwrap();
        assert_eq!(v, 7);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_ttl_expiry_recomputes() {
        let cache: ResultCache<u64> = ResultCache::new();
        let calls = AtomicU32::new(0);

        for _ in 0..2 {
            cache
                .get_or_compute("baseline:cpu", Duration::from_millis(20), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(1)
                })
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        // Entry expired between calls: recomputation, not a stale hit
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_callers_single_flight() {
        let cache: Arc<ResultCache<u64>> = Arc::new(ResultCache::new());
        let executions = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let executions = executions.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("expensive", Duration::from_secs(60), || async move {
                        executions.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Ok(42)
                    })
                    .await
            }));
        }

        for h in handles {
            assert_eq!(h.await.unwrap().unwrap(), 42);
        }
        assert_eq!(executions.load(Ordering::SeqCst), 1);
        assert!(cache.stats().coalesced >= 1);
    }

    #[tokio::test]
    async fn test_failure_propagates_and_stores_nothing() {
        let cache: Arc<ResultCache<u64>> = Arc::new(ResultCache::new());

        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                cache
                    .get_or_compute("flaky", Duration::from_secs(60), || async {
                        panic!("waiter must coalesce, not compute")
                    })
                    .await
            })
        };

        let err = cache
            .get_or_compute("flaky", Duration::from_secs(60), || async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Err::<u64, _>(anyhow::anyhow!("upstream down"))
            })
            .await
            .unwrap_err();
        assert!(err.message.contains("upstream down"));

        // Waiter observed the same failure
        let waited = waiter.await.unwrap().unwrap_err();
        assert!(waited.message.contains("upstream down"));

        // No entry stored: next caller retries and can succeed
        let v = cache
            .get_or_compute("flaky", Duration::from_secs(60), || async { Ok(9) })
            .await
            .unwrap();
        assert_eq!(v, 9);
    }

    #[tokio::test]
    async fn test_cancelled_computation_releases_the_key() {
        let cache: Arc<ResultCache<u64>> = Arc::new(ResultCache::new());

        let computing = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute("baseline:fee_rate", Duration::from_secs(60), || async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(1)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        computing.abort();
        assert!(computing.await.unwrap_err().is_cancelled());

        // The key is free again: the next caller computes, not waits
        let v = cache
            .get_or_compute("baseline:fee_rate", Duration::from_secs(60), || async { Ok(9) })
            .await
            .unwrap();
        assert_eq!(v, 9);
    }

    #[tokio::test]
    async fn test_invalidate_removes_completed_entry() {
        let cache: ResultCache<u64> = ResultCache::new();
        let calls = AtomicU32::new(0);

        for _ in 0..2 {
            cache
                .get_or_compute("agg", Duration::from_secs(60), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(5)
                })
                .await
                .unwrap();
            cache.invalidate("agg");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().invalidations, 2);
    }

    #[tokio::test]
    async fn test_invalidate_does_not_cancel_in_flight() {
        let cache: Arc<ResultCache<u64>> = Arc::new(ResultCache::new());

        let computing = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute("slow", Duration::from_secs(60), || async {
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Ok(11)
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.invalidate("slow"); // racing invalidate, entry still pending

        assert_eq!(computing.await.unwrap().unwrap(), 11);
        // The in-flight result was stored despite the racing invalidate
        let v = cache
            .get_or_compute("slow", Duration::from_secs(60), || async {
                panic!("should be a hit")
            })
            .await
            .unwrap();
        assert_eq!(v, 11);
    }
}
