//! Historical baseline statistics for relative thresholds
//!
//! Alerts can express their threshold as an offset from a metric's
//! historical baseline ("20% above the 7-day mean"). Computing a baseline
//! is expensive, so lookups go through the shared single-flight cache:
//! concurrent evaluations of the same metric wait on one computation, and
//! the result is reused until its TTL lapses.

use crate::cache::ResultCache;
use crate::core::errors::CacheComputeError;
use crate::core::types::MetricKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Summary statistics over a metric's recent history
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaselineStats {
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub p95: f64,
    pub p99: f64,
}

impl BaselineStats {
    pub fn stat(&self, which: BaselineStat) -> f64 {
        match which {
            BaselineStat::Mean => self.mean,
            BaselineStat::Median => self.median,
            BaselineStat::StdDev => self.std_dev,
            BaselineStat::P95 => self.p95,
            BaselineStat::P99 => self.p99,
        }
    }
}

/// Which baseline statistic a relative threshold keys off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineStat {
    Mean,
    Median,
    StdDev,
    P95,
    P99,
}

/// Source of baseline statistics, typically backed by a historical store
#[async_trait]
pub trait BaselineProvider: Send + Sync {
    async fn baseline(&self, metric: MetricKind) -> anyhow::Result<BaselineStats>;
}

/// TTL-cached, single-flight front for a [`BaselineProvider`]
pub struct CachedBaselines {
    provider: Arc<dyn BaselineProvider>,
    cache: ResultCache<BaselineStats>,
    ttl: Duration,
}

impl CachedBaselines {
    pub fn new(provider: Arc<dyn BaselineProvider>, ttl: Duration) -> Self {
        Self {
            provider,
            cache: ResultCache::new(),
            ttl,
        }
    }

    fn key(metric: MetricKind) -> String {
        format!("baseline:{metric}")
    }

    pub async fn get(&self, metric: MetricKind) -> Result<BaselineStats, CacheComputeError> {
        let provider = self.provider.clone();
        self.cache
            .get_or_compute(&Self::key(metric), self.ttl, move || async move {
                provider.baseline(metric).await
            })
            .await
    }

    /// Force the next lookup to recompute. An in-flight computation is
    /// left to finish.
    pub fn invalidate(&self, metric: MetricKind) {
        self.cache.invalidate(&Self::key(metric));
    }

    pub fn cache(&self) -> &ResultCache<BaselineStats> {
        &self.cache
    }
}
