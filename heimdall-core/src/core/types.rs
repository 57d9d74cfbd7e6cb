//! Core domain types shared across the alerting pipeline
//!
//! Everything here is plain data: samples coming in from the signal
//! pipeline, alert transition events going out of the evaluation engine,
//! and the identifiers that tie them together. Serialization derives are
//! on every wire-visible type so the hub and record store can move them
//! without adapter code.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Known signal/metric kinds produced by the upstream computation pipeline.
///
/// This is a closed set: samples carrying any other metric string are
/// rejected at intake with an `UnknownMetric` error and counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Transactions per second over recent blocks
    TxThroughput,
    /// Median fee rate (sat/vB or gwei depending on chain)
    FeeRate,
    /// Unconfirmed transaction count in the mempool
    MempoolDepth,
    /// Net exchange inflow minus outflow
    ExchangeNetFlow,
    /// Unique active addresses per block window
    ActiveAddresses,
    /// Seconds between consecutive blocks
    BlockInterval,
    /// Validator/node CPU usage percentage
    CpuUsage,
    /// Network hash rate estimate
    HashRate,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TxThroughput => "tx_throughput",
            Self::FeeRate => "fee_rate",
            Self::MempoolDepth => "mempool_depth",
            Self::ExchangeNetFlow => "exchange_net_flow",
            Self::ActiveAddresses => "active_addresses",
            Self::BlockInterval => "block_interval",
            Self::CpuUsage => "cpu_usage",
            Self::HashRate => "hash_rate",
        }
    }

    /// Parse an upstream metric string. Returns None for unknown metrics.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tx_throughput" => Some(Self::TxThroughput),
            "fee_rate" => Some(Self::FeeRate),
            "mempool_depth" => Some(Self::MempoolDepth),
            "exchange_net_flow" => Some(Self::ExchangeNetFlow),
            "active_addresses" => Some(Self::ActiveAddresses),
            "block_interval" => Some(Self::BlockInterval),
            "cpu_usage" => Some(Self::CpuUsage),
            "hash_rate" => Some(Self::HashRate),
            _ => None,
        }
    }

    /// Coarse category used for subscription filtering and topic routing.
    pub fn category(&self) -> SignalCategory {
        match self {
            Self::TxThroughput | Self::ActiveAddresses | Self::BlockInterval | Self::HashRate => {
                SignalCategory::Network
            }
            Self::FeeRate | Self::MempoolDepth => SignalCategory::Mempool,
            Self::ExchangeNetFlow => SignalCategory::Exchange,
            Self::CpuUsage => SignalCategory::Infra,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse grouping of metrics for live-feed filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalCategory {
    Network,
    Mempool,
    Exchange,
    Infra,
}

impl SignalCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Mempool => "mempool",
            Self::Exchange => "exchange",
            Self::Infra => "infra",
        }
    }
}

/// Alert severity levels, ordered from least to most urgent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info = 0,
    Warning = 1,
    Error = 2,
    Critical = 3,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARN",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }
}

/// Identifier for an alert configuration, assigned by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AlertId(pub u64);

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "alert-{}", self.0)
    }
}

/// Authenticated owner identity, supplied by the external auth collaborator
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(pub String);

impl OwnerId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One timestamped observation from the upstream signal pipeline.
///
/// Immutable once constructed. `(block_height, observed_at_ms)` acts as a
/// deduplication key: replaying the same sample is a no-op in the engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalSample {
    pub metric: MetricKind,
    pub value: f64,
    pub block_height: u64,
    /// Unix epoch milliseconds at observation time
    pub observed_at_ms: u64,
}

impl SignalSample {
    pub fn new(metric: MetricKind, value: f64, block_height: u64, observed_at_ms: u64) -> Self {
        Self {
            metric,
            value,
            block_height,
            observed_at_ms,
        }
    }

    /// Key used to drop exact replays of an already-processed sample
    pub fn dedupe_key(&self) -> (u64, u64) {
        (self.block_height, self.observed_at_ms)
    }
}

/// Kind of alert state transition emitted by the evaluation engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    /// Breach persisted across the full evaluation window
    Triggered,
    /// Still breaching, re-notification throttle elapsed
    Renotified,
    /// Breach cleared after having triggered
    Resolved,
}

impl TransitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Triggered => "triggered",
            Self::Renotified => "renotified",
            Self::Resolved => "resolved",
        }
    }
}

/// Domain event produced when an alert crosses a state-machine edge that
/// the outside world cares about. Consumed by the dispatcher and the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub alert_id: AlertId,
    pub owner: OwnerId,
    pub kind: TransitionKind,
    pub metric: MetricKind,
    pub severity: Severity,
    /// Sample value that caused the transition
    pub value: f64,
    /// Effective threshold at evaluation time (baseline-resolved if applicable)
    pub threshold: f64,
    pub block_height: u64,
    pub observed_at_ms: u64,
}

/// Topic a hub subscriber can follow, one sequence space per topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "category")]
pub enum Topic {
    /// Raw signal feed for one category
    Signals(SignalCategory),
    /// Alert trigger/resolve event feed
    Alerts,
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Signals(cat) => write!(f, "signals.{}", cat.as_str()),
            Topic::Alerts => f.write_str("alerts"),
        }
    }
}

/// Event flowing through the subscription hub
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    Signal(SignalSample),
    Alert(TransitionEvent),
}

impl HubEvent {
    pub fn topic(&self) -> Topic {
        match self {
            HubEvent::Signal(s) => Topic::Signals(s.metric.category()),
            HubEvent::Alert(_) => Topic::Alerts,
        }
    }

    pub fn metric(&self) -> MetricKind {
        match self {
            HubEvent::Signal(s) => s.metric,
            HubEvent::Alert(e) => e.metric,
        }
    }

    pub fn category(&self) -> SignalCategory {
        self.metric().category()
    }

    /// Severity only exists for alert events
    pub fn severity(&self) -> Option<Severity> {
        match self {
            HubEvent::Signal(_) => None,
            HubEvent::Alert(e) => Some(e.severity),
        }
    }
}
