//! Alert configuration store: validated CRUD with optimistic versioning
//!
//! Configurations are immutable snapshots. Reads hand out clones, so an
//! evaluation that started against version N keeps seeing version N even
//! if the owner saves version N+1 mid-flight. Writes validate first and
//! reject rather than storing anything malformed; a bad update leaves the
//! previous version fully in force.

use crate::core::errors::ConfigurationError;
use crate::core::types::{AlertId, MetricKind, OwnerId, Severity};
use crate::dispatch::channel::ChannelTarget;
use crate::engine::baseline::BaselineStat;
use crate::engine::state::{Comparison, EvaluationWindow, WindowAggregate};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// How an alert's threshold is expressed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Threshold {
    /// Fixed numeric bound
    Absolute { value: f64 },
    /// Percentage offset from a historical baseline statistic, resolved
    /// at evaluation time. `percent: 20.0` means 20% above the statistic,
    /// negative values sit below it.
    BaselineOffset { stat: BaselineStat, percent: f64 },
}

/// Complete definition of one alert, versioned for optimistic updates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfiguration {
    pub id: AlertId,
    pub owner: OwnerId,
    pub metric: MetricKind,
    pub op: Comparison,
    pub threshold: Threshold,
    pub window: EvaluationWindow,
    pub aggregate: WindowAggregate,
    pub severity: Severity,
    pub channels: Vec<ChannelTarget>,
    pub enabled: bool,
    pub version: u64,
}

/// Fields supplied when creating an alert; id and version are assigned
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAlert {
    pub metric: MetricKind,
    pub op: Comparison,
    pub threshold: Threshold,
    pub window: EvaluationWindow,
    pub aggregate: WindowAggregate,
    pub severity: Severity,
    pub channels: Vec<ChannelTarget>,
    pub enabled: bool,
}

/// Mutable fields of an update; the rest are carried over
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertUpdate {
    pub op: Comparison,
    pub threshold: Threshold,
    pub window: EvaluationWindow,
    pub aggregate: WindowAggregate,
    pub severity: Severity,
    pub channels: Vec<ChannelTarget>,
    pub enabled: bool,
    /// Version the caller read; the write fails if it is no longer current
    pub expected_version: u64,
}

fn validate(
    threshold: &Threshold,
    window: &EvaluationWindow,
    channels: &[ChannelTarget],
    enabled: bool,
) -> Result<(), ConfigurationError> {
    match *threshold {
        Threshold::Absolute { value } if !value.is_finite() => {
            return Err(ConfigurationError::NonFiniteThreshold { value });
        }
        Threshold::BaselineOffset { percent, .. } if !percent.is_finite() => {
            return Err(ConfigurationError::NonFinitePercent { percent });
        }
        _ => {}
    }
    match *window {
        EvaluationWindow::Samples(0) => return Err(ConfigurationError::EmptyWindow),
        EvaluationWindow::Duration { ms: 0 } => return Err(ConfigurationError::EmptyWindow),
        _ => {}
    }
    if enabled && channels.is_empty() {
        return Err(ConfigurationError::NoChannels);
    }
    Ok(())
}

/// In-memory alert store, safe for concurrent readers and writers
#[derive(Default)]
pub struct AlertRegistry {
    alerts: DashMap<AlertId, AlertConfiguration>,
    next_id: AtomicU64,
}

impl AlertRegistry {
    pub fn new() -> Self {
        Self {
            alerts: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn create(
        &self,
        owner: OwnerId,
        new: NewAlert,
    ) -> Result<AlertConfiguration, ConfigurationError> {
        validate(&new.threshold, &new.window, &new.channels, new.enabled)?;
        let id = AlertId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let config = AlertConfiguration {
            id,
            owner,
            metric: new.metric,
            op: new.op,
            threshold: new.threshold,
            window: new.window,
            aggregate: new.aggregate,
            severity: new.severity,
            channels: new.channels,
            enabled: new.enabled,
            version: 1,
        };
        self.alerts.insert(id, config.clone());
        info!("{} created on {} by {}", id, config.metric, config.owner);
        Ok(config)
    }

    /// Replace an alert's definition. Requires ownership and the version
    /// the caller last read; a concurrent save in between fails the write.
    pub fn update(
        &self,
        id: AlertId,
        owner: &OwnerId,
        update: AlertUpdate,
    ) -> Result<AlertConfiguration, ConfigurationError> {
        validate(
            &update.threshold,
            &update.window,
            &update.channels,
            update.enabled,
        )?;
        let mut entry = self
            .alerts
            .get_mut(&id)
            .ok_or(ConfigurationError::NotFound { id })?;
        if entry.owner != *owner {
            return Err(ConfigurationError::NotOwner {
                id,
                owner: owner.0.clone(),
            });
        }
        if entry.version != update.expected_version {
            return Err(ConfigurationError::VersionConflict {
                id,
                expected: update.expected_version,
                current: entry.version,
            });
        }
        entry.op = update.op;
        entry.threshold = update.threshold;
        entry.window = update.window;
        entry.aggregate = update.aggregate;
        entry.severity = update.severity;
        entry.channels = update.channels;
        entry.enabled = update.enabled;
        entry.version += 1;
        info!("{} updated to version {}", id, entry.version);
        Ok(entry.clone())
    }

    pub fn delete(&self, id: AlertId, owner: &OwnerId) -> Result<(), ConfigurationError> {
        let entry = self.alerts.get(&id).ok_or(ConfigurationError::NotFound { id })?;
        if entry.owner != *owner {
            return Err(ConfigurationError::NotOwner {
                id,
                owner: owner.0.clone(),
            });
        }
        drop(entry);
        self.alerts.remove(&id);
        info!("{} deleted", id);
        Ok(())
    }

    pub fn set_enabled(
        &self,
        id: AlertId,
        owner: &OwnerId,
        enabled: bool,
    ) -> Result<AlertConfiguration, ConfigurationError> {
        let mut entry = self
            .alerts
            .get_mut(&id)
            .ok_or(ConfigurationError::NotFound { id })?;
        if entry.owner != *owner {
            return Err(ConfigurationError::NotOwner {
                id,
                owner: owner.0.clone(),
            });
        }
        if entry.enabled != enabled {
            if enabled && entry.channels.is_empty() {
                return Err(ConfigurationError::NoChannels);
            }
            entry.enabled = enabled;
            entry.version += 1;
        }
        Ok(entry.clone())
    }

    /// Snapshot of one configuration, detached from later writes
    pub fn get(&self, id: AlertId) -> Option<AlertConfiguration> {
        self.alerts.get(&id).map(|e| e.clone())
    }

    pub fn list_for_owner(&self, owner: &OwnerId) -> Vec<AlertConfiguration> {
        let mut out: Vec<AlertConfiguration> = self
            .alerts
            .iter()
            .filter(|e| e.owner == *owner)
            .map(|e| e.clone())
            .collect();
        out.sort_by_key(|c| c.id);
        out
    }

    /// Enabled configurations watching the given metric
    pub fn enabled_for_metric(&self, metric: MetricKind) -> Vec<AlertConfiguration> {
        self.alerts
            .iter()
            .filter(|e| e.enabled && e.metric == metric)
            .map(|e| e.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }
}
