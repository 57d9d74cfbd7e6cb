//! Layered runtime configuration
//!
//! TOML file, overridden by HEIMDALL__ environment variables, validated
//! before anything starts. Sections use plain numeric fields so they read
//! naturally in TOML; `*_config()` accessors convert them into the typed
//! configs the components take.

use crate::dispatch::dispatcher::DispatcherConfig;
use crate::engine::EngineConfig;
use crate::hub::HubConfig;
use crate::monitoring::MetricsServerConfig;
use crate::ratelimit::RateLimiterConfig;
use crate::resilience::RetryPolicy;
use anyhow::{Context, Result};
use config::{Config as ConfigLoader, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub dispatch: DispatchSection,
    #[serde(default)]
    pub hub: HubSection,
    #[serde(default)]
    pub ratelimit: RateLimitSection,
    #[serde(default)]
    pub monitoring: MonitoringSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    /// Floor between repeat notifications for a still-breaching alert
    pub min_renotify_interval_secs: u64,
    /// Baseline statistics cache TTL
    pub baseline_ttl_secs: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            min_renotify_interval_secs: 60,
            baseline_ttl_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchSection {
    pub per_channel_outstanding: usize,
    pub retry_initial_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub retry_multiplier: f64,
    pub retry_max_attempts: u32,
    pub retry_jitter_factor: f64,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            per_channel_outstanding: 8,
            retry_initial_delay_ms: 200,
            retry_max_delay_ms: 5_000,
            retry_multiplier: 2.0,
            retry_max_attempts: 4,
            retry_jitter_factor: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSection {
    pub queue_capacity: usize,
    pub replay_capacity: usize,
    pub drop_report_interval_secs: u64,
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            replay_capacity: 256,
            drop_report_interval_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSection {
    /// Burst allowance per identity
    pub capacity: f64,
    /// Sustained tokens per second
    pub refill_per_sec: f64,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            capacity: 20.0,
            refill_per_sec: 5.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringSection {
    pub enable_prometheus: bool,
    pub metrics_addr: String,
    pub log_level: String,
    pub json_logs: bool,
}

impl Default for MonitoringSection {
    fn default() -> Self {
        Self {
            enable_prometheus: true,
            metrics_addr: "127.0.0.1:9090".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl Config {
    /// Load configuration from file with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = ConfigLoader::builder()
            .add_source(File::from(path.as_ref()))
            // Override with environment variables (HEIMDALL__)
            .add_source(Environment::with_prefix("HEIMDALL").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let cfg: Config = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from the default location (./config/default.toml)
    pub fn load_default() -> Result<Self> {
        Self::load("config/default.toml")
    }

    pub fn validate(&self) -> Result<()> {
        if self.hub.queue_capacity == 0 {
            anyhow::bail!("hub.queue_capacity must be at least 1");
        }
        if self.hub.replay_capacity == 0 {
            anyhow::bail!("hub.replay_capacity must be at least 1");
        }
        if self.dispatch.retry_max_attempts == 0 {
            anyhow::bail!("dispatch.retry_max_attempts must be at least 1");
        }
        if self.dispatch.retry_multiplier < 1.0 {
            anyhow::bail!(
                "dispatch.retry_multiplier must be >= 1.0, got {}",
                self.dispatch.retry_multiplier
            );
        }
        if !(0.0..=1.0).contains(&self.dispatch.retry_jitter_factor) {
            anyhow::bail!(
                "dispatch.retry_jitter_factor must be in [0.0, 1.0], got {}",
                self.dispatch.retry_jitter_factor
            );
        }
        if self.ratelimit.capacity <= 0.0 || self.ratelimit.refill_per_sec <= 0.0 {
            anyhow::bail!("ratelimit capacity and refill_per_sec must be positive");
        }
        self.monitoring
            .metrics_addr
            .parse::<std::net::SocketAddr>()
            .with_context(|| {
                format!(
                    "monitoring.metrics_addr '{}' is not a socket address",
                    self.monitoring.metrics_addr
                )
            })?;
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            min_renotify_interval: Duration::from_secs(self.engine.min_renotify_interval_secs),
            baseline_ttl: Duration::from_secs(self.engine.baseline_ttl_secs),
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            retry: RetryPolicy {
                initial_delay: Duration::from_millis(self.dispatch.retry_initial_delay_ms),
                max_delay: Duration::from_millis(self.dispatch.retry_max_delay_ms),
                multiplier: self.dispatch.retry_multiplier,
                max_attempts: self.dispatch.retry_max_attempts,
                jitter_factor: self.dispatch.retry_jitter_factor,
            },
            per_channel_outstanding: self.dispatch.per_channel_outstanding,
        }
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            queue_capacity: self.hub.queue_capacity,
            replay_capacity: self.hub.replay_capacity,
            drop_report_interval: Duration::from_secs(self.hub.drop_report_interval_secs),
        }
    }

    pub fn limiter_config(&self) -> RateLimiterConfig {
        RateLimiterConfig {
            capacity: self.ratelimit.capacity,
            refill_per_sec: self.ratelimit.refill_per_sec,
        }
    }

    pub fn metrics_server_config(&self) -> Result<MetricsServerConfig> {
        Ok(MetricsServerConfig {
            listen_addr: self
                .monitoring
                .metrics_addr
                .parse()
                .context("Invalid metrics listen address")?,
            metrics_path: "/metrics".to_string(),
        })
    }
}
