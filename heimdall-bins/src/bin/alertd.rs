//! Heimdall alert daemon
//!
//! Wires the full pipeline together behind a synthetic signal feed:
//! intake -> evaluation engine -> dispatcher + subscription hub, with
//! Prometheus metrics exported for scraping. Production deployments
//! replace the synthetic feed with the real upstream signal pipeline and
//! the log channels with real transports.

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use heimdall_core::config::Config;
use heimdall_core::core::ConnectionLost;
use heimdall_core::dispatch::{ChannelKind, ChannelTarget, InMemoryRecordStore, LogChannel};
use heimdall_core::engine::{
    BaselineProvider, BaselineStats, Comparison, EvaluationWindow, NewAlert, Threshold,
    WindowAggregate,
};
use heimdall_core::hub::{ConnectionRegistry, Frame, FrameSink, SubscriptionFilter};
use heimdall_core::intake::RawSignalEvent;
use heimdall_core::monitoring::{MetricsRegistry, MetricsServer};
use heimdall_core::utils::init_logger;
use heimdall_core::{
    AlertRegistry, Dispatcher, EvaluationEngine, Identity, IntakeAdapter, MetricKind, OwnerId,
    RateLimiter, Severity, SubscriptionHub,
};
use rand::Rng;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Configuration file (TOML); defaults apply when omitted
    #[arg(short = 'f', long)]
    config: Option<PathBuf>,

    /// Synthetic feed ticks to run, 0 for unlimited
    #[arg(short, long, default_value = "0")]
    ticks: u64,

    /// Milliseconds between synthetic samples
    #[arg(long, default_value = "250")]
    tick_interval_ms: u64,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Emit JSON logs
    #[arg(long)]
    json_logs: bool,
}

/// Synthetic baselines standing in for the historical store
struct SyntheticBaselines;

#[async_trait]
impl BaselineProvider for SyntheticBaselines {
    async fn baseline(&self, metric: MetricKind) -> Result<BaselineStats> {
        let mean = match metric {
            MetricKind::FeeRate => 20.0,
            MetricKind::MempoolDepth => 40_000.0,
            MetricKind::CpuUsage => 45.0,
            _ => 100.0,
        };
        Ok(BaselineStats {
            mean,
            median: mean * 0.95,
            std_dev: mean * 0.1,
            p95: mean * 1.4,
            p99: mean * 1.8,
        })
    }
}

/// Hub sink that logs alert frames, standing in for a WebSocket peer
struct LogSink;

#[async_trait]
impl FrameSink for LogSink {
    async fn send(&self, frame: Frame) -> Result<(), ConnectionLost> {
        match frame {
            Frame::Event { sequence, topic, payload } => {
                info!("feed {} #{}: {:?}", topic, sequence, payload)
            }
            Frame::Dropped { dropped_count } => {
                warn!("feed dropped {} frames so far", dropped_count)
            }
            Frame::Gap { .. } => warn!("feed gap, snapshot refetch required"),
        }
        Ok(())
    }
}

fn seed_alerts(engine: &EvaluationEngine) -> Result<()> {
    let owner = OwnerId::new("demo");
    let webhook = vec![ChannelTarget::new(
        ChannelKind::Webhook,
        "https://hooks.example.com/ops",
    )];

    engine.create_alert(
        owner.clone(),
        NewAlert {
            metric: MetricKind::CpuUsage,
            op: Comparison::Gt,
            threshold: Threshold::Absolute { value: 80.0 },
            window: EvaluationWindow::Samples(3),
            aggregate: WindowAggregate::Each,
            severity: Severity::Warning,
            channels: webhook.clone(),
            enabled: true,
        },
    )?;

    engine.create_alert(
        owner,
        NewAlert {
            metric: MetricKind::FeeRate,
            op: Comparison::Gt,
            threshold: Threshold::BaselineOffset {
                stat: heimdall_core::engine::BaselineStat::Mean,
                percent: 50.0,
            },
            window: EvaluationWindow::Duration { ms: 2_000 },
            aggregate: WindowAggregate::Mean,
            severity: Severity::Error,
            channels: webhook,
            enabled: true,
        },
    )?;

    Ok(())
}

fn synthetic_event(tick: u64) -> RawSignalEvent {
    let mut rng = rand::thread_rng();
    // Push CPU into sustained breach every few cycles so transitions
    // actually fire
    let (metric, value) = match tick % 3 {
        0 => {
            let base = if (tick / 30) % 2 == 0 { 55.0 } else { 88.0 };
            ("cpu_usage", base + rng.gen_range(-3.0..3.0))
        }
        1 => ("fee_rate", 18.0 + rng.gen_range(0.0..25.0)),
        _ => ("mempool_depth", 35_000.0 + rng.gen_range(-5_000.0..15_000.0)),
    };
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    RawSignalEvent {
        metric: metric.to_string(),
        value,
        block_height: 900_000 + tick,
        observed_at_ms: now_ms,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(&args.log_level, args.json_logs);

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    config.validate()?;

    info!("=== Heimdall: signal alerting daemon ===");

    // Assemble the pipeline
    let registry = Arc::new(AlertRegistry::new());
    let engine = Arc::new(
        EvaluationEngine::new(config.engine_config(), registry)
            .with_baselines(Arc::new(SyntheticBaselines)),
    );
    seed_alerts(&engine)?;

    let hub = Arc::new(SubscriptionHub::new(
        config.hub_config(),
        ConnectionRegistry::new(),
    ));
    let dispatcher = Arc::new(
        Dispatcher::new(
            config.dispatcher_config(),
            Arc::new(InMemoryRecordStore::new()),
        )
        .with_channel(Arc::new(LogChannel::new(ChannelKind::Webhook))),
    );
    let intake = Arc::new(IntakeAdapter::new(
        engine.clone(),
        hub.clone(),
        dispatcher.clone(),
    ));

    // Every externally reachable entry point goes through the limiter,
    // the synthetic feed and the demo subscriber included
    let limiter = Arc::new(RateLimiter::new(config.limiter_config()));
    let feed_identity = Identity::User("demo-feed".into());

    // Demo subscriber following the alert feed
    limiter.check_or_err(&feed_identity)?;
    let feed_handle = hub.subscribe(SubscriptionFilter::all(), None, Arc::new(LogSink));

    // Metrics export
    let metrics = Arc::new(MetricsRegistry::new()?);
    if config.monitoring.enable_prometheus {
        let server = MetricsServer::new(config.metrics_server_config()?, metrics.clone());
        tokio::spawn(async move {
            if let Err(e) = server.serve().await {
                warn!("Metrics server exited: {}", e);
            }
        });
    }
    {
        let metrics = metrics.clone();
        let engine = engine.clone();
        let hub = hub.clone();
        let dispatcher = dispatcher.clone();
        let intake = intake.clone();
        let limiter = limiter.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                ticker.tick().await;
                metrics.engine().update(&engine.stats());
                metrics.hub().update(&hub.stats());
                metrics.dispatch().update(&dispatcher.stats());
                metrics.intake().update(&intake.stats());
                if let Some(baselines) = engine.baselines() {
                    metrics.cache().update(&baselines.cache().stats());
                }
                metrics.limiter().update(&limiter);
                limiter.prune_idle(Duration::from_secs(300));
            }
        });
    }

    // Graceful shutdown on Ctrl-C
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            running.store(false, Ordering::SeqCst);
        })?;
    }

    info!("Feeding synthetic signals every {}ms", args.tick_interval_ms);
    let mut ticker = tokio::time::interval(Duration::from_millis(args.tick_interval_ms));
    let mut tick = 0u64;
    while running.load(Ordering::SeqCst) {
        ticker.tick().await;
        tick += 1;
        if args.ticks != 0 && tick > args.ticks {
            break;
        }
        if let Err(e) = limiter.check_or_err(&feed_identity) {
            warn!("feed throttled, retry in {:?}", e.retry_after);
            continue;
        }
        if let Err(e) = intake.ingest(synthetic_event(tick)).await {
            warn!("ingest failed: {}", e);
        }
    }

    info!("Shutting down");
    feed_handle.disconnect();
    hub.close_all();

    let engine_stats = engine.stats();
    let dispatch_stats = dispatcher.stats();
    let intake_stats = intake.stats();
    info!("=== Final Statistics ===");
    info!("Samples accepted: {}", intake_stats.accepted);
    info!("Evaluations: {}", engine_stats.evaluations);
    info!("Transitions: {}", engine_stats.transitions);
    info!(
        "Notifications: {} sent, {} failed, {} suppressed",
        dispatch_stats.sent, dispatch_stats.failed, dispatch_stats.suppressed
    );

    Ok(())
}
