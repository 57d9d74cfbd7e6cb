use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing for the alerting pipeline.
///
/// `RUST_LOG` overrides `log_level` when set. The metrics exporter's
/// hyper internals are capped at `warn` so scrape traffic stays out of
/// debug output; pipeline crates log at the requested level.
pub fn init_logger(log_level: &str, json_logs: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{log_level},hyper=warn")));

    if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_current_span(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
