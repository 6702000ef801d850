//! DOGA analysis service: binary entrypoint.
//! Loads config, wires the feed source and analysis delegate, and serves the Axum router.

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use doga_analyzer::config::{AppConfig, LogFormat};
use doga_analyzer::metrics::Metrics;
use doga_analyzer::{router, AppState};

/// `RUST_LOG` wins; otherwise the configured level (LOG_LEVEL, default "debug").
fn init_tracing(cfg: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},hyper=info,reqwest=info", cfg.log_level)));

    let registry = tracing_subscriber::registry().with(filter);
    match cfg.log_format {
        LogFormat::Json => registry.with(fmt::layer().json().flatten_event(true)).init(),
        LogFormat::Compact => registry.with(fmt::layer().compact()).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    let cfg = AppConfig::load().context("loading configuration")?;
    init_tracing(&cfg);
    tracing::debug!(?cfg, "configuration loaded");

    let metrics = Metrics::init()?;
    let state = AppState::from_config(&cfg)?;
    let app = router(state).merge(metrics.router());

    let addr = format!("{}:{}", cfg.bind_addr, cfg.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "server running");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving http")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutting down");
}
