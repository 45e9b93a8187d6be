//! Forkwatch — Binary Entrypoint
//! Loads the source list, starts the polling scheduler, and serves the
//! operational HTTP surface (health/status/metrics).

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use forkwatch::api::{self, AppState};
use forkwatch::metrics::Metrics;
use forkwatch::poll::config::MonitorConfig;
use forkwatch::poll::github::GithubClient;
use forkwatch::poll::scheduler::Scheduler;
use forkwatch::poll::watermarks::Watermarks;
use forkwatch::poll::PollCoordinator;
use forkwatch::sink::{LogSink, MemorySink, SinkMux, UpdateSink};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("forkwatch=info,poll=info,scheduler=info,sink=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = MonitorConfig::load_default().context("loading monitor config")?;
    tracing::info!(
        sources = cfg.sources.len(),
        interval_minutes = cfg.poll_interval_minutes,
        authenticated = cfg.github_token.is_some(),
        enabled = cfg.enabled,
        "config loaded"
    );

    let metrics = Metrics::init(cfg.poll_interval_minutes);

    let client = GithubClient::new(cfg.github_token.clone());
    let coordinator = PollCoordinator::new(client, Watermarks::new());

    let recent = Arc::new(MemorySink::with_capacity(500));
    let sink = Arc::new(SinkMux::new(vec![
        Arc::new(LogSink) as Arc<dyn UpdateSink>,
        recent.clone() as Arc<dyn UpdateSink>,
    ]));

    let scheduler = Scheduler::new(
        coordinator,
        cfg.sources.clone(),
        cfg.poll_interval_minutes,
        Duration::from_millis(cfg.inter_source_delay_ms),
        sink,
    );
    if cfg.enabled {
        scheduler.start();
    } else {
        tracing::warn!("polling disabled by config; serving status endpoints only");
    }

    let state = AppState {
        scheduler,
        recent,
    };
    let router = api::router(state).merge(metrics.router());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, router).await.context("serving http")?;
    Ok(())
}
