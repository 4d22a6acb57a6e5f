//! weatherd - weather tools over the relay protocol
//!
//! Routes:
//! - `GET /sse` + `POST /message` - remote tool protocol
//! - `GET /health` - liveness

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::info;

use conciergeconf::ConciergeConfig;
use relay::SessionStore;
use weatherd::{relay_state, telemetry, AmapClient};

const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "weatherd")]
#[command(about = "Weather lookup tools over the relay protocol")]
#[command(version)]
struct Cli {
    /// Port to listen on (overrides weather.port)
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind (overrides weather.bind)
    #[arg(long)]
    bind: Option<String>,

    /// Config file (replaces ./concierge.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Clone)]
struct HealthState {
    started: Instant,
    sessions: Arc<dyn SessionStore>,
}

async fn health(State(state): State<HealthState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "uptime_secs": state.started.elapsed().as_secs(),
        "sessions": state.sessions.stats().total,
    }))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, sources) = ConciergeConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;
    let _telemetry = telemetry::init("weatherd", &config.telemetry)?;
    info!(files = ?sources.files, env = ?sources.env_overrides, "configuration loaded");

    let weather = &config.weather;
    let amap = AmapClient::from_config(weather).context("Cannot reach the weather provider")?;
    let state = relay_state(amap).context("Failed to register weather tools")?;

    let cancel = CancellationToken::new();
    let cleanup = relay::spawn_cleanup_task(
        Arc::clone(&state.sessions),
        CLEANUP_INTERVAL,
        weather.session_idle(),
        cancel.clone(),
    );

    let health_state = HealthState {
        started: Instant::now(),
        sessions: Arc::clone(&state.sessions),
    };
    let app = Router::new()
        .route("/health", get(health))
        .with_state(health_state)
        .merge(relay::router(state));

    let bind = cli.bind.as_deref().unwrap_or(&weather.bind);
    let addr = format!("{}:{}", bind, cli.port.unwrap_or(weather.port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("weatherd listening on http://{}", addr);
    info!("   SSE: GET http://{}/sse + POST http://{}/message", addr, addr);

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown.cancel();
        })
        .await
        .context("Server error")?;

    cancel.cancel();
    let _ = cleanup.await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
