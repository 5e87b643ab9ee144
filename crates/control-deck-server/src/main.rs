//! control-deck server binary.
//!
//! Wires the registry, event bus, gateway, and audit sink together and
//! exposes the operational surface: `/ws`, `/api/health`, `/api/logs`.

use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use clap::Parser;
use control_deck_core::{DeliveryOutcome, Event, EventBus, time::now_millis};
use control_deck_registry::{
    Registry,
    audit::{AuditWriter, MemorySink, SqliteSink},
};
use control_deck_transport::gateway::{self, GatewayState};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Server configuration, from flags or environment.
#[derive(Parser, Debug)]
#[command(name = "control-deck", version, about = "Real-time control dashboard server")]
struct Config {
    /// Address to listen on.
    #[arg(long, env = "DECK_BIND", default_value = "127.0.0.1:8750")]
    bind: SocketAddr,

    /// Seconds without a heartbeat before an agent is evicted.
    #[arg(long, env = "DECK_HEARTBEAT_TIMEOUT", default_value_t = 90)]
    heartbeat_timeout: u64,

    /// Seconds between eviction sweeps.
    #[arg(long, env = "DECK_REAP_INTERVAL", default_value_t = 15)]
    reap_interval: u64,

    /// Path to the sqlite audit database. Audit stays in memory when unset.
    #[arg(long, env = "DECK_AUDIT_DB")]
    audit_db: Option<PathBuf>,

    /// Append logs to this file in addition to stdout.
    #[arg(long, env = "DECK_LOG_FILE")]
    log_file: Option<PathBuf>,
}

#[derive(Clone)]
struct AppState {
    gateway: GatewayState,
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_tracing(config.log_file.as_deref())?;

    let bus = Arc::new(EventBus::new());
    let registry = Arc::new(Registry::new(Arc::clone(&bus)));
    let (audit, _audit_task) = match &config.audit_db {
        Some(path) => {
            let sink = SqliteSink::open(path).await.context("open audit database")?;
            AuditWriter::spawn(sink)
        }
        None => AuditWriter::spawn(MemorySink::new()),
    };

    let gateway_state = GatewayState {
        registry,
        bus,
        audit,
    };

    tokio::spawn(reap_idle_agents(
        gateway_state.clone(),
        Duration::from_secs(config.reap_interval),
        Duration::from_secs(config.heartbeat_timeout),
    ));

    let state = AppState {
        gateway: gateway_state.clone(),
        log_file: config.log_file,
    };

    let app = Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/logs", get(logs_handler))
        .with_state(state)
        .merge(gateway::router(gateway_state))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    tracing::info!("listening on {}", config.bind);
    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .context("bind listener")?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    tracing::info!("shut down");
    Ok(())
}

fn init_tracing(log_file: Option<&Path>) -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer());

    if let Some(path) = log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open log file {}", path.display()))?;
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
            .init();
    } else {
        registry.init();
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
    }
}

/// Health endpoint: status plus live session count.
async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": now_millis(),
        "clients": state.gateway.registry.len(),
    }))
}

/// Log download endpoint. 404 when no log file is configured or present.
async fn logs_handler(State(state): State<AppState>) -> impl IntoResponse {
    let Some(path) = state.log_file else {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "log file not configured"})),
        )
            .into_response();
    };
    match tokio::fs::read(&path).await {
        Ok(contents) => (
            [
                (header::CONTENT_TYPE, "text/plain"),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=\"control-deck.log\"",
                ),
            ],
            contents,
        )
            .into_response(),
        Err(_) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "log file not found"})),
        )
            .into_response(),
    }
}

/// Periodically evict agents whose heartbeats stopped.
///
/// Eviction asks the connection to close itself, so cleanup runs on the
/// session's own task; if its queue is unreachable the session is removed
/// directly.
async fn reap_idle_agents(state: GatewayState, interval: Duration, max_idle: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        for id in state.registry.idle_agents(max_idle) {
            tracing::info!(session = %id, "evicting idle agent");
            if state.bus.send_direct(id, Event::Disconnect) != DeliveryOutcome::Delivered {
                gateway::disconnect_session(&state, id);
            }
        }
    }
}
