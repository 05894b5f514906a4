//! # zbx-rtx-server
//!
//! HTTP front end for the zbx-rtx real-time event bridge. Tails a
//! monitoring server's NDJSON real-time export directory, fans records out
//! to connected HTTP clients (live SSE stream, JSON snapshot, or a demo
//! page), and serves a small bounded replay window via the snapshot
//! endpoint.
//!
//! ## Architecture
//!
//! - [`zbx_rtx_core::tail::DirectoryTailer`] discovers and follows the
//!   NDJSON files.
//! - [`orchestration::run`] pushes each record onto the
//!   [`zbx_rtx_core::RingBuffer`] and broadcasts it through the
//!   [`zbx_rtx_core::SseHub`].
//! - `axum` serves the three pinned endpoints from §6 of the design spec
//!   plus a `/healthz` liveness check.

mod config;
mod errors;
mod handlers;
mod orchestration;
mod state;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use zbx_rtx_core::{DirectoryTailerConfig, RingBuffer, SseHub};

use config::{Args, Settings};
use state::AppState;

/// A stuck child-tailer shutdown or network I/O must never hang the
/// process; this is the outer bound on the whole shutdown sequence
/// (spec §5).
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "zbx_rtx_server=info,zbx_rtx_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let settings = match Settings::load(args) {
        Ok(settings) => settings,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    match run(settings).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!(error = %err, "fatal startup error");
            ExitCode::FAILURE
        }
    }
}

/// Returns `Ok(true)` on a clean shutdown, `Ok(false)` if the shutdown grace
/// period elapsed and the process is exiting forced (spec §6 exit codes).
async fn run(settings: Settings) -> anyhow::Result<bool> {
    let ring = Arc::new(RingBuffer::new(settings.rb_capacity).context("invalid RB_CAPACITY")?);
    let hub = Arc::new(SseHub::new(settings.sse_drop_threshold, settings.heartbeat_ms));
    hub.heartbeat_start();

    std::fs::create_dir_all(&settings.dir).ok();

    let tailer_config = DirectoryTailerConfig {
        dir: settings.dir.clone(),
        poll_interval_ms: settings.poll_interval_ms,
        max_backoff_ms: settings.max_backoff_ms,
        begin_at_tail: false,
        include: Vec::new(),
        exclude: Vec::new(),
    };
    let (tailer, events_rx) = zbx_rtx_core::DirectoryTailer::build(tailer_config)?;

    let orchestration_task = tokio::spawn(orchestration::run(
        events_rx,
        Arc::clone(&ring),
        Arc::clone(&hub),
    ));

    tailer.start().await;
    info!(dir = %settings.dir.display(), "directory tailer started");

    let state = AppState {
        ring: Arc::clone(&ring),
        hub: Arc::clone(&hub),
    };
    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", settings.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "listening");

    let server = axum::serve(listener, app.into_make_service());
    tokio::select! {
        result = server => {
            if let Err(err) = result {
                error!(error = %err, "http server error");
            }
        }
        () = shutdown_signal() => {
            info!("shutdown signal received");
        }
    }

    hub.close();
    let clean = tokio::time::timeout(SHUTDOWN_GRACE, tailer.stop()).await.is_ok();
    if !clean {
        error!("directory tailer did not stop within the shutdown grace period");
    }
    orchestration_task.abort();

    Ok(clean)
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/events/zabbix/", get(handlers::events))
        .route("/v1/events/zabbix/openapi.json", get(handlers::openapi))
        .route("/healthz", get(handlers::healthz))
        .route("/", get(handlers::root_redirect))
        .fallback(get(handlers::not_found))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
