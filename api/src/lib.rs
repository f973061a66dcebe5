//! Timbertrace API Server
//!
//! This crate provides the HTTP server of the Timbertrace telemetry pipeline
//! for the timber-construction ERP. ERP components push events, metrics,
//! spans and audit entries; dashboards read error groups, aggregates, audit
//! history, sessions, health checks and the alert feed.
//!
//! # Architecture
//!
//! The API server is built on Axum and Tokio, providing:
//! - REST endpoints for ingestion and dashboard queries
//! - Background jobs for rollups, alert ticks, session sweeps and audit
//!   verification
//! - An alert notification dispatcher with retry and backoff
//!
//! # Example
//!
//! ```no_run
//! use api::run_server;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     run_server().await
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod config;
mod routes;
mod scheduler;
mod state;

pub use config::Config;
pub use scheduler::Scheduler;
pub use state::AppState;

use anyhow::Result;
use axum::Router;
use shared::alerting::LogNotifier;
use shared::telemetry::Stores;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Runs the Timbertrace API server.
///
/// This function initializes the server with configuration from environment variables
/// and starts listening for incoming connections. It handles graceful shutdown on
/// SIGTERM/SIGINT signals.
///
/// # Errors
///
/// Returns an error if:
/// - Configuration cannot be loaded from environment
/// - The server fails to bind to the configured address
/// - A fatal error occurs during operation
pub async fn run_server() -> Result<()> {
    let config = Config::from_env()?;
    run_server_with_config(config).await
}

/// Runs the Timbertrace API server with the provided configuration.
///
/// # Errors
///
/// Returns an error if:
/// - The telemetry configuration file cannot be loaded or is invalid
/// - The server fails to bind to the configured address
/// - A fatal error occurs during operation
pub async fn run_server_with_config(config: Config) -> Result<()> {
    let addr = config.socket_addr()?;
    let telemetry_config = config.load_telemetry_config()?;

    tracing::info!(
        host = %config.host,
        port = %config.port,
        alerts = telemetry_config.alerting.definitions.len(),
        audit_scope = %telemetry_config.audit.chain_scope,
        "Timbertrace API server starting"
    );

    let (state, notifications) = AppState::from_config(telemetry_config, Stores::in_memory())?;

    let scheduler = Scheduler::new(state.clone());
    let jobs = scheduler.spawn(notifications, Arc::new(LogNotifier));

    let app = create_router(state);
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(%addr, "Listening for connections");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    scheduler.shutdown();
    for job in jobs {
        if let Err(e) = job.await {
            tracing::warn!(error = %e, "Background job ended abnormally");
        }
    }

    served?;
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Creates the main application router with all routes and middleware.
///
/// This function is public to allow testing the router without starting a full server.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(routes::health_routes(state.clone()))
        .merge(routes::emit_routes(state.clone()))
        .merge(routes::events_routes(state.clone()))
        .merge(routes::traces_routes(state.clone()))
        .merge(routes::metrics_routes(state.clone()))
        .merge(routes::errors_routes(state.clone()))
        .merge(routes::audit_routes(state.clone()))
        .merge(routes::alerts_routes(state.clone()))
        .merge(routes::sessions_routes(state.clone()))
        .merge(routes::health_checks_routes(state))
        .layer(TraceLayer::new_for_http())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
