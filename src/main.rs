// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Abuse Guard Service
//!
//! Runs the guard as an external authorization service. A reverse proxy
//! calls `/check` with request metadata before forwarding and posts login
//! outcomes to `/login-result`. Usage statistics are served at `/stats`
//! and Prometheus metrics at `/metrics`.
//!
//! ## Configuration
//!
//! Environment variables, optionally from a `.env` file:
//!
//! - `BIND_ADDR`: server bind address (default: 0.0.0.0:8080)
//! - `APP_ENV` / `NODE_ENV`: `development` or `production`
//! - `TRUST_PROXY`, `TRUSTED_IPS`, `GUARD_POLICY_FILE`
//! - `ALERT_FAILED_LOGINS_PER_HOUR`, `ALERT_REJECTIONS_PER_HOUR`
//! - `SWEEP_INTERVAL_SECS`

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use abuse_guard::{
    config::Config,
    guard::AbuseGuard,
    handlers::{router, AppState},
    sweeper::Sweeper,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    // Load configuration; invalid settings or policies abort startup
    let config = Config::from_env()?;
    info!(
        bind_addr = %config.bind_addr,
        environment = config.environment.as_str(),
        trust_proxy = config.trust_proxy,
        trusted_ips = config.trusted_ips.len(),
        policy_file = ?config.policy_file,
        "Starting abuse guard"
    );

    let guard = Arc::new(AbuseGuard::from_config(&config)?);
    let sweeper = Sweeper::start(guard.clone(), config.sweep.clone());

    let state = Arc::new(AppState::new(guard, config.clone()));
    let app = router(state);

    // Start server
    let addr: SocketAddr = config.bind_addr.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    sweeper.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
