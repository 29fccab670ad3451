//! # NFe API Server
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            NFe API Server                               │
//! │                                                                         │
//! │  Order system ──► HTTP (8080) ──► Pipeline ──► SEFAZ (SOAP/mTLS)       │
//! │                                      │                                  │
//! │                                      ▼                                  │
//! │                              SQLite + artifact files                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Usage: `nfe-api [path/to/issuer.toml]`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use nfe_api::{router, AppState};
use nfe_db::{Database, DbConfig};
use nfe_sefaz::IssuerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting NFe API server...");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = IssuerConfig::load(config_path).context("loading issuer configuration")?;
    info!(
        database = %config.database.path.display(),
        artifacts = %config.storage.artifact_root.display(),
        cancellation_window_hours = config.events.cancellation_window_hours,
        "Configuration loaded"
    );

    let db = Database::new(
        DbConfig::new(&config.database.path).max_connections(config.database.max_connections),
    )
    .await
    .context("opening database")?;
    info!("Database ready");

    let state = Arc::new(AppState::new(&config, db.clone()));
    let app = router(state);

    let addr = config.server.bind_address();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    db.close().await;
    info!("Server shutdown complete");
    Ok(())
}

/// `RUST_LOG` wins; otherwise info, with sqlx quieted.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,nfe=debug,sqlx=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
