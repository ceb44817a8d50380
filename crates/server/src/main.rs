//! Agora Server
//!
//! Presence and notification delivery for the social network over WebSocket.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use agora::app::build_router;
use agora::config::Config;
use agora::logging::init_logging;
use agora::state::AppState;
use agora::store::SqliteStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    let _logging = init_logging(&config)?;

    info!(
        component = "server",
        event = "server.starting",
        bind = %config.bind,
        db_path = %config.db_path.display(),
        fingerprint_check = config.fingerprint_check,
        "Starting Agora server"
    );

    let store = SqliteStore::open(&config.db_path)
        .with_context(|| format!("opening database {}", config.db_path.display()))?;
    let state = AppState::new(Arc::new(store), config.fingerprint_policy());
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    info!(
        component = "server",
        event = "server.listening",
        addr = %listener.local_addr()?,
        "Listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!(
        component = "server",
        event = "server.stopped",
        "Server stopped"
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(
                component = "server",
                event = "server.signal.ctrl_c_failed",
                error = %e,
                "Failed to listen for ctrl-c"
            );
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(
                    component = "server",
                    event = "server.signal.sigterm_failed",
                    error = %e,
                    "Failed to install SIGTERM handler"
                );
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let signal = tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    };
    info!(
        component = "server",
        event = "server.signal",
        signal,
        "Shutting down"
    );
}
