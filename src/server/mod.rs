//! Service lifecycle
//!
//! Builds the shared state, wires the HTTP routes, spawns the supervised
//! background loops, and serves until shutdown. Only a failure to bind the
//! listening socket is fatal; everything after that is logged and retried.

pub mod config;
pub mod routes;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::supervisor::spawn_supervised;
use crate::{gds, telemetry};

pub use config::ServerConfig;
pub use routes::router;
pub use state::AppState;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build revision baked in at compile time
pub const REVISION: &str = match option_env!("YAKAPI_REVISION") {
    Some(revision) => revision,
    None => "unknown",
};

/// Run the service until a shutdown signal arrives
pub async fn run(config: ServerConfig) -> Result<()> {
    let state = AppState::new(config)?;
    let cancel = CancellationToken::new();

    spawn_background(&state, &cancel)?;

    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.port));
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(
        addr = %addr,
        version = VERSION,
        revision = REVISION,
        "starting"
    );

    let app = router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    cancel.cancel();
    Ok(())
}

/// Spawn the supervised background loops
///
/// The ground-station loops are spawned only when a ground-station URL is
/// configured. Channel-connected loop pairs restart as one unit so every
/// generation gets a fresh channel and stream subscription.
pub fn spawn_background(state: &AppState, cancel: &CancellationToken) -> Result<()> {
    // Command result collector.
    {
        let manager = Arc::clone(&state.manager);
        let results = Arc::clone(&state.results);
        let cancel_child = cancel.clone();
        spawn_supervised("ci-results", cancel.clone(), move || {
            let manager = Arc::clone(&manager);
            let results = Arc::clone(&results);
            let cancel = cancel_child.clone();
            async move { results.collect(manager, cancel).await }
        });
    }

    // Telemetry gauge export.
    {
        let manager = Arc::clone(&state.manager);
        let metrics = Arc::clone(&state.metrics);
        let cancel_child = cancel.clone();
        spawn_supervised("telemetry-gauges", cancel.clone(), move || {
            let manager = Arc::clone(&manager);
            let metrics = Arc::clone(&metrics);
            let cancel = cancel_child.clone();
            async move {
                let (tx, rx) = mpsc::channel(1);
                tokio::try_join!(
                    telemetry::aggregate(manager, tx, cancel.clone()),
                    telemetry::run_gauges(rx, metrics, cancel),
                )?;
                Ok(())
            }
        });
    }

    let Some(gds_url) = state.config.gds_api_url.clone() else {
        tracing::info!("ground station not configured");
        return Ok(());
    };

    let client = gds::Client::new(gds_url)?;

    // Inbound: command ingestion from the note queue.
    {
        let client = client.clone();
        let manager = Arc::clone(&state.manager);
        let cancel_child = cancel.clone();
        spawn_supervised("gds-commands", cancel.clone(), move || {
            let client = client.clone();
            let manager = Arc::clone(&manager);
            let cancel = cancel_child.clone();
            async move { gds::poll_commands(client, manager, cancel).await }
        });
    }

    // Outbound: delta telemetry upload.
    {
        let manager = Arc::clone(&state.manager);
        let boot = state.boot;
        let cancel_child = cancel.clone();
        spawn_supervised("gds-telemetry", cancel.clone(), move || {
            let client = client.clone();
            let manager = Arc::clone(&manager);
            let cancel = cancel_child.clone();
            async move {
                let (tx, rx) = mpsc::channel(1);
                tokio::try_join!(
                    telemetry::aggregate(manager, tx, cancel.clone()),
                    telemetry::publish(rx, client, boot, cancel),
                )?;
                Ok(())
            }
        });
    }

    Ok(())
}
