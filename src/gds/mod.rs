//! Ground-station integration
//!
//! Inbound: a polling loop drains the ground station's note queue and feeds
//! `commands.qi` notes into the command subsystem. Outbound: the telemetry
//! publisher uploads delta snapshots (see [`crate::telemetry::publish`]).
//!
//! Both directions are optional; nothing here runs unless a ground-station
//! URL is configured.

pub mod client;
pub mod note;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::ci::{self, CommandRequest};
use crate::error::Result;
use crate::hub::Manager;

pub use client::Client;
pub use note::Note;

/// Note queue file holding inbound commands
pub const COMMAND_FILE: &str = "commands.qi";

const POLL_INTERVAL: Duration = Duration::from_secs(10);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Poll the ground station for queued commands until cancelled
///
/// Upstream failures back off exponentially up to one minute and retry; a
/// successful poll resets the cadence.
pub async fn poll_commands(
    client: Client,
    manager: Arc<Manager>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut delay = Duration::ZERO;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(delay) => {}
        }

        match poll_once(&client, &manager).await {
            Ok(()) => delay = POLL_INTERVAL,
            Err(e) => {
                delay = (delay.max(POLL_INTERVAL) * 2).min(MAX_BACKOFF);
                tracing::error!(error = %e, retry_in = ?delay, "ground station poll failed");
            }
        }
    }
}

async fn poll_once(client: &Client, manager: &Arc<Manager>) -> Result<()> {
    let started = Instant::now();
    tracing::debug!("retrieving commands from ground station");

    let notes = client.get_notes().await?;
    let count = notes.len();

    for note in notes {
        tracing::debug!(file = %note.file, note = %note.note, "processing note");
        if note.file != COMMAND_FILE {
            continue;
        }

        let req: CommandRequest = match serde_json::from_value(note.body) {
            Ok(req) => req,
            Err(e) => {
                tracing::warn!(error = %e, note = %note.note, "failed to parse command note");
                continue;
            }
        };

        if req.command.is_empty() {
            tracing::warn!(note = %note.note, "empty command");
            continue;
        }

        match ci::accept(manager, &req.command).await {
            Ok(id) => {
                tracing::info!(command = %req.command, id = %id, "accepted ground station command");
            }
            Err(e) => tracing::warn!(error = %e, command = %req.command, "failed to accept command"),
        }
    }

    tracing::debug!(
        notes = count,
        elapsed = ?started.elapsed(),
        "finished processing notes"
    );

    Ok(())
}
