//! Command ingestion and result collection
//!
//! Free-form command strings are tokenized, assigned an id, and published to
//! the `ci` stream for whatever actuator adapter is listening. Results come
//! back on the `ci:result` stream and land in a fixed-size ring that callers
//! poll by id.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::hub::Manager;

/// Stream carrying accepted commands
pub const COMMAND_STREAM: &str = "ci";

/// Stream carrying command results
pub const RESULT_STREAM: &str = "ci:result";

/// Slots in the result ring
///
/// Bounds memory for results without any per-id bookkeeping; lookups are a
/// linear scan over the ring.
const RING_SIZE: usize = 256;

/// A command accepted into the hub
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub id: String,
    pub cmd: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub args: String,
}

/// A result reported by the actuator adapter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub result: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// Body of a command request, shared by the HTTP endpoint and the
/// ground-station ingestion path
#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    #[serde(default)]
    pub command: String,
}

/// Tokenize a command string, mint an id, and publish it to the command
/// stream
///
/// The first whitespace-separated token is the command, the rest become the
/// argument string. Returns the freshly minted id.
pub async fn accept(manager: &Arc<Manager>, raw: &str) -> Result<String> {
    let mut fields = raw.split_whitespace();
    let Some(cmd) = fields.next() else {
        return Err(Error::EmptyCommand);
    };

    let command = Command {
        id: Uuid::new_v4().to_string(),
        cmd: cmd.to_owned(),
        args: fields.collect::<Vec<_>>().join(" "),
    };

    let payload = serde_json::to_vec(&command)?;

    let writer = manager.get_writer(COMMAND_STREAM);
    let sent = writer.send(Bytes::from(payload)).await;
    writer.release();
    sent?;

    tracing::info!(stream = COMMAND_STREAM, id = %command.id, "queued command");

    Ok(command.id)
}

/// Bounded ring of the most recent command results
///
/// Writes advance a cursor modulo the ring size, displacing the oldest
/// entry; lookups scan every slot and return the first id match.
#[derive(Default)]
pub struct ResultCollector {
    ring: RwLock<Ring>,
}

struct Ring {
    slots: Vec<CommandResult>,
    next: usize,
}

impl Default for Ring {
    fn default() -> Self {
        Self {
            slots: vec![CommandResult::default(); RING_SIZE],
            next: 0,
        }
    }
}

impl ResultCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a result by id
    ///
    /// Returns `None` when the id is empty, was never collected, or has been
    /// displaced from the ring.
    pub fn fetch(&self, id: &str) -> Option<CommandResult> {
        if id.is_empty() {
            return None;
        }

        let ring = self.ring.read();
        ring.slots.iter().find(|r| r.id == id).cloned()
    }

    /// Record a result directly, displacing the oldest ring entry
    pub fn store(&self, result: CommandResult) {
        let mut ring = self.ring.write();
        let next = ring.next;
        ring.slots[next] = result;
        ring.next = (next + 1) % RING_SIZE;
    }

    /// Consume the result stream until cancelled
    ///
    /// Malformed records and records without an id are logged and skipped.
    /// A closed stream is a terminal error for the supervisor to handle.
    pub async fn collect(&self, manager: Arc<Manager>, cancel: CancellationToken) -> Result<()> {
        let mut reader = manager.get_reader(RESULT_STREAM);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                item = reader.recv() => {
                    let Some(data) = item else {
                        return Err(Error::StreamClosed);
                    };

                    let result: CommandResult = match serde_json::from_slice(&data) {
                        Ok(result) => result,
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to parse command result");
                            continue;
                        }
                    };

                    if result.id.is_empty() {
                        tracing::warn!("command result missing id");
                        continue;
                    }

                    tracing::debug!(id = %result.id, "collected command result");
                    self.store(result);
                }
            }
        }
    }
}
