//! HTTP client for the ground station
//!
//! The ground station exposes a note queue for inbound commands and accepts
//! telemetry notes on a `.qo` file. Both calls are plain JSON over HTTP.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;

use super::note::Note;
use crate::error::{Error, Result};
use crate::telemetry::Snapshot;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Ground-station API client
#[derive(Debug, Clone)]
pub struct Client {
    mission_url: String,
    http: reqwest::Client,
}

impl Client {
    pub fn new(mission_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            mission_url: mission_url.into(),
            http,
        })
    }

    /// Fetch and flatten the queued notes
    pub async fn get_notes(&self) -> Result<Vec<Note>> {
        let url = format!("{}/note_queue", self.mission_url);

        let resp = self.http.get(&url).send().await?;
        if resp.status() != StatusCode::OK {
            return Err(Error::UnexpectedStatus(resp.status().as_u16()));
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_owned();
        if !content_type.starts_with("application/json") {
            return Err(Error::UnexpectedContentType(content_type));
        }

        let queue: HashMap<String, Vec<Note>> = resp.json().await?;
        Ok(flatten_note_queue(queue))
    }

    /// Upload a telemetry snapshot as a `telemetry.qo` note
    pub async fn send_telemetry(&self, telemetry: &Snapshot) -> Result<()> {
        let url = format!("{}/notes/telemetry.qo", self.mission_url);
        let payload = serde_json::json!({ "body": telemetry });

        let resp = self.http.post(&url).json(&payload).send().await?;
        if resp.status() != StatusCode::CREATED {
            return Err(Error::UnexpectedStatus(resp.status().as_u16()));
        }

        Ok(())
    }
}

/// Unwrap the file-keyed note queue into a flat list, stamping each note
/// with the file it was queued under
pub(super) fn flatten_note_queue(queue: HashMap<String, Vec<Note>>) -> Vec<Note> {
    let mut notes = Vec::new();
    for (file, list) in queue {
        for mut note in list {
            note.file = file.clone();
            notes.push(note);
        }
    }
    notes
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn flatten_stamps_file_from_queue_key() {
        let queue: HashMap<String, Vec<Note>> = serde_json::from_value(json!({
            "commands.qi": [
                {"note": "n1", "body": {"command": "fwd 10"}},
                {"note": "n2", "body": {"command": "stop"}}
            ],
            "other.qi": [
                {"note": "n3", "body": {}}
            ]
        }))
        .unwrap();

        let notes = flatten_note_queue(queue);
        assert_eq!(notes.len(), 3);
        assert!(notes
            .iter()
            .filter(|n| n.file == "commands.qi")
            .all(|n| n.note == "n1" || n.note == "n2"));
        assert_eq!(
            notes.iter().filter(|n| n.file == "other.qi").count(),
            1
        );
    }

    #[test]
    fn flatten_of_empty_queue_is_empty() {
        assert!(flatten_note_queue(HashMap::new()).is_empty());
    }
}
