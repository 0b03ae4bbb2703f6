//! Crate-wide error and result types

use std::path::PathBuf;

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Error type shared by the hub, the command subsystem, and the
/// ground-station client
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A command string was empty after tokenization
    #[error("empty command")]
    EmptyCommand,

    /// A stream sink closed underneath a long-lived consumer
    ///
    /// This is the terminal signal a consumer hands to its supervisor.
    #[error("stream closed")]
    StreamClosed,

    /// An environment variable held a value that could not be parsed
    #[error("invalid value for {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },

    /// The capture file configured for the camera endpoint was unreadable
    #[error("failed to read capture file {path}: {source}")]
    CaptureUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The ground station answered with a status we did not expect
    #[error("unexpected status code: {0}")]
    UnexpectedStatus(u16),

    /// The ground station answered with a content type we did not expect
    #[error("unexpected content type: {0}")]
    UnexpectedContentType(String),

    /// HTTP request failure talking to an external service
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON encode/decode failure
    #[error("serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Metrics registry failure
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
