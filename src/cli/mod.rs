//! Command-line interface
//!
//! `server` runs the service; `pub` and `sub` are thin clients for the
//! stream API, reading stdin and writing stdout line by line.

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::client::ApiClient;
use crate::error::Result;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8080";

#[derive(Debug, Parser)]
#[command(name = "yakapi", about = "Rover telemetry service with a named stream hub", version)]
pub struct Cli {
    /// Log level when RUST_LOG is not set (info or debug)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the API server
    Server,

    /// Publish one event per stdin line to a stream
    #[command(name = "pub")]
    Publish {
        /// Stream to publish to
        stream: String,

        /// Server base URL
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },

    /// Subscribe to streams and print their items
    #[command(name = "sub")]
    Subscribe {
        /// Streams to subscribe to
        #[arg(required = true)]
        streams: Vec<String>,

        /// Server base URL
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
}

/// Publish every non-empty stdin line as one event
pub async fn do_pub(server: &str, stream: &str) -> Result<()> {
    let client = ApiClient::new(server)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.is_empty() {
            continue;
        }

        client.publish(stream, line.clone().into_bytes()).await?;
        tracing::debug!(content = %line, "published event");
    }

    Ok(())
}

/// Print every received item as `<stream>: <data>`
pub async fn do_sub(server: &str, streams: &[String]) -> Result<()> {
    let client = ApiClient::new(server)?;

    let mut events = client.subscribe(streams.to_vec());
    while let Some(event) = events.recv().await {
        println!("{}: {}", event.stream, String::from_utf8_lossy(&event.data));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_sub_with_multiple_streams() {
        let cli = Cli::parse_from(["yakapi", "sub", "telemetry", "ci"]);
        match cli.command {
            Command::Subscribe { streams, server } => {
                assert_eq!(streams, vec!["telemetry".to_owned(), "ci".to_owned()]);
                assert_eq!(server, DEFAULT_SERVER);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn sub_requires_at_least_one_stream() {
        assert!(Cli::try_parse_from(["yakapi", "sub"]).is_err());
    }
}
