//! HTTP client for the service's own stream API
//!
//! Used by the `pub` and `sub` subcommands: publish posts one item per
//! call, subscribe consumes the chunked newline-delimited stream endpoint
//! and fans events from any number of streams into one channel.

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// One item received from a subscribed stream
#[derive(Debug, Clone)]
pub struct Event {
    pub stream: String,
    pub data: Bytes,
}

/// Client for the stream API
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
}

impl ApiClient {
    /// Create a client for the given server base URL
    ///
    /// No overall request timeout is set: subscriptions are long-lived by
    /// design. Connection establishment is still bounded.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            http,
        })
    }

    /// Publish one item to a stream
    pub async fn publish(&self, stream: &str, data: Vec<u8>) -> Result<()> {
        let url = format!("{}/v1/stream/{}", self.base_url, stream);

        let resp = self.http.post(&url).body(data).send().await?;
        if !resp.status().is_success() {
            return Err(Error::UnexpectedStatus(resp.status().as_u16()));
        }

        Ok(())
    }

    /// Subscribe to one or more streams
    ///
    /// Each stream gets its own connection; events from all of them arrive
    /// on the returned channel. The channel closes once every subscription
    /// has ended.
    pub fn subscribe(&self, streams: Vec<String>) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(64);

        for stream in streams {
            let client = self.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Err(e) = client.subscribe_stream(&stream, tx).await {
                    tracing::error!(stream = %stream, error = %e, "subscription ended");
                }
            });
        }

        rx
    }

    async fn subscribe_stream(&self, stream: &str, out: mpsc::Sender<Event>) -> Result<()> {
        let url = format!("{}/v1/stream/{}", self.base_url, stream);

        let resp = self.http.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(Error::UnexpectedStatus(resp.status().as_u16()));
        }

        let mut chunks = resp.bytes_stream();
        let mut buf = BytesMut::new();

        while let Some(chunk) = chunks.next().await {
            buf.extend_from_slice(&chunk?);

            // One event per newline-delimited item; partial items wait for
            // the next chunk.
            while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                let line = buf.split_to(pos + 1).freeze();
                let event = Event {
                    stream: stream.to_owned(),
                    data: line.slice(..pos),
                };
                if out.send(event).await.is_err() {
                    return Ok(());
                }
            }
        }

        Ok(())
    }
}
