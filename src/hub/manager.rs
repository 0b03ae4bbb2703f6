//! Stream registry with reference-counted eviction
//!
//! The `Manager` maps names to live streams. Entries appear lazily on first
//! reader or writer access and disappear atomically with the stream's
//! self-termination: no caller can observe a stream that is part-way through
//! tearing down.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::stream::{ReaderHandle, Stream, StreamStats, WriterToken};

/// Process-wide registry of live streams
///
/// Guarded by a single lock that is held only for map and counter mutation,
/// never across a channel send.
#[derive(Default)]
pub struct Manager {
    streams: Mutex<HashMap<String, Arc<Stream>>>,
}

impl Manager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire a writer token for `name`, creating the stream if needed
    pub fn get_writer(self: &Arc<Self>, name: &str) -> WriterToken {
        let mut streams = self.streams.lock();
        loop {
            let stream = streams
                .entry(name.to_owned())
                .or_insert_with(|| Stream::spawn(name))
                .clone();

            match stream.attach_writer() {
                Some(tx) => return WriterToken::new(name.to_owned(), tx, Arc::clone(self)),
                // Entry drained before eviction landed; replace it.
                None => {
                    streams.remove(name);
                }
            }
        }
    }

    /// Acquire a reader handle for `name`, creating the stream if needed
    pub fn get_reader(self: &Arc<Self>, name: &str) -> ReaderHandle {
        let mut streams = self.streams.lock();
        loop {
            let stream = streams
                .entry(name.to_owned())
                .or_insert_with(|| Stream::spawn(name))
                .clone();

            match stream.attach_reader() {
                Some((id, rx)) => {
                    return ReaderHandle::new(name.to_owned(), id, rx, Arc::clone(self))
                }
                None => {
                    streams.remove(name);
                }
            }
        }
    }

    /// Release a reader handle
    ///
    /// Handles release themselves on drop; this consuming form is for call
    /// sites that want the release to read as an explicit step.
    pub fn return_reader(&self, handle: ReaderHandle) {
        handle.release();
    }

    /// Release a writer token
    pub fn return_writer(&self, token: WriterToken) {
        token.release();
    }

    /// Number of live streams
    pub fn len(&self) -> usize {
        self.streams.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.lock().is_empty()
    }

    /// Counters for a live stream, if present
    pub fn stream_stats(&self, name: &str) -> Option<StreamStats> {
        self.streams.lock().get(name).map(|s| s.stats())
    }

    pub(super) fn release_reader(&self, name: &str, id: u64) {
        let mut streams = self.streams.lock();
        let Some(stream) = streams.get(name) else {
            tracing::warn!(stream = name, "stream not found");
            return;
        };

        if stream.close_reader(id) {
            streams.remove(name);
            tracing::debug!(stream = name, "stream evicted");
        }
    }

    pub(super) fn release_writer(&self, name: &str) {
        let mut streams = self.streams.lock();
        let Some(stream) = streams.get(name) else {
            tracing::warn!(stream = name, "stream not found");
            return;
        };

        if stream.close_writer() {
            streams.remove(name);
            tracing::debug!(stream = name, "stream evicted");
        }
    }
}
