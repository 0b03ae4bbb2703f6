//! Single named fan-out bus
//!
//! A `Stream` owns one input sink and a list of bounded output sinks. A
//! dedicated fan-out task moves items from the input to every registered
//! reader with a non-blocking send, dropping per-reader when a sink is full.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::manager::Manager;
use crate::error::{Error, Result};

/// Bounded capacity of each reader sink
pub(super) const READER_CAPACITY: usize = 8;

/// Capacity of the shared input sink
const INPUT_CAPACITY: usize = 1;

/// Per-subscriber output sink registered with a stream
struct ReaderSlot {
    id: u64,
    tx: mpsc::Sender<Bytes>,
}

/// Mutable stream state, guarded by a single per-stream lock
///
/// The lock is taken exclusively for list and counter mutation, and shared
/// by the fan-out task while it iterates the reader list.
struct Inner {
    /// `None` once the stream has begun terminating
    input: Option<mpsc::Sender<Bytes>>,
    readers: Vec<ReaderSlot>,
    writer_count: usize,
    next_reader_id: u64,
}

/// A single named fan-out bus
///
/// Constructed by the [`Manager`] on first access; self-terminates once the
/// last reader and writer are released.
pub struct Stream {
    name: String,
    dropped: AtomicU64,
    inner: RwLock<Inner>,
}

impl Stream {
    /// Create a stream and start its fan-out task
    pub(super) fn spawn(name: &str) -> Arc<Self> {
        let (input_tx, input_rx) = mpsc::channel(INPUT_CAPACITY);

        let stream = Arc::new(Self {
            name: name.to_owned(),
            dropped: AtomicU64::new(0),
            inner: RwLock::new(Inner {
                input: Some(input_tx),
                readers: Vec::new(),
                writer_count: 0,
                next_reader_id: 0,
            }),
        });

        tokio::spawn(Arc::clone(&stream).fan_out(input_rx));

        stream
    }

    /// Register a new bounded reader sink
    ///
    /// Returns `None` if the stream has already begun terminating; the
    /// caller must start a fresh stream instead.
    pub(super) fn attach_reader(&self) -> Option<(u64, mpsc::Receiver<Bytes>)> {
        let mut inner = self.inner.write();
        inner.input.as_ref()?;

        let (tx, rx) = mpsc::channel(READER_CAPACITY);
        let id = inner.next_reader_id;
        inner.next_reader_id += 1;
        inner.readers.push(ReaderSlot { id, tx });

        tracing::debug!(
            stream = %self.name,
            reader = id,
            readers = inner.readers.len(),
            "reader attached"
        );

        Some((id, rx))
    }

    /// Register a new writer and hand back a clone of the input sink
    pub(super) fn attach_writer(&self) -> Option<mpsc::Sender<Bytes>> {
        let mut inner = self.inner.write();
        let input = inner.input.clone()?;
        inner.writer_count += 1;
        Some(input)
    }

    /// Deregister a reader and close its sink
    ///
    /// Returns true iff the stream is now fully idle and should be evicted.
    pub(super) fn close_reader(&self, id: u64) -> bool {
        let mut inner = self.inner.write();
        if let Some(pos) = inner.readers.iter().position(|r| r.id == id) {
            // Deregistration precedes the close: dropping the sender here is
            // the one and only close of this sink.
            inner.readers.remove(pos);
        }

        tracing::debug!(
            stream = %self.name,
            readers = inner.readers.len(),
            "reader closed"
        );

        self.maybe_close(&mut inner)
    }

    /// Release one writer reference
    ///
    /// Returns true iff the stream is now fully idle and should be evicted.
    pub(super) fn close_writer(&self) -> bool {
        let mut inner = self.inner.write();
        inner.writer_count = inner.writer_count.saturating_sub(1);

        tracing::debug!(
            stream = %self.name,
            writers = inner.writer_count,
            "writer closed"
        );

        self.maybe_close(&mut inner)
    }

    /// Close the input sink if both reference counts reached zero
    ///
    /// Requires the stream lock to be held exclusively.
    fn maybe_close(&self, inner: &mut Inner) -> bool {
        if inner.writer_count == 0 && inner.readers.is_empty() && inner.input.is_some() {
            tracing::debug!(stream = %self.name, "closing stream");
            inner.input = None;
            return true;
        }
        false
    }

    /// Current counters for this stream
    pub(super) fn stats(&self) -> StreamStats {
        let inner = self.inner.read();
        StreamStats {
            readers: inner.readers.len(),
            writers: inner.writer_count,
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// Fan-out task: runs for the stream's entire lifetime
    ///
    /// Exits when the input sink closes, not when the reader list empties;
    /// remaining reader sinks are closed in registration order after the
    /// last queued item has been delivered.
    async fn fan_out(self: Arc<Self>, mut input: mpsc::Receiver<Bytes>) {
        while let Some(item) = input.recv().await {
            // Shared lock so the reader list cannot shrink mid-iteration.
            // Safe to hold across the sends because they never block.
            let inner = self.inner.read();
            for reader in &inner.readers {
                match reader.tx.try_send(item.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(stream = %self.name, "dropping data for slow reader");
                    }
                    Err(TrySendError::Closed(_)) => {}
                }
            }
        }

        let mut inner = self.inner.write();
        for reader in inner.readers.drain(..) {
            tracing::trace!(stream = %self.name, reader = reader.id, "closing reader sink");
        }

        tracing::debug!(stream = %self.name, "fan-out finished");
    }
}

/// Counters exposed for observability and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamStats {
    /// Registered reader sinks
    pub readers: usize,
    /// Outstanding writer tokens
    pub writers: usize,
    /// Items discarded because a reader sink was full
    pub dropped: u64,
}

/// A per-subscriber output sink
///
/// Receives every item published to the stream, in publish order, minus any
/// items dropped while this sink was full. Dropping the handle releases the
/// subscription; the [`Manager`] evicts the stream once the last reference
/// is gone.
pub struct ReaderHandle {
    name: String,
    id: u64,
    rx: mpsc::Receiver<Bytes>,
    manager: Arc<Manager>,
}

impl ReaderHandle {
    pub(super) fn new(
        name: String,
        id: u64,
        rx: mpsc::Receiver<Bytes>,
        manager: Arc<Manager>,
    ) -> Self {
        Self {
            name,
            id,
            rx,
            manager,
        }
    }

    /// Name of the stream this handle is subscribed to
    pub fn stream_name(&self) -> &str {
        &self.name
    }

    /// Receive the next item
    ///
    /// Returns `None` once the stream has terminated and all buffered items
    /// have been drained.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Release the subscription explicitly
    ///
    /// Equivalent to dropping the handle.
    pub fn release(self) {}
}

impl Drop for ReaderHandle {
    fn drop(&mut self) {
        self.manager.release_reader(&self.name, self.id);
    }
}

/// A per-publisher reference to a stream's input sink
///
/// Dropping the token releases the writer reference; the [`Manager`] evicts
/// the stream once the last reference is gone.
pub struct WriterToken {
    name: String,
    tx: mpsc::Sender<Bytes>,
    manager: Arc<Manager>,
}

impl WriterToken {
    pub(super) fn new(name: String, tx: mpsc::Sender<Bytes>, manager: Arc<Manager>) -> Self {
        Self { name, tx, manager }
    }

    /// Name of the stream this token publishes to
    pub fn stream_name(&self) -> &str {
        &self.name
    }

    /// Publish one item
    ///
    /// Waits for space in the input sink, never for readers: a send that
    /// returns `Ok` only guarantees the item entered the input sink.
    pub async fn send(&self, item: Bytes) -> Result<()> {
        self.tx.send(item).await.map_err(|_| Error::StreamClosed)
    }

    /// Release the writer reference explicitly
    ///
    /// Equivalent to dropping the token.
    pub fn release(self) {}
}

impl Drop for WriterToken {
    fn drop(&mut self) {
        self.manager.release_writer(&self.name);
    }
}
