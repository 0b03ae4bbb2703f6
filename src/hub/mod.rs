//! Named stream hub for pub/sub routing
//!
//! The hub manages dynamically created, reference-counted streams and routes
//! published items from any number of writers to any number of readers.
//! Streams appear on first access from either side and are evicted once the
//! last reader and the last writer are gone.
//!
//! # Architecture
//!
//! ```text
//!                        Arc<Manager>
//!                 ┌──────────────────────────┐
//!                 │ streams: HashMap<String, │
//!                 │   Arc<Stream> {          │
//!                 │     input: mpsc::Sender, │
//!                 │     readers: Vec<Sender>,│
//!                 │     writer_count,        │
//!                 │   }                      │
//!                 │ >                        │
//!                 └────────────┬─────────────┘
//!                              │
//!          ┌───────────────────┼───────────────────┐
//!          │                   │                   │
//!          ▼                   ▼                   ▼
//!     [WriterToken]      [ReaderHandle]      [ReaderHandle]
//!     token.send()       handle.recv()       handle.recv()
//!          │                   ▲                   ▲
//!          └──► fan-out task ──┴───────────────────┘
//! ```
//!
//! # Delivery policy
//!
//! Each stream runs one fan-out task for its whole lifetime. Delivery to a
//! reader is a non-blocking send into a small bounded sink; when the sink is
//! full the item is dropped for that reader only. A slow reader therefore
//! never stalls the publisher or its sibling readers.
//!
//! Items are `bytes::Bytes`, so fan-out clones share one allocation.

pub mod manager;
pub mod stream;

pub use manager::Manager;
pub use stream::{ReaderHandle, StreamStats, WriterToken};
