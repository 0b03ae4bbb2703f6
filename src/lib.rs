//! yakapi: a rover telemetry service built around an in-process stream hub
//!
//! The heart of the service is the [`hub`]: dynamically created,
//! reference-counted named streams that fan each published item out to any
//! number of concurrent readers, dropping per-reader when a reader falls
//! behind. Everything else attaches to the hub:
//!
//! - [`server`] exposes publish/subscribe over HTTP (`POST`/`GET
//!   /v1/stream/{name}`) plus the command endpoint and Prometheus metrics,
//! - [`ci`] turns free-form command strings into identified commands on the
//!   `ci` stream and collects results from `ci:result` into a bounded ring,
//! - [`telemetry`] folds the `telemetry` stream into rolling snapshots for
//!   gauge export and ground-station upload,
//! - [`gds`] talks to the ground station in both directions,
//! - [`client`] and [`cli`] provide the `pub`/`sub` command-line tools.

pub mod ci;
pub mod cli;
pub mod client;
pub mod error;
pub mod gds;
pub mod hub;
pub mod metrics;
pub mod server;
pub mod supervisor;
pub mod telemetry;

pub use error::{Error, Result};
pub use hub::Manager;
