//! Background task supervision
//!
//! Long-lived loops exit cleanly on cancellation and return an error when
//! their stream or channel closes underneath them. The supervisor restarts
//! failed children with an exponential backoff so a transient fault cannot
//! turn into a hot restart loop.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// A run this long counts as healthy and resets the backoff
const HEALTHY_RUN: Duration = Duration::from_secs(60);

/// Run `child` until it returns `Ok` or the token is cancelled, restarting
/// it after each failure
///
/// The factory is invoked once per generation so every restart gets a fresh
/// future (and fresh stream handles).
pub fn spawn_supervised<F, Fut>(
    name: &'static str,
    cancel: CancellationToken,
    mut child: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut backoff = INITIAL_BACKOFF;

        loop {
            let started = Instant::now();
            match child().await {
                Ok(()) => {
                    tracing::debug!(task = name, "task finished");
                    return;
                }
                Err(e) => tracing::error!(task = name, error = %e, "task failed"),
            }

            if cancel.is_cancelled() {
                return;
            }

            if started.elapsed() >= HEALTHY_RUN {
                backoff = INITIAL_BACKOFF;
            }

            tracing::debug!(task = name, backoff = ?backoff, "restarting task");
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    })
}
