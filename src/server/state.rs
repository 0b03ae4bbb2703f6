//! Shared handler state

use std::sync::Arc;
use std::time::Instant;

use crate::ci::ResultCollector;
use crate::error::Result;
use crate::hub::Manager;
use crate::metrics::Metrics;
use crate::server::config::ServerConfig;

/// State shared by every request handler and background task
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<Manager>,
    pub results: Arc<ResultCollector>,
    pub metrics: Arc<Metrics>,
    pub config: Arc<ServerConfig>,
    /// Service start time, the base for uptime reporting
    pub boot: Instant,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Result<Self> {
        let boot = Instant::now();

        Ok(Self {
            manager: Arc::new(Manager::new()),
            results: Arc::new(ResultCollector::new()),
            metrics: Arc::new(Metrics::new(boot)?),
            config: Arc::new(config),
            boot,
        })
    }
}
