//! Server configuration
//!
//! Everything comes from `YAKAPI_*` environment variables; a `.env` file is
//! loaded by the binary before this is read. Only the port can fail to
//! parse; every other setting is optional.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

pub(crate) const DEFAULT_PORT: u16 = 8080;
const DEFAULT_NAME: &str = "YakAPI Server";

/// Runtime configuration for the service
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,
    /// Display name reported by `/v1`
    pub name: String,
    /// Optional project link reported by `/v1`
    pub project: Option<String>,
    /// Optional operator link reported by `/v1`
    pub operator: Option<String>,
    /// Ground-station base URL; its loops run iff this is set
    pub gds_api_url: Option<String>,
    /// Path to the latest camera capture
    pub cam_capture_path: Option<PathBuf>,
    /// How long `/v1/ci?wait=1` waits for a result
    pub ci_wait_timeout: Duration,
    /// How often the wait loop polls the result ring
    pub ci_poll_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            name: DEFAULT_NAME.to_owned(),
            project: None,
            operator: None,
            gds_api_url: None,
            cam_capture_path: None,
            ci_wait_timeout: Duration::from_secs(30),
            ci_poll_interval: Duration::from_millis(50),
        }
    }
}

impl ServerConfig {
    /// Load configuration from the environment
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        match env::var("YAKAPI_PORT") {
            Ok(value) if !value.is_empty() => {
                config.port = value.parse().map_err(|_| Error::InvalidEnv {
                    var: "YAKAPI_PORT",
                    value,
                })?;
            }
            _ => {}
        }

        if let Some(name) = non_empty(env::var("YAKAPI_NAME")) {
            config.name = name;
        }
        config.project = non_empty(env::var("YAKAPI_PROJECT"));
        config.operator = non_empty(env::var("YAKAPI_OPERATOR"));
        config.gds_api_url = non_empty(env::var("YAKAPI_GDS_API_URL"));
        config.cam_capture_path = non_empty(env::var("YAKAPI_CAM_CAPTURE_PATH")).map(PathBuf::from);

        Ok(config)
    }
}

fn non_empty(var: std::result::Result<String, env::VarError>) -> Option<String> {
    var.ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.name, "YakAPI Server");
        assert!(config.gds_api_url.is_none());
        assert_eq!(config.ci_wait_timeout, Duration::from_secs(30));
        assert_eq!(config.ci_poll_interval, Duration::from_millis(50));
    }
}
