//! Runner configuration file.
//!
//! ```yaml
//! connect: 192.168.4.1:7070
//! session:
//!   response_timeout_ms: 500
//!   read_buffer_size: 1024
//!   connect_timeout_ms: 5000
//! recovery: reidentify
//! wait_ms: 2000
//! metrics_listen: 127.0.0.1:9000
//! ```

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use rfcomm_robot::{RecoveryPolicy, RobotConfig};
use rfcomm_session::SessionConfig;
use serde::{Deserialize, Serialize};

use crate::error::RunnerError;

/// Default time to wait for each reply.
pub const DEFAULT_WAIT_MS: u64 = 2000;

/// Default address of the simulated robot server.
pub const DEFAULT_LISTEN: &str = "127.0.0.1:7070";

/// Settings shared by every runner command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Robot address, `host:port`.
    pub connect: Option<String>,
    /// Session tunables.
    pub session: SessionConfig,
    /// Behaviour after a command times out.
    pub recovery: RecoveryPolicy,
    /// Time to wait for each reply before giving up.
    pub wait_ms: u64,
    /// Address for the Prometheus endpoint.
    pub metrics_listen: Option<SocketAddr>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        RunnerConfig {
            connect: None,
            session: SessionConfig::default(),
            recovery: RecoveryPolicy::default(),
            wait_ms: DEFAULT_WAIT_MS,
            metrics_listen: None,
        }
    }
}

impl RunnerConfig {
    /// Load from a YAML file.
    pub fn load(path: &Path) -> Result<Self, RunnerError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    /// Parse YAML text.
    pub fn from_yaml(text: &str) -> Result<Self, RunnerError> {
        let config: RunnerConfig = serde_yaml::from_str(text)?;
        config.session.validate()?;
        Ok(config)
    }

    /// Reply wait as a [`Duration`].
    pub fn wait(&self) -> Duration {
        Duration::from_millis(self.wait_ms)
    }

    /// Robot settings for CLI use. Identification is explicit there.
    pub fn robot_config(&self) -> RobotConfig {
        RobotConfig {
            session: self.session.clone(),
            recovery: self.recovery,
            identify_on_connect: false,
        }
    }

    /// The address to connect to, or an error if none was given.
    pub fn address(&self) -> Result<&str, RunnerError> {
        self.connect.as_deref().ok_or(RunnerError::NoAddress)
    }
}
