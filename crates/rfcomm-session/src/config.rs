//! Session configuration.

use std::time::Duration;

use rfcomm_protocol::RESPONSE_TIMEOUT_MS;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Default size of the reader thread's receive buffer.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;

/// Default timeout for establishing a TCP link.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

/// Tunables for one session. Every field has a default, so a partial YAML
/// block is enough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Time a command may take to respond, applied to every command.
    pub response_timeout_ms: u64,
    /// Largest chunk the reader thread hands to the engine at once.
    pub read_buffer_size: usize,
    /// Time allowed for the transport to connect.
    pub connect_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            response_timeout_ms: RESPONSE_TIMEOUT_MS,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}

impl SessionConfig {
    /// Response timeout as a [`Duration`].
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Reject values the session cannot run with.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.response_timeout_ms == 0 {
            return Err(SessionError::InvalidConfig(
                "response_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.read_buffer_size == 0 {
            return Err(SessionError::InvalidConfig(
                "read_buffer_size must be greater than zero".into(),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(SessionError::InvalidConfig(
                "connect_timeout_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
