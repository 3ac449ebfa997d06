//! Runner error types.

use rfcomm_robot::RobotError;
use rfcomm_session::SessionError;
use thiserror::Error;

/// Errors reported by runner commands.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// File or socket failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file could not be parsed.
    #[error("invalid configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The configuration file parsed but holds bad session values.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The robot link failed.
    #[error(transparent)]
    Robot(#[from] RobotError),

    /// No robot address in the configuration or on the command line.
    #[error("no robot address given; use --connect or set `connect` in the config file")]
    NoAddress,

    /// No reply arrived within the wait time.
    #[error("no reply to {0} within {1} ms")]
    NoReply(&'static str, u64),

    /// The robot timed out a command.
    #[error("{command} aborted after {received} of {expected} response bytes")]
    Aborted {
        /// Command name.
        command: &'static str,
        /// Bytes received.
        received: usize,
        /// Bytes expected, or `?` when not known.
        expected: String,
    },

    /// A request could not be written.
    #[error("{command} could not be sent: {reason}")]
    WriteFailed {
        /// Command name.
        command: &'static str,
        /// Transport error text.
        reason: String,
    },

    /// A reply could not be decoded.
    #[error("malformed {command} reply: {reason}")]
    Malformed {
        /// Command name.
        command: &'static str,
        /// Decoding failure.
        reason: String,
    },

    /// The link dropped while waiting.
    #[error("robot disconnected{}", reason_suffix(.0))]
    Disconnected(Option<String>),

    /// The Prometheus exporter could not start.
    #[error("metrics exporter: {0}")]
    Metrics(String),
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason.as_ref().map(|r| format!(": {}", r)).unwrap_or_default()
}
