//! Session error types.

use thiserror::Error;

/// Errors that can occur while establishing or using a session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The transport could not establish a link.
    #[error("failed to connect to {peer}: {source}")]
    Connect {
        /// Address or name of the peer.
        peer: String,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },

    /// I/O error outside connection setup.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The session has already shut down.
    #[error("session is closed")]
    Closed,

    /// A configuration value is out of range.
    #[error("invalid session configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
