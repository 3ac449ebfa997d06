//! Robot error types.

use rfcomm_protocol::ProtocolError;
use rfcomm_session::SessionError;
use thiserror::Error;

/// Errors returned by the robot API.
#[derive(Debug, Error)]
pub enum RobotError {
    /// A request could not be encoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The session failed or is closed.
    #[error("session error: {0}")]
    Session(#[from] SessionError),
}
