//! Protocol error types.

use thiserror::Error;

/// Errors that can occur when encoding requests or decoding responses.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Writing would grow the request past its maximum size.
    #[error("request too long: maximum {max} bytes, would be {actual}")]
    RequestTooLong {
        /// Maximum allowed request size.
        max: usize,
        /// Size the request would have after the write.
        actual: usize,
    },

    /// A read needs more bytes than the response holds.
    #[error("response too short: need {needed} bytes at offset {offset}, have {available}")]
    ResponseTooShort {
        /// Offset the read started at.
        offset: usize,
        /// Number of bytes the read needs.
        needed: usize,
        /// Total bytes in the response.
        available: usize,
    },

    /// A read was attempted before any response bytes arrived.
    #[error("no response received")]
    NoResponse,

    /// String field is not valid UTF-8.
    #[error("invalid UTF-8 in string field at offset {offset}")]
    InvalidUtf8 {
        /// Offset of the string field.
        offset: usize,
    },

    /// Two catalog entries share an opcode.
    #[error("duplicate opcode in catalog: 0x{0:02X}")]
    DuplicateOpcode(u8),

    /// A catalog entry uses the reserved idle opcode.
    #[error("catalog entry uses reserved opcode 0x{0:02X}")]
    ReservedOpcode(u8),

    /// An exchange was handed to a decoder that does not know its command.
    #[error("unexpected command: {0}")]
    UnexpectedCommand(&'static str),
}

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::ResponseTooShort {
            offset: 28,
            needed: 4,
            available: 30,
        };
        assert_eq!(
            err.to_string(),
            "response too short: need 4 bytes at offset 28, have 30"
        );

        let err = ProtocolError::DuplicateOpcode(0x82);
        assert!(err.to_string().contains("0x82"));
    }
}
