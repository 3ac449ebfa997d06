//! Protocol constants
//!
//! Values shared by every command on the link, independent of the
//! vocabulary a particular device understands.

use std::time::Duration;

// ============================================================================
// Opcodes
// ============================================================================

/// Reserved opcode of the idle sentinel. Never transmitted and never valid
/// in a catalog.
pub const OPCODE_NONE: u8 = 0xFF;

// ============================================================================
// Sizes
// ============================================================================

/// Maximum size of an encoded request, opcode and checksum included.
pub const MAX_REQUEST_SIZE: usize = 1024;

/// Size of the trailing checksum field.
pub const CHECKSUM_SIZE: usize = 2;

// ============================================================================
// Timing
// ============================================================================

/// Every command is expected to respond within this time.
pub const RESPONSE_TIMEOUT_MS: u64 = 500;

/// [`RESPONSE_TIMEOUT_MS`] as a [`Duration`].
pub const RESPONSE_TIMEOUT: Duration = Duration::from_millis(RESPONSE_TIMEOUT_MS);
