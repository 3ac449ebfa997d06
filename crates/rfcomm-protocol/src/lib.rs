//! Binary command/response protocol over a byte stream
//!
//! This crate holds the transport-agnostic half of the link: what a command
//! is, how its request is encoded and its response parsed, and the state
//! machine that keeps exactly one command on the wire at a time.
//!
//! # Protocol Overview
//!
//! Every request starts with a one-byte opcode followed by an optional
//! little-endian payload and an optional big-endian 16-bit checksum of the
//! payload. The peer answers with a response of a fixed, per-command length
//! (or nothing at all). There is no framing on the response side: the host
//! knows which command is in flight and how many bytes to wait for.
//!
//! - [`Catalog`] / [`CommandDescriptor`]: the command vocabulary
//! - [`Exchange`]: encode one request, accumulate and decode its response
//! - [`ProtocolEngine`]: single-flight FIFO dispatch with response timeouts
//!
//! # Example
//!
//! ```rust,ignore
//! use rfcomm_protocol::{CommandDescriptor, Exchange, ResponsePolicy};
//!
//! static GET: CommandDescriptor = CommandDescriptor::new("GET", 0x02, ResponsePolicy::Exact(4));
//!
//! let mut exchange = Exchange::new(&GET);
//! engine.enqueue(exchange, &mut io);
//! ```

mod catalog;
mod constants;
mod engine;
mod error;
mod exchange;
mod hex;

pub use catalog::*;
pub use constants::*;
pub use engine::*;
pub use error::*;
pub use exchange::*;
pub use hex::*;
