//! Threaded session around the RFCOMM protocol engine.
//!
//! A [`Session`] connects a [`Transport`], then runs the
//! [`ProtocolEngine`](rfcomm_protocol::ProtocolEngine) on its own thread with
//! dedicated reader and writer threads feeding it. Callers enqueue
//! [`Exchange`](rfcomm_protocol::Exchange)s; results arrive at the
//! [`ResponseHandler`](rfcomm_protocol::ResponseHandler) on the session
//! thread.
//!
//! # Example
//!
//! ```rust,ignore
//! use rfcomm_session::{Session, SessionConfig, TcpTransport};
//!
//! let mut transport = TcpTransport::new("127.0.0.1:7070");
//! let session = Session::start(&mut transport, handler, SessionConfig::default())?;
//! session.enqueue(exchange)?;
//! let handler = session.close()?;
//! ```

mod config;
mod error;
pub mod loopback;
mod session;
mod transport;

pub use config::*;
pub use error::*;
pub use session::{Session, SessionHandle, SessionObserver};
pub use transport::*;
