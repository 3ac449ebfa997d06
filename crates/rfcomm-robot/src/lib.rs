//! Robot vocabulary on top of the RFCOMM command link.
//!
//! The robot understands four commands:
//!
//! | Command | Opcode | Request | Response |
//! |---|---|---|---|
//! | `PING` | `0x00` | none | one zero byte |
//! | `ID` | `0x01` | none | name\[9\], date\[12\], time\[9\], NUL padded |
//! | `VALUE_GET` | `0x02` | none | f32 |
//! | `VALUE_SET` | `0x82` | f32 value, i32 ping increment, checksum | none |
//!
//! [`Robot`] wraps a session with these commands and reports results as
//! [`RobotEvent`]s. The [`sim`] module contains a device-side simulation
//! used by tests and the `rfcomm simulate` command.

mod commands;
mod error;
mod handler;
mod response;
mod robot;
pub mod sim;

pub use commands::*;
pub use error::*;
pub use handler::*;
pub use response::*;
pub use robot::*;
