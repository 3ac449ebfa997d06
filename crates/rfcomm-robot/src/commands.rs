//! Robot command vocabulary and request builders.

use rfcomm_protocol::{Catalog, CommandDescriptor, Exchange, ProtocolResult, ResponsePolicy};

// ============================================================================
// Opcodes
// ============================================================================

/// Liveness check; also advances the device value by its ping increment.
pub const OPCODE_PING: u8 = 0x00;
/// Read the device identity record.
pub const OPCODE_ID: u8 = 0x01;
/// Read the device value.
pub const OPCODE_VALUE_GET: u8 = 0x02;
/// Write the device value and ping increment.
pub const OPCODE_VALUE_SET: u8 = 0x82;

// ============================================================================
// Response layout
// ============================================================================

/// Width of the NUL-padded name field of the identity record.
pub const ID_NAME_LEN: usize = 9;
/// Width of the NUL-padded build date field.
pub const ID_DATE_LEN: usize = 12;
/// Width of the NUL-padded build time field.
pub const ID_TIME_LEN: usize = 9;
/// Total size of the identity record.
pub const ID_RESPONSE_LEN: usize = ID_NAME_LEN + ID_DATE_LEN + ID_TIME_LEN;

/// Size of the `VALUE_SET` payload: f32 value and i32 increment.
pub const VALUE_SET_PAYLOAD_LEN: usize = 8;

// ============================================================================
// Descriptors
// ============================================================================

/// `PING`: one sync byte back, expected to be zero.
pub static PING: CommandDescriptor =
    CommandDescriptor::new("PING", OPCODE_PING, ResponsePolicy::Exact(1));

/// `ID`: name, build date and build time.
pub static ID: CommandDescriptor =
    CommandDescriptor::new("ID", OPCODE_ID, ResponsePolicy::Exact(ID_RESPONSE_LEN));

/// `VALUE_GET`: the current value as f32.
pub static VALUE_GET: CommandDescriptor =
    CommandDescriptor::new("VALUE_GET", OPCODE_VALUE_GET, ResponsePolicy::Exact(4));

/// `VALUE_SET`: no response.
pub static VALUE_SET: CommandDescriptor =
    CommandDescriptor::new("VALUE_SET", OPCODE_VALUE_SET, ResponsePolicy::None);

static DESCRIPTORS: [&CommandDescriptor; 4] = [&PING, &ID, &VALUE_GET, &VALUE_SET];

/// Every robot command, for opcode lookup.
pub static CATALOG: Catalog = Catalog::new(&DESCRIPTORS);

// ============================================================================
// Builders
// ============================================================================

/// Build a `PING` request.
pub fn ping() -> Exchange {
    Exchange::new(&PING)
}

/// Build an `ID` request.
pub fn identify() -> Exchange {
    Exchange::new(&ID)
}

/// Build a `VALUE_GET` request.
pub fn value_get() -> Exchange {
    Exchange::new(&VALUE_GET)
}

/// Build a `VALUE_SET` request carrying the new value, the amount each
/// `PING` adds to it (in thousandths), and the payload checksum.
pub fn value_set(value: f32, ping_increment: i32) -> ProtocolResult<Exchange> {
    let mut exchange = Exchange::new(&VALUE_SET);
    exchange.write_f32(value)?;
    exchange.write_i32(ping_increment)?;
    exchange.write_checksum()?;
    Ok(exchange)
}
