//! Debug rendering of raw link bytes.

use std::fmt::Write;

/// Render bytes as `{0A:1B:FF}`, or `{}` when empty.
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 3);
    out.push('{');
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(':');
        }
        let _ = write!(out, "{:02X}", byte);
    }
    out.push('}');
    out
}
