//! Typed decoding of robot responses.

use rfcomm_protocol::{Exchange, ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};

use crate::commands::{
    ID_DATE_LEN, ID_NAME_LEN, ID_TIME_LEN, OPCODE_ID, OPCODE_PING, OPCODE_VALUE_GET,
    OPCODE_VALUE_SET,
};

/// Identity record returned by `ID`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RobotId {
    /// Device name.
    pub name: String,
    /// Firmware build date.
    pub date: String,
    /// Firmware build time.
    pub time: String,
}

impl std::fmt::Display for RobotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} {})", self.name, self.date, self.time)
    }
}

/// A decoded robot response, one variant per command.
#[derive(Debug, Clone, PartialEq)]
pub enum RobotResponse {
    /// `PING` reply. The device always sends zero.
    Ping {
        /// The sync byte as received.
        sync: u8,
    },
    /// `ID` reply.
    Id(RobotId),
    /// `VALUE_GET` reply.
    Value(f32),
    /// `VALUE_SET` was written; the device sends nothing back.
    ValueWritten,
}

impl RobotResponse {
    /// Decode the completed response held by `exchange`, selected by its
    /// command.
    pub fn decode(exchange: &mut Exchange) -> ProtocolResult<Self> {
        match exchange.descriptor().opcode {
            OPCODE_PING => Ok(RobotResponse::Ping {
                sync: exchange.read_u8()?,
            }),
            OPCODE_ID => {
                let name = fixed_field(exchange, 0, ID_NAME_LEN)?;
                let date = fixed_field(exchange, ID_NAME_LEN, ID_DATE_LEN)?;
                let time = fixed_field(exchange, ID_NAME_LEN + ID_DATE_LEN, ID_TIME_LEN)?;
                Ok(RobotResponse::Id(RobotId { name, date, time }))
            }
            OPCODE_VALUE_GET => Ok(RobotResponse::Value(exchange.read_f32()?)),
            OPCODE_VALUE_SET => Ok(RobotResponse::ValueWritten),
            _ => Err(ProtocolError::UnexpectedCommand(exchange.name())),
        }
    }
}

/// Read a NUL-padded field of fixed width.
fn fixed_field(exchange: &Exchange, offset: usize, width: usize) -> ProtocolResult<String> {
    let mut text = exchange.read_string_at(offset, Some(width))?;
    if let Some(end) = text.find('\0') {
        text.truncate(end);
    }
    Ok(text)
}

/// Encode an identity record the way the firmware lays it out. Fields longer
/// than their slot are cut, always leaving room for a terminating NUL.
pub fn encode_id(id: &RobotId) -> Vec<u8> {
    let mut out = Vec::with_capacity(ID_NAME_LEN + ID_DATE_LEN + ID_TIME_LEN);
    for (field, width) in [
        (&id.name, ID_NAME_LEN),
        (&id.date, ID_DATE_LEN),
        (&id.time, ID_TIME_LEN),
    ] {
        let bytes = field.as_bytes();
        let len = bytes.len().min(width - 1);
        out.extend_from_slice(&bytes[..len]);
        out.resize(out.len() + width - len, 0);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{identify, ping, value_get, value_set, ID_RESPONSE_LEN};
    use approx::assert_relative_eq;

    fn sample_id() -> RobotId {
        RobotId {
            name: "newt-rfc".into(),
            date: "Oct 16 2026".into(),
            time: "09:41:00".into(),
        }
    }

    #[test]
    fn test_decode_ping() {
        let mut exchange = ping();
        exchange.accept_chunk(&[0]);
        assert_eq!(
            RobotResponse::decode(&mut exchange).unwrap(),
            RobotResponse::Ping { sync: 0 }
        );
    }

    #[test]
    fn test_decode_id() {
        let record = encode_id(&sample_id());
        assert_eq!(record.len(), ID_RESPONSE_LEN);
        assert_eq!(&record[..9], b"newt-rfc\0");

        let mut exchange = identify();
        assert!(exchange.accept_chunk(&record));
        assert_eq!(
            RobotResponse::decode(&mut exchange).unwrap(),
            RobotResponse::Id(sample_id())
        );
    }

    #[test]
    fn test_decode_id_empty_fields() {
        let id = RobotId {
            name: String::new(),
            date: "d".into(),
            time: String::new(),
        };
        let mut exchange = identify();
        exchange.accept_chunk(&encode_id(&id));
        assert_eq!(RobotResponse::decode(&mut exchange).unwrap(), RobotResponse::Id(id));
    }

    #[test]
    fn test_encode_id_truncates() {
        let id = RobotId {
            name: "a-very-long-name".into(),
            date: String::new(),
            time: String::new(),
        };
        let record = encode_id(&id);
        assert_eq!(record.len(), ID_RESPONSE_LEN);
        assert_eq!(&record[..9], b"a-very-l\0");
    }

    #[test]
    fn test_decode_value() {
        let mut exchange = value_get();
        exchange.accept_chunk(&(-1.25f32).to_le_bytes());
        match RobotResponse::decode(&mut exchange).unwrap() {
            RobotResponse::Value(v) => assert_relative_eq!(v, -1.25),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_value_written() {
        let mut exchange = value_set(1.0, 1).unwrap();
        assert_eq!(
            RobotResponse::decode(&mut exchange).unwrap(),
            RobotResponse::ValueWritten
        );
    }

    #[test]
    fn test_decode_short_response() {
        let mut exchange = value_get();
        exchange.accept_chunk(&[1, 2]);
        assert!(matches!(
            RobotResponse::decode(&mut exchange),
            Err(ProtocolError::ResponseTooShort { .. })
        ));
    }
}
