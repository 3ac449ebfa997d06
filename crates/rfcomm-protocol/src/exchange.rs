//! Per-command request builder and response parser.
//!
//! An [`Exchange`] holds the bytes to send for one command and the bytes that
//! came back for it. Multi-byte values use the device's byte order
//! (little-endian) regardless of the host. The only exception is the
//! trailing checksum, which goes out big-endian.
//!
//! ```text
//! +--------+---------------------------+----------------+
//! | opcode | payload (little-endian)   | checksum (BE)  |
//! +--------+---------------------------+----------------+
//!            \_______ summed _______/     optional
//! ```

use bytes::{Bytes, BytesMut};

use crate::catalog::{CommandDescriptor, ResponsePolicy, IDLE};
use crate::constants::MAX_REQUEST_SIZE;
use crate::error::{ProtocolError, ProtocolResult};

/// One command/response transaction, from encoding to completion or abort.
#[derive(Debug, Clone)]
pub struct Exchange {
    /// The command this exchange carries.
    descriptor: &'static CommandDescriptor,
    /// Encoded request, always starting with the opcode.
    outbound: BytesMut,
    /// Running sum of payload bytes.
    checksum: u16,
    /// Accumulated response, absent until the first chunk arrives.
    inbound: Option<BytesMut>,
    /// Read position for sequential typed reads.
    cursor: usize,
}

impl Exchange {
    /// Start a new exchange for a command. The opcode is written immediately
    /// and is not part of the checksum.
    pub fn new(descriptor: &'static CommandDescriptor) -> Self {
        let mut outbound = BytesMut::with_capacity(16);
        outbound.extend_from_slice(&[descriptor.opcode]);
        Exchange {
            descriptor,
            outbound,
            checksum: 0,
            inbound: None,
            cursor: 0,
        }
    }

    /// The idle sentinel held by the engine when no command is active.
    pub fn idle() -> Self {
        Exchange::new(&IDLE)
    }

    /// The command descriptor.
    pub fn descriptor(&self) -> &'static CommandDescriptor {
        self.descriptor
    }

    /// Command name.
    pub fn name(&self) -> &'static str {
        self.descriptor.name
    }

    /// Whether this is the idle sentinel.
    pub fn is_idle(&self) -> bool {
        self.descriptor.is_idle()
    }

    /// Whether completion waits for response bytes.
    pub fn requires_response(&self) -> bool {
        self.descriptor.policy.requires_response()
    }

    // ========================================================================
    // Encoding
    // ========================================================================

    /// Append raw bytes to the request, optionally folding them into the
    /// checksum.
    ///
    /// Fails without modifying the request if it would exceed
    /// [`MAX_REQUEST_SIZE`].
    pub fn write_raw(&mut self, data: &[u8], include_in_checksum: bool) -> ProtocolResult<()> {
        let actual = self.outbound.len() + data.len();
        if actual > MAX_REQUEST_SIZE {
            return Err(ProtocolError::RequestTooLong {
                max: MAX_REQUEST_SIZE,
                actual,
            });
        }
        if include_in_checksum {
            for &byte in data {
                self.checksum = self.checksum.wrapping_add(u16::from(byte));
            }
        }
        self.outbound.extend_from_slice(data);
        Ok(())
    }

    /// Append checksummed bytes.
    pub fn write(&mut self, data: &[u8]) -> ProtocolResult<()> {
        self.write_raw(data, true)
    }

    /// Append a single byte.
    pub fn write_u8(&mut self, value: u8) -> ProtocolResult<()> {
        self.write(&[value])
    }

    /// Append a 16-bit integer.
    pub fn write_i16(&mut self, value: i16) -> ProtocolResult<()> {
        self.write(&value.to_le_bytes())
    }

    /// Append a 32-bit integer.
    pub fn write_i32(&mut self, value: i32) -> ProtocolResult<()> {
        self.write(&value.to_le_bytes())
    }

    /// Append a 32-bit float.
    pub fn write_f32(&mut self, value: f32) -> ProtocolResult<()> {
        self.write(&value.to_le_bytes())
    }

    /// Append the current checksum, big-endian. These two bytes are not
    /// added to the checksum.
    pub fn write_checksum(&mut self) -> ProtocolResult<()> {
        let encoded = self.checksum.to_be_bytes();
        self.write_raw(&encoded, false)
    }

    /// Current checksum value.
    pub fn checksum(&self) -> u16 {
        self.checksum
    }

    /// The encoded request.
    pub fn request(&self) -> Bytes {
        Bytes::copy_from_slice(&self.outbound)
    }

    /// Length of the encoded request.
    pub fn request_len(&self) -> usize {
        self.outbound.len()
    }

    // ========================================================================
    // Response accumulation
    // ========================================================================

    /// Append a received chunk and report whether the response is complete.
    ///
    /// The idle sentinel swallows whatever it is given and always reports
    /// completion.
    pub fn accept_chunk(&mut self, chunk: &[u8]) -> bool {
        if self.is_idle() {
            return true;
        }
        self.inbound
            .get_or_insert_with(BytesMut::new)
            .extend_from_slice(chunk);
        self.is_response_complete()
    }

    /// Evaluate the completion policy against the accumulated bytes.
    pub fn is_response_complete(&self) -> bool {
        if self.is_idle() {
            return true;
        }
        let received = self.received_len();
        match self.descriptor.policy {
            ResponsePolicy::None => true,
            ResponsePolicy::Exact(n) => received == n,
            ResponsePolicy::Variable => received > 0,
        }
    }

    /// Number of response bytes received so far.
    pub fn received_len(&self) -> usize {
        self.inbound.as_ref().map_or(0, |b| b.len())
    }

    /// The accumulated response, if any chunk arrived.
    pub fn response(&self) -> Option<&[u8]> {
        self.inbound.as_deref()
    }

    /// Current read position.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Drop the accumulated response and rewind the cursor.
    pub fn clear_response(&mut self) {
        self.inbound = None;
        self.cursor = 0;
    }

    // ========================================================================
    // Decoding
    // ========================================================================

    fn bytes_at(&self, offset: usize, needed: usize) -> ProtocolResult<&[u8]> {
        let response = self.inbound.as_deref().ok_or(ProtocolError::NoResponse)?;
        match offset.checked_add(needed) {
            Some(end) if end <= response.len() => Ok(&response[offset..end]),
            _ => Err(ProtocolError::ResponseTooShort {
                offset,
                needed,
                available: response.len(),
            }),
        }
    }

    fn array_at<const N: usize>(&self, offset: usize) -> ProtocolResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes_at(offset, N)?);
        Ok(out)
    }

    fn next_array<const N: usize>(&mut self) -> ProtocolResult<[u8; N]> {
        let out = self.array_at::<N>(self.cursor)?;
        self.cursor += N;
        Ok(out)
    }

    /// Read a byte at the cursor.
    pub fn read_u8(&mut self) -> ProtocolResult<u8> {
        Ok(self.next_array::<1>()?[0])
    }

    /// Read a byte at an explicit offset. The cursor does not move.
    pub fn read_u8_at(&self, offset: usize) -> ProtocolResult<u8> {
        Ok(self.array_at::<1>(offset)?[0])
    }

    /// Read a 16-bit integer at the cursor.
    pub fn read_i16(&mut self) -> ProtocolResult<i16> {
        self.next_array().map(i16::from_le_bytes)
    }

    /// Read a 16-bit integer at an explicit offset.
    pub fn read_i16_at(&self, offset: usize) -> ProtocolResult<i16> {
        self.array_at(offset).map(i16::from_le_bytes)
    }

    /// Read a 32-bit integer at the cursor.
    pub fn read_i32(&mut self) -> ProtocolResult<i32> {
        self.next_array().map(i32::from_le_bytes)
    }

    /// Read a 32-bit integer at an explicit offset.
    pub fn read_i32_at(&self, offset: usize) -> ProtocolResult<i32> {
        self.array_at(offset).map(i32::from_le_bytes)
    }

    /// Read a 32-bit float at the cursor.
    pub fn read_f32(&mut self) -> ProtocolResult<f32> {
        self.next_array().map(f32::from_le_bytes)
    }

    /// Read a 32-bit float at an explicit offset.
    pub fn read_f32_at(&self, offset: usize) -> ProtocolResult<f32> {
        self.array_at(offset).map(f32::from_le_bytes)
    }

    /// Read a string at the cursor.
    ///
    /// Without a length the string runs up to the next zero byte or the end
    /// of the response. Afterwards the cursor also skips any zero padding
    /// that follows, so consecutive NUL-padded fields read back to back.
    pub fn read_string(&mut self, length: Option<usize>) -> ProtocolResult<String> {
        let offset = self.cursor;
        let (text, consumed) = self.string_at(offset, length)?;
        self.cursor = offset + consumed;
        if let Some(response) = self.inbound.as_deref() {
            while self.cursor < response.len() && response[self.cursor] == 0 {
                self.cursor += 1;
            }
        }
        Ok(text)
    }

    /// Read a string at an explicit offset. The cursor does not move.
    pub fn read_string_at(&self, offset: usize, length: Option<usize>) -> ProtocolResult<String> {
        self.string_at(offset, length).map(|(text, _)| text)
    }

    fn string_at(&self, offset: usize, length: Option<usize>) -> ProtocolResult<(String, usize)> {
        let response = self.inbound.as_deref().ok_or(ProtocolError::NoResponse)?;
        if offset > response.len() {
            return Err(ProtocolError::ResponseTooShort {
                offset,
                needed: length.unwrap_or(0),
                available: response.len(),
            });
        }
        let length = length.unwrap_or_else(|| {
            response[offset..]
                .iter()
                .position(|&b| b == 0)
                .unwrap_or(response.len() - offset)
        });
        let bytes = self.bytes_at(offset, length)?;
        let text = std::str::from_utf8(bytes)
            .map_err(|_| ProtocolError::InvalidUtf8 { offset })?
            .to_string();
        Ok((text, length))
    }
}
