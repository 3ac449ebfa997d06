//! Simulated robot firmware.
//!
//! [`SimulatedRobot`] answers the robot vocabulary byte for byte the way the
//! device does, including its quirks: bytes that arrive while it is not
//! receiving a payload are opcodes, unknown opcodes are ignored, and a
//! `VALUE_SET` payload that does not arrive within
//! [`PAYLOAD_RX_TIMEOUT`] is abandoned. It does no I/O of its own; [`serve`]
//! runs it over any byte stream.

use std::io::{self, Read, Write};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rfcomm_protocol::{hex_dump, CHECKSUM_SIZE};
use rfcomm_session::loopback::{self, LoopbackCloser, LoopbackTransport};
use rfcomm_session::LinkCloser;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::commands::{
    OPCODE_ID, OPCODE_PING, OPCODE_VALUE_GET, OPCODE_VALUE_SET, VALUE_SET_PAYLOAD_LEN,
};
use crate::response::{encode_id, RobotId};

/// Time allowed for a whole `VALUE_SET` payload after its opcode.
pub const PAYLOAD_RX_TIMEOUT: Duration = Duration::from_millis(250);

/// Each `PING` adds `increment * PING_STEP` to the value.
pub const PING_STEP: f32 = 0.001;

const PAYLOAD_FRAME_LEN: usize = VALUE_SET_PAYLOAD_LEN + CHECKSUM_SIZE;

/// Error and traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimStats {
    /// Known opcodes handled.
    pub commands_processed: u64,
    /// Payload receptions abandoned after the timeout.
    pub rx_errors: u64,
    /// `VALUE_SET` payloads rejected for a bad checksum.
    pub checksum_errors: u64,
    /// Bytes that were not a known opcode.
    pub unknown_opcodes: u64,
}

#[derive(Debug)]
struct PayloadRx {
    buf: Vec<u8>,
    started: Instant,
}

/// Device-side state machine.
#[derive(Debug)]
pub struct SimulatedRobot {
    identity: RobotId,
    value: f32,
    increment: i32,
    rx: Option<PayloadRx>,
    stats: SimStats,
}

impl Default for SimulatedRobot {
    fn default() -> Self {
        SimulatedRobot::new(default_identity())
    }
}

/// Identity reported when none is configured.
pub fn default_identity() -> RobotId {
    RobotId {
        name: "newt-sim".into(),
        date: "simulated".into(),
        time: env!("CARGO_PKG_VERSION").into(),
    }
}

impl SimulatedRobot {
    /// A robot with value 0 and ping increment 1.
    pub fn new(identity: RobotId) -> Self {
        SimulatedRobot {
            identity,
            value: 0.0,
            increment: 1,
            rx: None,
            stats: SimStats::default(),
        }
    }

    /// Current value.
    pub fn value(&self) -> f32 {
        self.value
    }

    /// Current ping increment.
    pub fn increment(&self) -> i32 {
        self.increment
    }

    /// Identity record served to `ID`.
    pub fn identity(&self) -> &RobotId {
        &self.identity
    }

    /// Counters.
    pub fn stats(&self) -> SimStats {
        self.stats
    }

    /// Whether a `VALUE_SET` payload is being received.
    pub fn is_receiving(&self) -> bool {
        self.rx.is_some()
    }

    /// When an unfinished `VALUE_SET` payload will be abandoned.
    pub fn payload_deadline(&self) -> Option<Instant> {
        self.rx.as_ref().map(|rx| rx.started + PAYLOAD_RX_TIMEOUT)
    }

    /// Abandon a `VALUE_SET` payload whose deadline has passed at `now`.
    /// Returns whether one was abandoned.
    pub fn poll(&mut self, now: Instant) -> bool {
        match &self.rx {
            Some(rx) if now.duration_since(rx.started) > PAYLOAD_RX_TIMEOUT => {
                warn!(
                    "VALUE_SET payload timed out with {} of {} bytes",
                    rx.buf.len(),
                    PAYLOAD_FRAME_LEN
                );
                self.stats.rx_errors += 1;
                self.rx = None;
                true
            }
            _ => false,
        }
    }

    /// Process bytes received at `now` and return the bytes to send back.
    pub fn feed(&mut self, bytes: &[u8], now: Instant) -> Vec<u8> {
        let mut out = Vec::new();
        for &byte in bytes {
            self.feed_byte(byte, now, &mut out);
        }
        out
    }

    fn feed_byte(&mut self, byte: u8, now: Instant, out: &mut Vec<u8>) {
        self.poll(now);
        match &mut self.rx {
            Some(rx) => {
                rx.buf.push(byte);
                if rx.buf.len() == PAYLOAD_FRAME_LEN {
                    let buf = std::mem::take(&mut rx.buf);
                    self.rx = None;
                    self.apply_value_set(&buf);
                }
            }
            // A late byte lands here after `poll` and starts a new command.
            None => self.command(byte, now, out),
        }
    }

    fn command(&mut self, opcode: u8, now: Instant, out: &mut Vec<u8>) {
        match opcode {
            OPCODE_PING => {
                self.value += self.increment as f32 * PING_STEP;
                out.push(0);
            }
            OPCODE_ID => out.extend_from_slice(&encode_id(&self.identity)),
            OPCODE_VALUE_GET => out.extend_from_slice(&self.value.to_le_bytes()),
            OPCODE_VALUE_SET => {
                self.rx = Some(PayloadRx {
                    buf: Vec::with_capacity(PAYLOAD_FRAME_LEN),
                    started: now,
                });
            }
            other => {
                trace!("ignoring unknown opcode 0x{:02X}", other);
                self.stats.unknown_opcodes += 1;
                return;
            }
        }
        self.stats.commands_processed += 1;
    }

    fn apply_value_set(&mut self, frame: &[u8]) {
        let (payload, checksum) = frame.split_at(VALUE_SET_PAYLOAD_LEN);
        let expected = payload
            .iter()
            .fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)));
        let received = u16::from_be_bytes([checksum[0], checksum[1]]);
        if expected != received {
            warn!(
                "VALUE_SET checksum mismatch: computed 0x{:04X}, received 0x{:04X}",
                expected, received
            );
            self.stats.checksum_errors += 1;
            return;
        }
        self.value = f32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        self.increment = i32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);
        debug!("value set to {} (increment {})", self.value, self.increment);
    }
}

// ============================================================================
// Serving
// ============================================================================

/// Run `robot` over a byte stream until end of stream.
///
/// A reader with a read timeout lets an unfinished `VALUE_SET` payload
/// expire while the link is quiet; a blocking reader only notices on the
/// next byte.
pub fn serve<R, W>(mut reader: R, mut writer: W, robot: &mut SimulatedRobot) -> io::Result<()>
where
    R: Read,
    W: Write,
{
    let mut buf = [0u8; 256];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                robot.poll(Instant::now());
                continue;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        trace!("sim rx {}", hex_dump(&buf[..n]));
        let reply = robot.feed(&buf[..n], Instant::now());
        if !reply.is_empty() {
            writer.write_all(&reply)?;
            writer.flush()?;
        }
    }
}

/// A simulated robot running on its own thread behind a loopback link.
#[derive(Debug)]
pub struct SimulatorHandle {
    thread: JoinHandle<io::Result<SimulatedRobot>>,
    closer: LoopbackCloser,
}

impl SimulatorHandle {
    /// Close the device end and return the robot.
    pub fn stop(self) -> io::Result<SimulatedRobot> {
        self.closer.close();
        self.join()
    }

    /// Wait for the host to hang up and return the robot.
    pub fn join(self) -> io::Result<SimulatedRobot> {
        self.thread
            .join()
            .map_err(|_| io::Error::other("simulator thread panicked"))?
    }
}

/// Start `robot` on a `rfcomm-sim` thread and return the host-side
/// transport connected to it.
pub fn spawn_on_loopback(mut robot: SimulatedRobot) -> io::Result<(LoopbackTransport, SimulatorHandle)> {
    let (transport, device) = loopback::pair();
    let (reader, writer, closer) = device.split();
    let thread = thread::Builder::new()
        .name("rfcomm-sim".into())
        .spawn(move || -> io::Result<SimulatedRobot> {
            serve(reader, writer, &mut robot)?;
            Ok(robot)
        })?;
    Ok((transport, SimulatorHandle { thread, closer }))
}
