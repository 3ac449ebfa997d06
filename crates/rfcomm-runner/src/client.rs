//! Client commands run against a connected robot.
//!
//! Each command queues its requests and then waits for the matching
//! [`RobotEvent`]s. Failures reported by the session become
//! [`RunnerError`]s.

use std::thread;
use std::time::{Duration, Instant};

use rfcomm_robot::{Robot, RobotEvent, RobotId};
use tracing::debug;

use crate::error::RunnerError;

/// Outcome of a run of pings.
#[derive(Debug, Clone, PartialEq)]
pub struct PingReport {
    /// Pings answered.
    pub answered: u32,
    /// Replies whose sync byte was not zero.
    pub out_of_sync: u32,
    /// Round-trip time of each answered ping.
    pub round_trips: Vec<Duration>,
}

impl PingReport {
    /// Mean round-trip time, if any ping was answered.
    pub fn mean_round_trip(&self) -> Option<Duration> {
        if self.round_trips.is_empty() {
            return None;
        }
        let total: Duration = self.round_trips.iter().sum();
        Some(total / self.round_trips.len() as u32)
    }
}

/// Wait for the next event that `accept` maps to a value.
///
/// Events `accept` declines are skipped; this absorbs the identity reply
/// queued by abort recovery. Aborts, write failures, decode failures and
/// disconnects end the wait with an error.
pub fn await_reply<T, F>(
    robot: &Robot,
    command: &'static str,
    wait: Duration,
    mut accept: F,
) -> Result<T, RunnerError>
where
    F: FnMut(RobotEvent) -> Option<T>,
{
    let deadline = Instant::now() + wait;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let event = robot
            .wait_event(remaining)
            .ok_or(RunnerError::NoReply(command, wait.as_millis() as u64))?;

        match event {
            RobotEvent::Aborted {
                command,
                received,
                expected,
            } => {
                return Err(RunnerError::Aborted {
                    command,
                    received,
                    expected: expected.map_or_else(|| "?".to_string(), |n| n.to_string()),
                })
            }
            RobotEvent::WriteFailed { command, reason } => {
                return Err(RunnerError::WriteFailed { command, reason })
            }
            RobotEvent::Malformed { command, error } => {
                return Err(RunnerError::Malformed {
                    command,
                    reason: error.to_string(),
                })
            }
            RobotEvent::Disconnected(reason) => return Err(RunnerError::Disconnected(reason)),
            other => match accept(other) {
                Some(value) => return Ok(value),
                None => debug!("skipping event while waiting for {}", command),
            },
        }
    }
}

/// Send `count` pings, `interval` apart, waiting for each reply.
pub fn ping(
    robot: &Robot,
    count: u32,
    interval: Duration,
    wait: Duration,
) -> Result<PingReport, RunnerError> {
    let mut report = PingReport {
        answered: 0,
        out_of_sync: 0,
        round_trips: Vec::with_capacity(count as usize),
    };
    for i in 0..count {
        if i > 0 && !interval.is_zero() {
            thread::sleep(interval);
        }
        let sent = Instant::now();
        robot.ping()?;
        let sync = await_reply(robot, "PING", wait, |event| match event {
            RobotEvent::Pong { sync } => Some(sync),
            _ => None,
        })?;
        report.round_trips.push(sent.elapsed());
        report.answered += 1;
        if sync != 0 {
            report.out_of_sync += 1;
        }
    }
    Ok(report)
}

/// Read the identity record.
pub fn identify(robot: &Robot, wait: Duration) -> Result<RobotId, RunnerError> {
    robot.identify()?;
    await_reply(robot, "ID", wait, |event| match event {
        RobotEvent::Id(id) => Some(id),
        _ => None,
    })
}

/// Read the stored value.
pub fn get_value(robot: &Robot, wait: Duration) -> Result<f32, RunnerError> {
    robot.get_value()?;
    await_reply(robot, "VALUE_GET", wait, |event| match event {
        RobotEvent::Value(v) => Some(v),
        _ => None,
    })
}

/// Store a value and ping increment, then read the value back.
pub fn set_value(
    robot: &Robot,
    value: f32,
    ping_increment: i32,
    wait: Duration,
) -> Result<f32, RunnerError> {
    robot.set_value(value, ping_increment)?;
    await_reply(robot, "VALUE_SET", wait, |event| match event {
        RobotEvent::ValueWritten => Some(()),
        _ => None,
    })?;
    get_value(robot, wait)
}
