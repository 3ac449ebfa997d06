//! Response handling and abort recovery for the robot.

use crossbeam_channel::Sender;
use rfcomm_protocol::{AbortReport, Exchange, PendingQueue, ProtocolError, ResponseHandler};
use rfcomm_session::SessionObserver;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::commands::identify;
use crate::response::{RobotId, RobotResponse};

/// Results reported by the robot session.
#[derive(Debug, Clone, PartialEq)]
pub enum RobotEvent {
    /// Reply to `PING`.
    Pong {
        /// Sync byte; anything but zero means the stream is out of step.
        sync: u8,
    },
    /// Reply to `ID`.
    Id(RobotId),
    /// Reply to `VALUE_GET`.
    Value(f32),
    /// `VALUE_SET` went out.
    ValueWritten,
    /// A command timed out.
    Aborted {
        /// Command name.
        command: &'static str,
        /// Bytes received before the timeout.
        received: usize,
        /// Bytes the command expected.
        expected: Option<usize>,
    },
    /// A request could not be written.
    WriteFailed {
        /// Command name.
        command: &'static str,
        /// Transport error text.
        reason: String,
    },
    /// A complete response could not be decoded.
    Malformed {
        /// Command name.
        command: &'static str,
        /// Decoding failure.
        error: ProtocolError,
    },
    /// The link went away.
    Disconnected(Option<String>),
}

/// What to do after a command times out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPolicy {
    /// Drop everything queued and ask for the identity record, which
    /// resynchronises the stream.
    #[default]
    Reidentify,
    /// Report the abort and carry on with the queue.
    Ignore,
}

/// Turns completed exchanges into [`RobotEvent`]s.
#[derive(Debug)]
pub struct RobotHandler {
    events: Sender<RobotEvent>,
    recovery: RecoveryPolicy,
}

impl RobotHandler {
    /// Create a handler that reports on `events`.
    pub fn new(events: Sender<RobotEvent>, recovery: RecoveryPolicy) -> Self {
        RobotHandler { events, recovery }
    }

    fn emit(&self, event: RobotEvent) {
        if self.events.send(event).is_err() {
            debug!("robot event dropped, nobody is listening");
        }
    }
}

impl ResponseHandler for RobotHandler {
    fn on_exchange_complete(&mut self, exchange: &mut Exchange, _pending: &mut PendingQueue) {
        let event = match RobotResponse::decode(exchange) {
            Ok(RobotResponse::Ping { sync }) => {
                if sync != 0 {
                    error!("PING returned sync byte {}, expected 0", sync);
                }
                RobotEvent::Pong { sync }
            }
            Ok(RobotResponse::Id(id)) => {
                debug!("robot identified as {}", id);
                RobotEvent::Id(id)
            }
            Ok(RobotResponse::Value(value)) => RobotEvent::Value(value),
            Ok(RobotResponse::ValueWritten) => RobotEvent::ValueWritten,
            Err(e) => {
                warn!("{}: {}", exchange.name(), e);
                RobotEvent::Malformed {
                    command: exchange.name(),
                    error: e,
                }
            }
        };
        self.emit(event);
    }

    fn on_exchange_aborted(
        &mut self,
        exchange: &Exchange,
        report: AbortReport,
        pending: &mut PendingQueue,
    ) {
        match report.expected {
            Some(expected) => error!(
                "{}: received {} of {} bytes",
                exchange.name(),
                report.received,
                expected
            ),
            None => error!("{}: received {} bytes", exchange.name(), report.received),
        }
        self.emit(RobotEvent::Aborted {
            command: exchange.name(),
            received: report.received,
            expected: report.expected,
        });

        if self.recovery == RecoveryPolicy::Reidentify {
            let dropped = pending.clear();
            debug!("recovering: dropped {} queued commands, requesting ID", dropped);
            pending.push(identify());
        }
    }

    fn on_write_failed(&mut self, exchange: &Exchange, reason: &str, _pending: &mut PendingQueue) {
        self.emit(RobotEvent::WriteFailed {
            command: exchange.name(),
            reason: reason.to_string(),
        });
    }
}

impl SessionObserver for RobotHandler {
    fn on_disconnected(&mut self, reason: Option<&str>) {
        self.emit(RobotEvent::Disconnected(reason.map(str::to_string)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{ping, value_get};
    use crossbeam_channel::Receiver;

    fn handler(recovery: RecoveryPolicy) -> (RobotHandler, Receiver<RobotEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (RobotHandler::new(tx, recovery), rx)
    }

    #[test]
    fn test_pong_event() {
        let (mut handler, events) = handler(RecoveryPolicy::default());
        let mut exchange = ping();
        exchange.accept_chunk(&[0]);
        handler.on_exchange_complete(&mut exchange, &mut PendingQueue::new());
        assert_eq!(events.try_recv().unwrap(), RobotEvent::Pong { sync: 0 });
    }

    #[test]
    fn test_bad_sync_still_reported() {
        let (mut handler, events) = handler(RecoveryPolicy::default());
        let mut exchange = ping();
        exchange.accept_chunk(&[7]);
        handler.on_exchange_complete(&mut exchange, &mut PendingQueue::new());
        assert_eq!(events.try_recv().unwrap(), RobotEvent::Pong { sync: 7 });
    }

    #[test]
    fn test_reidentify_on_abort() {
        let (mut handler, events) = handler(RecoveryPolicy::Reidentify);
        let mut pending = PendingQueue::new();
        pending.push(value_get());
        pending.push(ping());

        let report = AbortReport {
            received: 1,
            expected: Some(4),
        };
        handler.on_exchange_aborted(&value_get(), report, &mut pending);

        assert_eq!(pending.names().collect::<Vec<_>>(), vec!["ID"]);
        assert_eq!(
            events.try_recv().unwrap(),
            RobotEvent::Aborted {
                command: "VALUE_GET",
                received: 1,
                expected: Some(4),
            }
        );
    }

    #[test]
    fn test_ignore_on_abort_keeps_queue() {
        let (mut handler, _events) = handler(RecoveryPolicy::Ignore);
        let mut pending = PendingQueue::new();
        pending.push(ping());

        let report = AbortReport {
            received: 0,
            expected: Some(1),
        };
        handler.on_exchange_aborted(&ping(), report, &mut pending);
        assert_eq!(pending.names().collect::<Vec<_>>(), vec!["PING"]);
    }

    #[test]
    fn test_events_without_listener_are_dropped() {
        let (mut handler, events) = handler(RecoveryPolicy::default());
        drop(events);
        handler.on_disconnected(None);
    }

    #[test]
    fn test_recovery_policy_yaml() {
        let policy: RecoveryPolicy = serde_yaml::from_str("ignore").unwrap();
        assert_eq!(policy, RecoveryPolicy::Ignore);
        assert_eq!(serde_yaml::to_string(&RecoveryPolicy::Reidentify).unwrap().trim(), "reidentify");
    }
}
