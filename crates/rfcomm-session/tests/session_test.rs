//! End-to-end tests of the session threads over the loopback transport.
//!
//! The test body plays the device: it reads requests from the device end
//! of a loopback pair and writes responses in whatever chunks it likes.

use std::io::Write;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use rfcomm_protocol::{
    AbortReport, CommandDescriptor, Exchange, PendingQueue, ResponseHandler, ResponsePolicy,
};
use rfcomm_session::{loopback, Session, SessionConfig, SessionError, SessionObserver};

static PING: CommandDescriptor = CommandDescriptor::new("PING", 0x00, ResponsePolicy::Exact(1));
static GET: CommandDescriptor = CommandDescriptor::new("GET", 0x02, ResponsePolicy::Exact(4));
static SET: CommandDescriptor = CommandDescriptor::new("SET", 0x82, ResponsePolicy::None);

const WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, PartialEq)]
enum Outcome {
    Complete(&'static str, Vec<u8>),
    Aborted(&'static str, AbortReport),
    Disconnected(Option<String>),
}

/// Forwards every outcome to the test thread.
struct Recorder {
    tx: Sender<Outcome>,
    completed: usize,
    recover_with: Option<&'static CommandDescriptor>,
}

impl Recorder {
    fn new() -> (Self, Receiver<Outcome>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (
            Recorder {
                tx,
                completed: 0,
                recover_with: None,
            },
            rx,
        )
    }
}

impl ResponseHandler for Recorder {
    fn on_exchange_complete(&mut self, exchange: &mut Exchange, _pending: &mut PendingQueue) {
        self.completed += 1;
        let bytes = exchange.response().map(|r| r.to_vec()).unwrap_or_default();
        let _ = self.tx.send(Outcome::Complete(exchange.name(), bytes));
    }

    fn on_exchange_aborted(&mut self, exchange: &Exchange, report: AbortReport, pending: &mut PendingQueue) {
        let _ = self.tx.send(Outcome::Aborted(exchange.name(), report));
        if let Some(descriptor) = self.recover_with {
            pending.clear();
            pending.push(Exchange::new(descriptor));
        }
    }
}

impl SessionObserver for Recorder {
    fn on_disconnected(&mut self, reason: Option<&str>) {
        let _ = self.tx.send(Outcome::Disconnected(reason.map(str::to_string)));
    }
}

fn fast_config() -> SessionConfig {
    SessionConfig {
        response_timeout_ms: 100,
        ..SessionConfig::default()
    }
}

#[test]
fn test_response_split_across_chunks() {
    let (mut transport, mut device) = loopback::pair();
    let (recorder, outcomes) = Recorder::new();
    let session = Session::start(&mut transport, recorder, SessionConfig::default()).unwrap();
    assert_eq!(session.peer(), "loopback");

    session.enqueue(Exchange::new(&GET)).unwrap();
    assert_eq!(device.recv_chunk(WAIT), Some(vec![0x02]));

    device.write_all(&[0x00, 0x00]).unwrap();
    device.write_all(&[0x60, 0x40]).unwrap();

    assert_eq!(
        outcomes.recv_timeout(WAIT).unwrap(),
        Outcome::Complete("GET", vec![0x00, 0x00, 0x60, 0x40])
    );

    let recorder = session.close().unwrap();
    assert_eq!(recorder.completed, 1);
}

#[test]
fn test_commands_are_sent_one_at_a_time() {
    let (mut transport, mut device) = loopback::pair();
    let (recorder, outcomes) = Recorder::new();
    let session = Session::start(&mut transport, recorder, SessionConfig::default()).unwrap();

    session.enqueue(Exchange::new(&PING)).unwrap();
    session.enqueue(Exchange::new(&GET)).unwrap();

    assert_eq!(device.recv_chunk(WAIT), Some(vec![0x00]));
    // GET must not go out while PING is waiting for its byte.
    assert_eq!(device.recv_chunk(Duration::from_millis(50)), None);

    device.write_all(&[0x00]).unwrap();
    assert_eq!(outcomes.recv_timeout(WAIT).unwrap(), Outcome::Complete("PING", vec![0]));
    assert_eq!(device.recv_chunk(WAIT), Some(vec![0x02]));

    device.write_all(&[1, 2, 3, 4]).unwrap();
    assert_eq!(
        outcomes.recv_timeout(WAIT).unwrap(),
        Outcome::Complete("GET", vec![1, 2, 3, 4])
    );
    session.close().unwrap();
}

#[test]
fn test_no_response_command_completes_after_write() {
    let (mut transport, mut device) = loopback::pair();
    let (recorder, outcomes) = Recorder::new();
    let session = Session::start(&mut transport, recorder, SessionConfig::default()).unwrap();

    let mut set = Exchange::new(&SET);
    set.write_f32(1.5).unwrap();
    set.write_i32(3).unwrap();
    set.write_checksum().unwrap();
    let request = set.request().to_vec();
    session.enqueue(set).unwrap();
    session.enqueue(Exchange::new(&PING)).unwrap();

    assert_eq!(outcomes.recv_timeout(WAIT).unwrap(), Outcome::Complete("SET", vec![]));
    assert_eq!(device.recv_chunk(WAIT), Some(request));
    assert_eq!(device.recv_chunk(WAIT), Some(vec![0x00]));
    session.close().unwrap();
}

#[test]
fn test_timeout_moves_to_next_command() {
    let (mut transport, mut device) = loopback::pair();
    let (recorder, outcomes) = Recorder::new();
    let session = Session::start(&mut transport, recorder, fast_config()).unwrap();

    session.enqueue(Exchange::new(&GET)).unwrap();
    session.enqueue(Exchange::new(&PING)).unwrap();

    assert_eq!(device.recv_chunk(WAIT), Some(vec![0x02]));
    device.write_all(&[9, 9]).unwrap();

    assert_eq!(
        outcomes.recv_timeout(WAIT).unwrap(),
        Outcome::Aborted(
            "GET",
            AbortReport {
                received: 2,
                expected: Some(4),
            }
        )
    );
    assert_eq!(device.recv_chunk(WAIT), Some(vec![0x00]));
    device.write_all(&[0]).unwrap();
    assert_eq!(outcomes.recv_timeout(WAIT).unwrap(), Outcome::Complete("PING", vec![0]));
    session.close().unwrap();
}

#[test]
fn test_abort_recovery_replaces_queue() {
    let (mut transport, mut device) = loopback::pair();
    let (mut recorder, outcomes) = Recorder::new();
    recorder.recover_with = Some(&PING);
    let session = Session::start(&mut transport, recorder, fast_config()).unwrap();

    session.enqueue(Exchange::new(&GET)).unwrap();
    session.enqueue(Exchange::new(&GET)).unwrap();
    session.enqueue(Exchange::new(&GET)).unwrap();
    assert_eq!(device.recv_chunk(WAIT), Some(vec![0x02]));

    assert!(matches!(outcomes.recv_timeout(WAIT).unwrap(), Outcome::Aborted("GET", _)));
    assert_eq!(device.recv_chunk(WAIT), Some(vec![0x00]));
    device.write_all(&[0]).unwrap();
    assert_eq!(outcomes.recv_timeout(WAIT).unwrap(), Outcome::Complete("PING", vec![0]));

    // The two queued GETs were dropped.
    assert_eq!(device.recv_chunk(Duration::from_millis(50)), None);
    session.close().unwrap();
}

#[test]
fn test_clear_pending_through_handle() {
    let (mut transport, mut device) = loopback::pair();
    let (recorder, outcomes) = Recorder::new();
    let session = Session::start(&mut transport, recorder, SessionConfig::default()).unwrap();
    let handle = session.handle();

    handle.enqueue(Exchange::new(&PING)).unwrap();
    handle.enqueue(Exchange::new(&GET)).unwrap();
    assert_eq!(device.recv_chunk(WAIT), Some(vec![0x00]));
    handle.clear_pending().unwrap();

    device.write_all(&[0]).unwrap();
    assert_eq!(outcomes.recv_timeout(WAIT).unwrap(), Outcome::Complete("PING", vec![0]));
    assert_eq!(device.recv_chunk(Duration::from_millis(50)), None);
    session.close().unwrap();
}

#[test]
fn test_peer_disconnect_is_reported() {
    let (mut transport, device) = loopback::pair();
    let (recorder, outcomes) = Recorder::new();
    let session = Session::start(&mut transport, recorder, SessionConfig::default()).unwrap();

    drop(device);
    assert_eq!(outcomes.recv_timeout(WAIT).unwrap(), Outcome::Disconnected(None));
    session.close().unwrap();
}

#[test]
fn test_handle_fails_after_close() {
    let (mut transport, _device) = loopback::pair();
    let (recorder, _outcomes) = Recorder::new();
    let session = Session::start(&mut transport, recorder, SessionConfig::default()).unwrap();
    let handle = session.handle();
    session.close().unwrap();

    assert!(matches!(
        handle.enqueue(Exchange::new(&PING)),
        Err(SessionError::Closed)
    ));
}

#[test]
fn test_invalid_config_rejected_before_connect() {
    let (mut transport, _device) = loopback::pair();
    let (recorder, _outcomes) = Recorder::new();
    let config = SessionConfig {
        read_buffer_size: 0,
        ..SessionConfig::default()
    };
    assert!(matches!(
        Session::start(&mut transport, recorder, config),
        Err(SessionError::InvalidConfig(_))
    ));
}
