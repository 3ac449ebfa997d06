//! Runner commands against simulated robots.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use approx::assert_relative_eq;
use rfcomm_robot::sim::{default_identity, SimulatedRobot, PAYLOAD_RX_TIMEOUT};
use rfcomm_runner::{client, connect, run_demo, server, RunnerConfig, RunnerError};
use rfcomm_session::SessionConfig;

fn config_for(addr: std::net::SocketAddr) -> RunnerConfig {
    RunnerConfig {
        connect: Some(addr.to_string()),
        ..RunnerConfig::default()
    }
}

#[test]
fn test_demo_over_loopback() {
    let report = run_demo(&RunnerConfig::default()).unwrap();
    assert_eq!(report.identity, default_identity());
    assert_eq!(report.pings.answered, 5);
    assert_eq!(report.pings.out_of_sync, 0);
    assert!(report.pings.mean_round_trip().is_some());
    // 1.25 plus five pings of four steps each.
    assert_relative_eq!(report.value, 1.27, epsilon = 1e-5);
}

#[test]
fn test_commands_over_tcp() {
    let server = server::spawn("127.0.0.1:0", SimulatedRobot::default()).unwrap();
    let config = config_for(server.local_addr());

    let robot = connect(&config).unwrap();
    let wait = config.wait();
    assert_eq!(client::identify(&robot, wait).unwrap(), default_identity());
    assert_relative_eq!(client::set_value(&robot, -2.0, 10, wait).unwrap(), -2.0);
    let report = client::ping(&robot, 3, Duration::ZERO, wait).unwrap();
    assert_eq!(report.answered, 3);
    assert_relative_eq!(client::get_value(&robot, wait).unwrap(), -1.97, epsilon = 1e-5);
    robot.close().unwrap();

    // State survives a reconnect.
    let robot = connect(&config).unwrap();
    assert_relative_eq!(client::get_value(&robot, wait).unwrap(), -1.97, epsilon = 1e-5);
    robot.close().unwrap();

    let device = server.stop().unwrap();
    assert_eq!(device.increment(), 10);
    assert_eq!(device.stats().checksum_errors, 0);
}

#[test]
fn test_server_drops_stalled_payload() {
    let server = server::spawn("127.0.0.1:0", SimulatedRobot::default()).unwrap();
    let mut stream = TcpStream::connect(server.local_addr()).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    // VALUE_SET opcode and three of its ten payload bytes, then silence.
    stream.write_all(&[0x82, 0x01, 0x02, 0x03]).unwrap();
    thread::sleep(PAYLOAD_RX_TIMEOUT + Duration::from_millis(200));

    let mut device = server.stop().unwrap();
    assert_eq!(device.stats().rx_errors, 1);
    assert!(!device.is_receiving());
    assert_relative_eq!(device.value(), 0.0);
    assert_eq!(device.feed(&[0x00], std::time::Instant::now()), vec![0]);
}

#[test]
fn test_server_answers_multiple_clients() {
    let server = server::spawn("127.0.0.1:0", SimulatedRobot::default()).unwrap();
    let mut first = TcpStream::connect(server.local_addr()).unwrap();
    let mut second = TcpStream::connect(server.local_addr()).unwrap();
    for stream in [&mut first, &mut second] {
        stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        stream.write_all(&[0x00]).unwrap();
        let mut reply = [0xFFu8; 1];
        stream.read_exact(&mut reply).unwrap();
        assert_eq!(reply, [0]);
    }

    // Both pings landed on the same device.
    let device = server.stop().unwrap();
    assert_relative_eq!(device.value(), 0.002, epsilon = 1e-6);
    assert_eq!(device.stats().commands_processed, 2);
}

#[test]
fn test_silent_robot_aborts() {
    // Accepts the connection and never answers.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let silent = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        thread::sleep(Duration::from_millis(500));
        drop(stream);
    });

    let config = RunnerConfig {
        session: SessionConfig {
            response_timeout_ms: 100,
            ..SessionConfig::default()
        },
        ..config_for(addr)
    };
    let robot = connect(&config).unwrap();
    let err = client::get_value(&robot, config.wait()).unwrap_err();
    assert!(
        matches!(err, RunnerError::Aborted { command: "VALUE_GET", received: 0, .. }),
        "unexpected error: {}",
        err
    );
    robot.close().unwrap();
    silent.join().unwrap();
}

#[test]
fn test_hangup_reported_as_disconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let peer = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        // A partial value reply, then hang up.
        stream.write_all(&[0x00, 0x00]).unwrap();
    });

    let config = config_for(addr);
    let robot = connect(&config).unwrap();
    peer.join().unwrap();
    let err = client::get_value(&robot, config.wait()).unwrap_err();
    assert!(matches!(err, RunnerError::Disconnected(_)), "unexpected error: {}", err);
    robot.close().unwrap();
}

#[test]
fn test_connect_requires_address() {
    assert!(matches!(
        connect(&RunnerConfig::default()),
        Err(RunnerError::NoAddress)
    ));
}
