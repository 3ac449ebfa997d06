//! Robot client against the simulated firmware over a loopback link.

use std::io::Write;
use std::time::Duration;

use approx::assert_relative_eq;
use rfcomm_robot::sim::{default_identity, spawn_on_loopback, SimulatedRobot};
use rfcomm_robot::{RecoveryPolicy, Robot, RobotConfig, RobotEvent};
use rfcomm_session::{loopback, SessionConfig};

const WAIT: Duration = Duration::from_secs(2);

fn quiet_config() -> RobotConfig {
    RobotConfig {
        identify_on_connect: false,
        ..RobotConfig::default()
    }
}

fn expect_value(robot: &Robot) -> f32 {
    match robot.wait_event(WAIT) {
        Some(RobotEvent::Value(v)) => v,
        other => panic!("expected a value, got {:?}", other),
    }
}

#[test]
fn test_identify_on_connect() {
    let (mut transport, sim) = spawn_on_loopback(SimulatedRobot::default()).unwrap();
    let robot = Robot::connect(&mut transport, RobotConfig::default()).unwrap();

    assert_eq!(robot.wait_event(WAIT), Some(RobotEvent::Id(default_identity())));

    robot.close().unwrap();
    let device = sim.join().unwrap();
    assert_eq!(device.stats().commands_processed, 1);
}

#[test]
fn test_set_ping_get() {
    let (mut transport, sim) = spawn_on_loopback(SimulatedRobot::default()).unwrap();
    let robot = Robot::connect(&mut transport, quiet_config()).unwrap();

    robot.set_value(3.5, 2).unwrap();
    robot.ping().unwrap();
    robot.ping().unwrap();
    robot.get_value().unwrap();

    assert_eq!(robot.wait_event(WAIT), Some(RobotEvent::ValueWritten));
    assert_eq!(robot.wait_event(WAIT), Some(RobotEvent::Pong { sync: 0 }));
    assert_eq!(robot.wait_event(WAIT), Some(RobotEvent::Pong { sync: 0 }));
    assert_relative_eq!(expect_value(&robot), 3.504, epsilon = 1e-5);

    robot.close().unwrap();
    let device = sim.join().unwrap();
    assert_eq!(device.stats().checksum_errors, 0);
    assert_eq!(device.increment(), 2);
}

#[test]
fn test_corrupted_value_set_ignored_by_device() {
    let (mut transport, mut device) = loopback::pair();
    let robot = Robot::connect(&mut transport, quiet_config()).unwrap();
    let mut sim = SimulatedRobot::default();

    // Corrupt the checksum on the way to the simulated device.
    robot.set_value(42.0, 7).unwrap();
    let mut request = device.recv_chunk(WAIT).unwrap();
    let last = request.len() - 1;
    request[last] ^= 0x01;
    assert!(sim.feed(&request, std::time::Instant::now()).is_empty());
    assert_eq!(sim.stats().checksum_errors, 1);

    robot.get_value().unwrap();
    assert_eq!(robot.wait_event(WAIT), Some(RobotEvent::ValueWritten));
    let request = device.recv_chunk(WAIT).unwrap();
    let reply = sim.feed(&request, std::time::Instant::now());
    device.write_all(&reply).unwrap();

    assert_relative_eq!(expect_value(&robot), 0.0);
    robot.close().unwrap();
}

#[test]
fn test_timeout_triggers_reidentify() {
    let (mut transport, mut device) = loopback::pair();
    let config = RobotConfig {
        session: SessionConfig {
            response_timeout_ms: 100,
            ..SessionConfig::default()
        },
        recovery: RecoveryPolicy::Reidentify,
        identify_on_connect: false,
    };
    let robot = Robot::connect(&mut transport, config).unwrap();

    robot.get_value().unwrap();
    robot.ping().unwrap();
    robot.ping().unwrap();

    assert_eq!(device.recv_chunk(WAIT), Some(vec![0x02]));
    device.write_all(&[0x00]).unwrap();

    assert_eq!(
        robot.wait_event(WAIT),
        Some(RobotEvent::Aborted {
            command: "VALUE_GET",
            received: 1,
            expected: Some(4),
        })
    );
    // Queued pings were replaced by an identity request.
    assert_eq!(device.recv_chunk(WAIT), Some(vec![0x01]));
    assert_eq!(device.recv_chunk(Duration::from_millis(50)), None);
    robot.close().unwrap();
}

#[test]
fn test_device_hangup_reported() {
    let (mut transport, sim) = spawn_on_loopback(SimulatedRobot::default()).unwrap();
    let robot = Robot::connect(&mut transport, quiet_config()).unwrap();

    let device = sim.stop().unwrap();
    assert_eq!(device.stats().commands_processed, 0);
    assert_eq!(robot.wait_event(WAIT), Some(RobotEvent::Disconnected(None)));
    robot.close().unwrap();
}
