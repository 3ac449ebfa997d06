//! Command-line runner for the RFCOMM robot link.
//!
//! The `rfcomm` binary talks to a robot over TCP, or serves a simulated
//! robot for it to talk to. The library half exposes the same commands for
//! tests and embedding.

pub mod client;
pub mod config;
mod error;
pub mod server;

use rfcomm_robot::sim::{spawn_on_loopback, SimulatedRobot};
use rfcomm_robot::{Robot, RobotId};
use rfcomm_session::TcpTransport;
use tracing::info;

pub use client::PingReport;
pub use config::RunnerConfig;
pub use error::RunnerError;

/// Connect to the robot named by `config`.
pub fn connect(config: &RunnerConfig) -> Result<Robot, RunnerError> {
    let mut transport =
        TcpTransport::new(config.address()?).with_connect_timeout(config.session.connect_timeout());
    Ok(Robot::connect(&mut transport, config.robot_config())?)
}

/// Start the Prometheus exporter if `metrics_listen` is set.
#[cfg(feature = "prometheus")]
pub fn install_metrics(config: &RunnerConfig) -> Result<(), RunnerError> {
    if let Some(addr) = config.metrics_listen {
        rfcomm_metrics::install_prometheus(addr).map_err(|e| RunnerError::Metrics(e.to_string()))?;
        info!("metrics available at http://{}/metrics", addr);
    }
    Ok(())
}

/// Register metric descriptions. Without the `prometheus` feature there
/// is no exporter; a configured listen address is reported and ignored.
#[cfg(not(feature = "prometheus"))]
pub fn install_metrics(config: &RunnerConfig) -> Result<(), RunnerError> {
    if let Some(addr) = config.metrics_listen {
        tracing::warn!("metrics_listen {} ignored: built without the prometheus feature", addr);
    }
    rfcomm_metrics::describe_metrics();
    Ok(())
}

/// What the demo saw.
#[derive(Debug, Clone, PartialEq)]
pub struct DemoReport {
    /// Identity reported by the simulated robot.
    pub identity: RobotId,
    /// Value read back after the pings.
    pub value: f32,
    /// Ping results.
    pub pings: PingReport,
}

/// Run every command against a simulated robot over an in-process link.
pub fn run_demo(config: &RunnerConfig) -> Result<DemoReport, RunnerError> {
    let (mut transport, device) = spawn_on_loopback(SimulatedRobot::default())?;
    let robot = Robot::connect(&mut transport, config.robot_config())?;
    let wait = config.wait();

    let identity = client::identify(&robot, wait)?;
    info!("identified {}", identity);
    client::set_value(&robot, 1.25, 4, wait)?;
    let pings = client::ping(&robot, 5, std::time::Duration::ZERO, wait)?;
    let value = client::get_value(&robot, wait)?;
    info!("value after {} pings: {}", pings.answered, value);

    robot.close()?;
    device.join()?;
    Ok(DemoReport {
        identity,
        value,
        pings,
    })
}
