//! Client API for the robot.

use std::time::Duration;

use crossbeam_channel::Receiver;
use rfcomm_session::{Session, SessionConfig, SessionHandle, Transport};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::commands::{identify, ping, value_get, value_set};
use crate::error::RobotError;
use crate::handler::{RecoveryPolicy, RobotEvent, RobotHandler};

/// Robot connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    /// Session tunables.
    pub session: SessionConfig,
    /// Behaviour after a command times out.
    pub recovery: RecoveryPolicy,
    /// Request the identity record as soon as the link is up.
    pub identify_on_connect: bool,
}

impl Default for RobotConfig {
    fn default() -> Self {
        RobotConfig {
            session: SessionConfig::default(),
            recovery: RecoveryPolicy::default(),
            identify_on_connect: true,
        }
    }
}

/// A connected robot.
///
/// Commands return as soon as they are queued; their results arrive as
/// [`RobotEvent`]s in command order.
#[derive(Debug)]
pub struct Robot {
    session: Session<RobotHandler>,
    events: Receiver<RobotEvent>,
}

impl Robot {
    /// Connect over `transport` and start the session.
    pub fn connect<T>(transport: &mut T, config: RobotConfig) -> Result<Self, RobotError>
    where
        T: Transport + ?Sized,
    {
        let (tx, events) = crossbeam_channel::unbounded();
        let handler = RobotHandler::new(tx, config.recovery);
        let session = Session::start(transport, handler, config.session)?;
        info!("connected to robot at {}", session.peer());

        let robot = Robot { session, events };
        if config.identify_on_connect {
            robot.identify()?;
        }
        Ok(robot)
    }

    /// Queue a `PING`.
    pub fn ping(&self) -> Result<(), RobotError> {
        Ok(self.session.enqueue(ping())?)
    }

    /// Queue an `ID` request.
    pub fn identify(&self) -> Result<(), RobotError> {
        Ok(self.session.enqueue(identify())?)
    }

    /// Queue a `VALUE_GET`.
    pub fn get_value(&self) -> Result<(), RobotError> {
        Ok(self.session.enqueue(value_get())?)
    }

    /// Queue a `VALUE_SET`.
    pub fn set_value(&self, value: f32, ping_increment: i32) -> Result<(), RobotError> {
        let exchange = value_set(value, ping_increment)?;
        Ok(self.session.enqueue(exchange)?)
    }

    /// Drop every command not yet sent.
    pub fn clear_pending(&self) -> Result<(), RobotError> {
        Ok(self.session.clear_pending()?)
    }

    /// Event stream.
    pub fn events(&self) -> &Receiver<RobotEvent> {
        &self.events
    }

    /// Wait up to `timeout` for the next event.
    pub fn wait_event(&self, timeout: Duration) -> Option<RobotEvent> {
        self.events.recv_timeout(timeout).ok()
    }

    /// Handle for queueing raw exchanges from other threads.
    pub fn handle(&self) -> SessionHandle {
        self.session.handle()
    }

    /// Peer identity.
    pub fn peer(&self) -> &str {
        self.session.peer()
    }

    /// Close the link and wait for the session threads.
    pub fn close(self) -> Result<(), RobotError> {
        self.session.close()?;
        Ok(())
    }
}
