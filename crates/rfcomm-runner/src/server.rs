//! TCP server for the simulated robot.
//!
//! Each client gets its own task, and all of them talk to one
//! [`SimulatedRobot`], so the device state carries over from one connection
//! to the next. Shutdown is a `watch` channel: flipping it ends the accept
//! loop and every open connection.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rfcomm_robot::sim::SimulatedRobot;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

type SharedRobot = Arc<Mutex<SimulatedRobot>>;

/// A simulated robot listening on a TCP port.
#[derive(Debug)]
pub struct SimServer {
    listener: TcpListener,
    robot: SharedRobot,
}

impl SimServer {
    /// Bind to `addr`.
    pub async fn bind<A: ToSocketAddrs>(addr: A, robot: SimulatedRobot) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(SimServer {
            listener,
            robot: Arc::new(Mutex::new(robot)),
        })
    }

    /// Bound address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve clients until `shutdown` turns true or its sender is dropped,
    /// then return the robot.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> io::Result<SimulatedRobot> {
        info!("simulated robot '{}' listening on {}", lock(&self.robot)?.identity().name, self.local_addr()?);
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = accepted?;
                    info!("client connected from {}", peer);
                    let robot = Arc::clone(&self.robot);
                    let shutdown = shutdown.clone();
                    connections.spawn(async move {
                        match handle_connection(stream, robot, shutdown).await {
                            Ok(()) => info!("client {} disconnected", peer),
                            Err(e) => warn!("connection error from {}: {}", peer, e),
                        }
                    });
                }
                _ = shutdown.changed() => break,
            }
        }

        while connections.join_next().await.is_some() {}
        let robot = Arc::try_unwrap(self.robot)
            .map_err(|_| io::Error::other("simulated robot still shared after shutdown"))?
            .into_inner()
            .map_err(|_| io::Error::other("simulated robot lock poisoned"))?;
        let stats = robot.stats();
        info!(
            "simulator stopped after {} commands ({} checksum errors, {} rx timeouts)",
            stats.commands_processed, stats.checksum_errors, stats.rx_errors
        );
        Ok(robot)
    }
}

fn lock(robot: &Mutex<SimulatedRobot>) -> io::Result<MutexGuard<'_, SimulatedRobot>> {
    robot
        .lock()
        .map_err(|_| io::Error::other("simulated robot lock poisoned"))
}

fn feed(robot: &Mutex<SimulatedRobot>, bytes: &[u8]) -> io::Result<Vec<u8>> {
    Ok(lock(robot)?.feed(bytes, Instant::now()))
}

fn payload_deadline(robot: &Mutex<SimulatedRobot>) -> io::Result<Option<Instant>> {
    Ok(lock(robot)?.payload_deadline())
}

fn expire_payload(robot: &Mutex<SimulatedRobot>) -> io::Result<()> {
    if lock(robot)?.poll(Instant::now()) {
        debug!("abandoned VALUE_SET payload on a quiet link");
    }
    Ok(())
}

/// Bridge one client to the robot.
async fn handle_connection(
    mut stream: TcpStream,
    robot: SharedRobot,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
    stream.set_nodelay(true)?;
    let (mut reader, mut writer) = stream.split();
    let mut read_buf = [0u8; 256];

    loop {
        // Wake just after a pending payload expires so it is dropped even
        // if the client goes quiet.
        let deadline = payload_deadline(&robot)?;
        let expiry = async {
            match deadline {
                Some(at) => tokio::time::sleep_until((at + Duration::from_millis(1)).into()).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            result = reader.read(&mut read_buf) => {
                let n = result?;
                if n == 0 {
                    return Ok(());
                }
                let reply = feed(&robot, &read_buf[..n])?;
                if !reply.is_empty() {
                    writer.write_all(&reply).await?;
                    writer.flush().await?;
                }
            }
            _ = expiry => expire_payload(&robot)?,
            _ = shutdown.changed() => return Ok(()),
        }
    }
}

/// A server running on its own thread and runtime.
#[derive(Debug)]
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    thread: JoinHandle<io::Result<SimulatedRobot>>,
}

impl ServerHandle {
    /// Bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop serving and return the robot.
    pub fn stop(self) -> io::Result<SimulatedRobot> {
        let _ = self.shutdown.send(true);
        self.thread
            .join()
            .map_err(|_| io::Error::other("simulator server thread panicked"))?
    }
}

/// Bind a server on `addr` and run it on a `rfcomm-sim-server` thread, for
/// callers that are not async themselves.
pub fn spawn(addr: &str, robot: SimulatedRobot) -> io::Result<ServerHandle> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()?;
    let server = runtime.block_on(SimServer::bind(addr, robot))?;
    let addr = server.local_addr()?;
    let (shutdown, stop_rx) = watch::channel(false);
    let thread = thread::Builder::new()
        .name("rfcomm-sim-server".into())
        .spawn(move || runtime.block_on(server.run(stop_rx)))?;
    Ok(ServerHandle {
        addr,
        shutdown,
        thread,
    })
}
