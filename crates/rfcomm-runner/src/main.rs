//! `rfcomm` command-line tool.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use rfcomm_robot::sim::{default_identity, SimulatedRobot};
use rfcomm_runner::config::DEFAULT_LISTEN;
use rfcomm_runner::server::SimServer;
use rfcomm_runner::{client, RunnerConfig, RunnerError};
use tokio::sync::watch;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rfcomm", version, about = "Talk to a robot over an RFCOMM-style byte link", long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Robot address (host:port), overrides the config file
    #[arg(long)]
    connect: Option<String>,

    /// Response timeout in milliseconds, overrides the config file
    #[arg(long)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ping the robot
    Ping {
        /// Number of pings
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,

        /// Delay between pings in milliseconds
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
    },
    /// Print the robot's identity record
    Id,
    /// Print the stored value
    Get,
    /// Store a value and the per-ping increment
    Set {
        /// New value
        #[arg(allow_negative_numbers = true)]
        value: f32,

        /// Increment steps applied on each ping
        #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
        increment: i32,
    },
    /// Serve a simulated robot over TCP until Ctrl-C
    Simulate {
        /// Listen address
        #[arg(long, default_value = DEFAULT_LISTEN)]
        listen: String,

        /// Device name reported by ID
        #[arg(long)]
        name: Option<String>,
    },
    /// Run every command against an in-process simulated robot
    Demo,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,rfcomm=info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), RunnerError> {
    let mut config = match &cli.config {
        Some(path) => RunnerConfig::load(path)?,
        None => RunnerConfig::default(),
    };
    if let Some(addr) = cli.connect {
        config.connect = Some(addr);
    }
    if let Some(ms) = cli.timeout_ms {
        config.session.response_timeout_ms = ms;
        config.session.validate()?;
    }
    rfcomm_runner::install_metrics(&config)?;
    let wait = config.wait();

    match cli.command {
        Command::Ping { count, interval_ms } => {
            let robot = rfcomm_runner::connect(&config)?;
            let report = client::ping(&robot, count, std::time::Duration::from_millis(interval_ms), wait)?;
            for (i, rtt) in report.round_trips.iter().enumerate() {
                println!("pong {}: {:.1} ms", i + 1, rtt.as_secs_f64() * 1000.0);
            }
            if let Some(mean) = report.mean_round_trip() {
                println!(
                    "{} of {} answered, mean {:.1} ms",
                    report.answered,
                    count,
                    mean.as_secs_f64() * 1000.0
                );
            }
            if report.out_of_sync > 0 {
                println!("{} replies out of sync", report.out_of_sync);
            }
            robot.close()?;
        }
        Command::Id => {
            let robot = rfcomm_runner::connect(&config)?;
            let id = client::identify(&robot, wait)?;
            println!("name: {}", id.name);
            println!("date: {}", id.date);
            println!("time: {}", id.time);
            robot.close()?;
        }
        Command::Get => {
            let robot = rfcomm_runner::connect(&config)?;
            println!("{}", client::get_value(&robot, wait)?);
            robot.close()?;
        }
        Command::Set { value, increment } => {
            let robot = rfcomm_runner::connect(&config)?;
            println!("{}", client::set_value(&robot, value, increment, wait)?);
            robot.close()?;
        }
        Command::Simulate { listen, name } => {
            let mut identity = default_identity();
            if let Some(name) = name {
                identity.name = name;
            }
            let (shutdown, stop_rx) = watch::channel(false);
            ctrlc::set_handler(move || {
                let _ = shutdown.send(true);
            })
            .map_err(|e| std::io::Error::other(e.to_string()))?;

            let runtime = tokio::runtime::Runtime::new()?;
            let robot = runtime.block_on(async {
                let server = SimServer::bind(listen.as_str(), SimulatedRobot::new(identity)).await?;
                println!("listening on {} (Ctrl-C to stop)", server.local_addr()?);
                server.run(stop_rx).await
            })?;
            println!("final value {}", robot.value());
        }
        Command::Demo => {
            let report = rfcomm_runner::run_demo(&config)?;
            println!("identity: {}", report.identity);
            println!("pings answered: {}", report.pings.answered);
            println!("value: {}", report.value);
        }
    }
    Ok(())
}
