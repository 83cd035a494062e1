//! Coordinator binary entry point
//!
//! Serves the relay endpoint, optionally launches the worker processes, and
//! prints the final result once every worker has stopped.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use coordinator::{CoordinatorServer, CoordinatorService, ServerConfig, WorkerLauncher};
use relay_core::RelayConfig;

/// How long launched workers get to exit after the run completes
const REAP_GRACE: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "coordinator", about = "Relay coordinator for distributed worker runs")]
struct Args {
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bind address as host:port, overrides the config file
    #[arg(long)]
    bind: Option<String>,

    /// Number of workers to launch
    #[arg(long)]
    workers: Option<usize>,

    /// Worker command; `{url}` and `{index}` are substituted per worker
    #[arg(last = true)]
    worker_command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coordinator=info,communicator=info,relay_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => RelayConfig::from_file(path)?,
        None => RelayConfig::default(),
    };

    if let Some(bind) = &args.bind {
        let (host, port) = bind
            .rsplit_once(':')
            .ok_or_else(|| format!("--bind expects host:port, got {}", bind))?;
        config.coordinator.bind_address = host.to_string();
        config.coordinator.port = port.parse()?;
    }
    if let Some((program, rest)) = args.worker_command.split_first() {
        config.launch.worker_program = program.clone();
        config.launch.worker_args = rest.to_vec();
    }
    if let Some(workers) = args.workers {
        config.launch.worker_count = workers;
    }
    config.validate()?;

    let server_config = ServerConfig::from_coordinator(&config.coordinator)?;
    let listener = TcpListener::bind(server_config.addr).await?;
    let url = format!("http://{}/", listener.local_addr()?);
    tracing::info!(url = %url, workers = config.launch.worker_count, "Starting coordinator");

    let children = WorkerLauncher::from_config(&config.launch).spawn_all(&url)?;

    let server = CoordinatorServer::with_config(CoordinatorService::new(), server_config);
    let outcome = server.serve(listener).await;

    coordinator::launcher::reap(children, REAP_GRACE).await;
    outcome?;
    Ok(())
}
