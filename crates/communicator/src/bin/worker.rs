//! Worker binary entry point
//!
//! Registers with the coordinator, runs one job command and reports how it ended.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use communicator::{Communicator, DriverConfig, HttpTransport, JobOutcome, WorkerDriver};
use relay_core::RelayConfig;

#[derive(Parser, Debug)]
#[command(name = "worker", about = "Relay worker running one supervised job")]
struct Args {
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Coordinator url, overrides the config file
    #[arg(long)]
    url: Option<String>,

    /// Directory for the job log
    #[arg(long, default_value = ".")]
    log_dir: PathBuf,

    /// Heartbeat interval in milliseconds, overrides the config file
    #[arg(long)]
    heartbeat_ms: Option<u64>,

    /// Report `{"status":"ok"}` as the run's result when the job exits zero
    #[arg(long)]
    report_success: bool,

    /// Job command; `{id}` and `{url}` are substituted
    #[arg(last = true, required = true)]
    job: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coordinator=info,communicator=info,relay_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(JobOutcome::Succeeded { log }) => {
            tracing::info!(log = %log.display(), "Worker finished");
            ExitCode::SUCCESS
        }
        Ok(JobOutcome::Cancelled) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Worker failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> relay_core::Result<JobOutcome> {
    let mut config = match &args.config {
        Some(path) => RelayConfig::from_file(path)?,
        None => RelayConfig::default(),
    };
    if let Some(url) = args.url {
        config.communicator.coordinator_url = url;
    }
    if let Some(ms) = args.heartbeat_ms {
        config.communicator.heartbeat_interval = Duration::from_millis(ms);
    }
    config.validate()?;

    let (program, rest) = args
        .job
        .split_first()
        .ok_or_else(|| relay_core::Error::InvalidConfig {
            message: "no job command given".to_string(),
        })?;
    let mut driver_config = DriverConfig::new(program.clone(), rest.to_vec());
    driver_config.log_dir = args.log_dir;
    driver_config.heartbeat_interval = config.communicator.heartbeat_interval;
    driver_config.coordinator_url = Some(config.communicator.coordinator_url.clone());
    driver_config.report_success = args.report_success;

    let transport = HttpTransport::from_config(&config.communicator)?;
    let mut driver = WorkerDriver::new(Communicator::new(transport), driver_config);
    driver.run().await
}
