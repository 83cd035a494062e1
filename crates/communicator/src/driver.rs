//! Runs one worker job under coordinator supervision
//!
//! The driver registers, launches the job command with its assigned id, logs
//! the job's stdout, pings the coordinator while the job runs, and always
//! unregisters on the way out. The job itself normally reports the run's
//! result through a [`Communicator::with_id`] client.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use relay_core::{Error, NodeId, Result, Transport};

use crate::communicator::Communicator;

/// Placeholder replaced with the assigned worker id
pub const ID_PLACEHOLDER: &str = "{id}";
/// Placeholder replaced with the coordinator url
pub const URL_PLACEHOLDER: &str = "{url}";

/// Job to run and how to supervise it
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Job executable
    pub program: String,

    /// Job arguments; `{id}` and `{url}` are substituted
    pub args: Vec<String>,

    /// Value substituted for `{url}`
    pub coordinator_url: Option<String>,

    /// Directory receiving `input.{id}.txt`
    pub log_dir: PathBuf,

    /// Interval between pings while the job runs
    pub heartbeat_interval: Duration,

    /// Report `{"status":"ok",..}` as the run's result when the job exits zero
    pub report_success: bool,
}

impl DriverConfig {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            coordinator_url: None,
            log_dir: PathBuf::from("."),
            heartbeat_interval: Duration::from_secs(5),
            report_success: false,
        }
    }

    pub fn render_args(&self, id: NodeId) -> Vec<String> {
        let id = id.to_string();
        self.args
            .iter()
            .map(|arg| {
                let arg = arg.replace(ID_PLACEHOLDER, &id);
                match &self.coordinator_url {
                    Some(url) => arg.replace(URL_PLACEHOLDER, url),
                    None => arg,
                }
            })
            .collect()
    }

    pub fn log_path(&self, id: NodeId) -> PathBuf {
        self.log_dir.join(format!("input.{}.txt", id))
    }
}

/// How a supervised job ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The job exited successfully
    Succeeded { log: PathBuf },
    /// The coordinator marked the run done, so the job was stopped
    Cancelled,
}

/// Supervises a single job on behalf of one worker
pub struct WorkerDriver<T: Transport> {
    comm: Communicator<T>,
    config: DriverConfig,
}

impl<T: Transport> WorkerDriver<T> {
    pub fn new(comm: Communicator<T>, config: DriverConfig) -> Self {
        Self { comm, config }
    }

    pub fn communicator(&self) -> &Communicator<T> {
        &self.comm
    }

    /// Register, run the job, report its outcome and unregister
    pub async fn run(&mut self) -> Result<JobOutcome> {
        let id = self.comm.register().await?;

        let outcome = self.run_job(id).await;
        match &outcome {
            Ok(JobOutcome::Succeeded { .. }) if !self.config.report_success => {
                info!(node_id = id, "Job exited cleanly, result left to the job");
            }
            Ok(JobOutcome::Succeeded { log }) => {
                let body = json!({
                    "status": "ok",
                    "worker": id,
                    "log": log.display().to_string(),
                });
                if let Err(e) = self.comm.report_finished(body).await {
                    error!(node_id = id, error = %e, "Failed to report finished");
                }
            }
            Ok(JobOutcome::Cancelled) => {
                info!(node_id = id, "Run already complete, job stopped");
            }
            Err(e) => {
                error!(node_id = id, error = %e, "Job failed");
                if let Err(report_err) = self.comm.report_crash(Value::String(e.to_string())).await
                {
                    error!(node_id = id, error = %report_err, "Failed to report crash");
                }
            }
        }

        if let Err(e) = self.comm.unregister().await {
            warn!(node_id = id, error = %e, "Failed to unregister");
        }
        outcome
    }

    async fn run_job(&self, id: NodeId) -> Result<JobOutcome> {
        let args = self.config.render_args(id);
        let log_path = self.config.log_path(id);
        info!(node_id = id, program = %self.config.program, args = ?args, "Starting job");

        let mut child = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::WorkerFailed {
                message: format!("failed to start {}: {}", self.config.program, e),
            })?;
        let stdout = child.stdout.take().ok_or_else(|| Error::Internal {
            message: "job stdout was not captured".to_string(),
        })?;

        let mut log = File::create(&log_path).await?;
        let mut stdout = BufReader::new(stdout);
        let mut line = Vec::new();
        let mut heartbeat = interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await;

        // Copy output until the job closes stdout. Partial reads stay in `line`
        // when the heartbeat wins the select.
        loop {
            tokio::select! {
                read = stdout.read_until(b'\n', &mut line) => {
                    if read? == 0 {
                        if !line.is_empty() {
                            write_line(&mut log, id, &line).await?;
                        }
                        break;
                    }
                    if line.ends_with(b"\n") {
                        write_line(&mut log, id, &line).await?;
                        line.clear();
                    }
                }
                _ = heartbeat.tick() => {
                    if !self.keep_going(&mut child).await? {
                        log.flush().await?;
                        return Ok(JobOutcome::Cancelled);
                    }
                }
            }
        }
        log.flush().await?;

        let status = loop {
            tokio::select! {
                status = child.wait() => break status?,
                _ = heartbeat.tick() => {
                    if !self.keep_going(&mut child).await? {
                        return Ok(JobOutcome::Cancelled);
                    }
                }
            }
        };

        if status.success() {
            info!(node_id = id, log = %log_path.display(), "Job succeeded");
            Ok(JobOutcome::Succeeded { log: log_path })
        } else {
            Err(Error::WorkerFailed {
                message: format!("{} exited with {}", self.config.program, status),
            })
        }
    }

    /// Ping; kills the job when the coordinator says the run is over
    async fn keep_going(&self, child: &mut Child) -> Result<bool> {
        if self.comm.ping().await? {
            return Ok(true);
        }
        child.kill().await?;
        Ok(false)
    }
}

/// Append one job output line as `client {id}: {line}`, decoding lossily
async fn write_line(log: &mut File, id: NodeId, raw: &[u8]) -> Result<()> {
    let mut end = raw.len();
    while end > 0 && matches!(raw[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    let text = String::from_utf8_lossy(&raw[..end]);
    log.write_all(format!("client {}: {}\n", id, text).as_bytes())
        .await?;
    Ok(())
}
