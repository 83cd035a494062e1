//! Spawns worker processes once the coordinator endpoint is bound

use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{info, warn};

use relay_core::{Error, LaunchConfig, Result};

/// Placeholder replaced with the coordinator url
pub const URL_PLACEHOLDER: &str = "{url}";
/// Placeholder replaced with the zero-based worker index
pub const INDEX_PLACEHOLDER: &str = "{index}";

/// Launches a fixed number of copies of a worker command
#[derive(Debug, Clone)]
pub struct WorkerLauncher {
    program: String,
    args: Vec<String>,
    count: usize,
}

impl WorkerLauncher {
    pub fn new(program: impl Into<String>, args: Vec<String>, count: usize) -> Self {
        Self {
            program: program.into(),
            args,
            count,
        }
    }

    pub fn from_config(config: &LaunchConfig) -> Self {
        Self::new(
            config.worker_program.clone(),
            config.worker_args.clone(),
            config.worker_count,
        )
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Arguments for the worker at `index`
    pub fn render_args(&self, url: &str, index: usize) -> Vec<String> {
        let index = index.to_string();
        self.args
            .iter()
            .map(|arg| {
                arg.replace(URL_PLACEHOLDER, url)
                    .replace(INDEX_PLACEHOLDER, &index)
            })
            .collect()
    }

    /// Spawn every worker, pointing them at `url`
    pub fn spawn_all(&self, url: &str) -> Result<Vec<Child>> {
        if self.count > 0 && self.program.trim().is_empty() {
            return Err(Error::InvalidConfig {
                message: "no worker program to launch".to_string(),
            });
        }

        let mut children = Vec::with_capacity(self.count);
        for index in 0..self.count {
            let args = self.render_args(url, index);
            let child = Command::new(&self.program)
                .args(&args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| Error::WorkerFailed {
                    message: format!("failed to spawn {} #{}: {}", self.program, index, e),
                })?;
            info!(index = index, pid = ?child.id(), program = %self.program, "Worker launched");
            children.push(child);
        }
        Ok(children)
    }
}

/// Wait for launched workers, killing any that outlive `grace`
pub async fn reap(children: Vec<Child>, grace: Duration) {
    for mut child in children {
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => info!(pid = ?child.id(), status = %status, "Worker exited"),
            Ok(Err(e)) => warn!(error = %e, "Failed to wait for worker"),
            Err(_) => {
                warn!(pid = ?child.id(), "Worker still running after shutdown, killing");
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill worker");
                }
            }
        }
    }
}
