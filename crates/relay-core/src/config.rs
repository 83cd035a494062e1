//! Relay configuration types

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::{Error, Result};

/// Main relay configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Coordinator settings
    pub coordinator: CoordinatorConfig,

    /// Worker-side communicator settings
    pub communicator: CommunicatorConfig,

    /// Worker launch settings
    pub launch: LaunchConfig,
}

impl RelayConfig {
    /// Load a configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: RelayConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values that can never work
    pub fn validate(&self) -> Result<()> {
        if self.coordinator.port == 0 {
            return Err(Error::InvalidConfig {
                message: "coordinator.port must be non-zero".to_string(),
            });
        }
        if self.communicator.coordinator_url.trim().is_empty() {
            return Err(Error::InvalidConfig {
                message: "communicator.coordinator_url cannot be empty".to_string(),
            });
        }
        if self.communicator.heartbeat_interval.is_zero() {
            return Err(Error::InvalidConfig {
                message: "communicator.heartbeat_interval must be non-zero".to_string(),
            });
        }
        if self.launch.worker_count > 0 && self.launch.worker_program.trim().is_empty() {
            return Err(Error::InvalidConfig {
                message: "launch.worker_program is required when worker_count > 0".to_string(),
            });
        }
        Ok(())
    }
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Address to bind the coordinator endpoint
    pub bind_address: String,

    /// Port for the coordinator endpoint
    pub port: u16,
}

impl CoordinatorConfig {
    /// `host:port` form of the bind address
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 5000,
        }
    }
}

/// Communicator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommunicatorConfig {
    /// Coordinator endpoint url
    pub coordinator_url: String,

    /// Per-request timeout; None waits indefinitely
    #[serde(with = "optional_millis")]
    pub request_timeout: Option<Duration>,

    /// Heartbeat interval used by worker drivers
    #[serde(with = "millis")]
    pub heartbeat_interval: Duration,
}

impl Default for CommunicatorConfig {
    fn default() -> Self {
        Self {
            coordinator_url: "http://127.0.0.1:5000/".to_string(),
            request_timeout: None,
            heartbeat_interval: Duration::from_secs(5),
        }
    }
}

/// Worker launch configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    /// Number of worker processes to spawn
    pub worker_count: usize,

    /// Worker executable
    pub worker_program: String,

    /// Worker arguments; `{url}` and `{index}` are substituted per worker
    pub worker_args: Vec<String>,
}

/// Duration serialization as milliseconds
mod millis {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

mod optional_millis {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
