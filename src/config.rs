//! Driver-wide settings.
//!
//! Everything has a default, so an empty TOML file is a valid configuration.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

pub const DEFAULT_VMM_BINARY: &str = "cloud-hypervisor";
pub const DEFAULT_STATE_DIR: &str = "/run/chvisor";

#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("cannot read config file '{path}'")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file '{path}'")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriverConfig {
    /// Where per-instance API sockets are created.
    pub state_dir: PathBuf,
    /// Where VMM stdout/stderr are written, one file per instance. Unset by
    /// default, which discards the output; `/var/log/chvisor` is the usual
    /// choice when running as root.
    pub log_dir: Option<PathBuf>,
    pub vmm_binary: String,
    pub readiness_attempts: u32,
    pub readiness_interval_ms: u64,
    pub terminate_grace_ms: u64,
    /// How long a caller waits for another job on the same instance.
    pub job_wait_ms: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            log_dir: None,
            vmm_binary: DEFAULT_VMM_BINARY.into(),
            readiness_attempts: 5,
            readiness_interval_ms: 100,
            terminate_grace_ms: 3000,
            job_wait_ms: 30_000,
        }
    }
}

impl DriverConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigFileError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigFileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text).map_err(|source| ConfigFileError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn job_wait(&self) -> Duration {
        Duration::from_millis(self.job_wait_ms)
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            socket_dir: self.state_dir.clone(),
            log_dir: self.log_dir.clone(),
            vmm_binary: self.vmm_binary.clone(),
            readiness_attempts: self.readiness_attempts,
            readiness_interval: Duration::from_millis(self.readiness_interval_ms),
            terminate_grace: Duration::from_millis(self.terminate_grace_ms),
        }
    }
}

/// What a single monitor needs to know to launch and tear down its VMM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    pub socket_dir: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub vmm_binary: String,
    pub readiness_attempts: u32,
    pub readiness_interval: Duration,
    pub terminate_grace: Duration,
}

impl MonitorConfig {
    pub fn new(socket_dir: impl Into<PathBuf>) -> Self {
        Self {
            socket_dir: socket_dir.into(),
            ..DriverConfig::default().monitor_config()
        }
    }
}
