// ABOUTME: Configuration types and parsing for hearth.yml.
// ABOUTME: Handles YAML parsing, file discovery, defaults and environment overrides.

use crate::error::{Error, Result};
use crate::runtime::{RuntimeConfig, RuntimeType};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILENAME: &str = "hearth.yml";
pub const CONFIG_FILENAME_ALT: &str = "hearth.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".hearth/config.yml";

pub const ENV_DATA_DIR: &str = "HEARTH_DATA_DIR";
pub const ENV_TEMPLATES_DIR: &str = "HEARTH_TEMPLATES_DIR";
pub const ENV_DRIVER_ADDR: &str = "HEARTH_DRIVER_ADDR";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Root of per-container directories (`<data_dir>/<id>/...`).
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_templates_dir")]
    pub templates_dir: PathBuf,

    #[serde(default)]
    pub driver: DriverConfig,

    #[serde(default)]
    pub logs: LogsConfig,

    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    /// Host name written into linked database environment entries.
    #[serde(default = "default_database_host")]
    pub database_host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DriverConfig {
    /// Loopback address the privileged driver listens on.
    #[serde(default = "default_driver_listen")]
    pub listen: SocketAddr,

    #[serde(default)]
    pub runtime: Option<RuntimeType>,

    #[serde(default)]
    pub socket: Option<String>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            listen: default_driver_listen(),
            runtime: None,
            socket: None,
        }
    }
}

impl DriverConfig {
    /// Convert to RuntimeConfig for use with runtime detection.
    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            runtime: self.runtime,
            socket: self.socket.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogsConfig {
    /// Lines kept in memory per container.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutsConfig {
    /// How long Start blocks waiting for `running`.
    #[serde(default = "default_start_timeout", with = "humantime_serde")]
    pub start: Duration,

    /// Deadline for a Stop call to the runner.
    #[serde(default = "default_stop_timeout", with = "humantime_serde")]
    pub stop: Duration,

    /// Default deadline for WaitStatus.
    #[serde(default = "default_wait_timeout", with = "humantime_serde")]
    pub wait_status: Duration,

    /// Grace period the runtime gives a container before killing it.
    #[serde(default = "default_runtime_stop", with = "humantime_serde")]
    pub runtime_stop: Duration,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            start: default_start_timeout(),
            stop: default_stop_timeout(),
            wait_status: default_wait_timeout(),
            runtime_stop: default_runtime_stop(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("live/containers")
}

fn default_templates_dir() -> PathBuf {
    PathBuf::from("live/templates")
}

fn default_driver_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 6131))
}

fn default_buffer_capacity() -> usize {
    50
}

fn default_start_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_stop_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_wait_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_runtime_stop() -> Duration {
    Duration::from_secs(10)
}

fn default_database_host() -> String {
    "host.docker.internal".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            templates_dir: default_templates_dir(),
            driver: DriverConfig::default(),
            logs: LogsConfig::default(),
            timeouts: TimeoutsConfig::default(),
            database_host: default_database_host(),
        }
    }
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Find a config file in `dir`, falling back to defaults when none exists.
    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                tracing::debug!(path = %path.display(), "Loading configuration");
                return Self::load(path);
            }
        }

        tracing::debug!(dir = %dir.display(), "No configuration file found, using defaults");
        Ok(Self::default())
    }

    /// Apply `HEARTH_*` environment overrides on top of the file values.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var(ENV_TEMPLATES_DIR) {
            self.templates_dir = PathBuf::from(dir);
        }
        if let Ok(addr) = std::env::var(ENV_DRIVER_ADDR) {
            self.driver.listen = addr.parse().map_err(|_| {
                Error::InvalidConfig(format!("{ENV_DRIVER_ADDR}: bad address {addr}"))
            })?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.driver.listen.ip().is_loopback() {
            return Err(Error::InvalidConfig(format!(
                "driver must listen on a loopback address, got {}",
                self.driver.listen
            )));
        }
        if self.logs.buffer_capacity == 0 {
            return Err(Error::InvalidConfig(
                "logs.buffer_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
