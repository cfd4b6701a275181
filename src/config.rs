use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::{plog_debug, Error, Result};

fn default_retry_backoff_ms() -> u64 {
    1_000
}

fn default_delivery_timeout_ms() -> u64 {
    5_000
}

fn default_response_timeout_ms() -> u64 {
    30_000
}

fn default_teardown_grace_ms() -> u64 {
    500
}

fn default_channel_capacity() -> usize {
    100
}

/// Runtime tuning knobs for the workflow runtime.
///
/// All durations are stored as milliseconds so the TOML file stays plain
/// integers; typed accessors return `Duration`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Fixed backoff between step retries when the step does not override it.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// How long a delegation waits for the router's delivery acknowledgement.
    #[serde(default = "default_delivery_timeout_ms")]
    pub delivery_timeout_ms: u64,
    /// How long a delegation waits for the correlated response signal.
    /// Must be longer than the delivery timeout.
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    /// Grace period between signalling scoped owners to stop and removing them.
    #[serde(default = "default_teardown_grace_ms")]
    pub teardown_grace_ms: u64,
    /// Mailbox capacity for actor command channels and worker inboxes.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            retry_backoff_ms: default_retry_backoff_ms(),
            delivery_timeout_ms: default_delivery_timeout_ms(),
            response_timeout_ms: default_response_timeout_ms(),
            teardown_grace_ms: default_teardown_grace_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Config {
    pub fn plexus_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".plexus"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::plexus_dir()?.join("plexus.toml"))
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn teardown_grace(&self) -> Duration {
        Duration::from_millis(self.teardown_grace_ms)
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        plog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            plog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        plog_debug!(
            "Config loaded: delivery_timeout={}ms response_timeout={}ms",
            config.delivery_timeout_ms,
            config.response_timeout_ms
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let plexus_dir = Self::plexus_dir()?;
        if !plexus_dir.exists() {
            plog_debug!("Creating plexus directory: {}", plexus_dir.display());
            fs::create_dir_all(&plexus_dir)?;
        }
        let path = Self::config_path()?;
        fs::write(&path, toml::to_string_pretty(self)?)?;
        plog_debug!("Config saved to {}", path.display());
        Ok(())
    }
}
