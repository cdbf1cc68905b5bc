use serde::Deserialize;
use std::fs::read_to_string;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Environment variable naming a TOML file read by [`ListenerConfig::load`].
pub const CONFIG_ENV: &str = "THEME_WATCH_CONFIG";

const DEFAULT_RELAY_CAPACITY: usize = 16;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_BUS_TIMEOUT_MS: u64 = 5000;

/// Tunables shared by every watch strategy.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Capacity of the bounded relay between an isolated worker and the caller.
    pub relay_capacity: usize,
    /// Poll strategy interval, and the dispatch slice of the portal watch loop.
    pub poll_interval_ms: u64,
    /// Timeout for D-Bus method calls.
    pub bus_timeout_ms: u64,
    pub worker: WorkerConfig,
}

/// Where the notification strategy hosts its foreign event loop.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum WorkerConfig {
    /// A dedicated OS thread in this process.
    #[default]
    Thread,
    /// A child process that runs the relay worker and writes one theme per line.
    Process {
        program: PathBuf,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl Default for ListenerConfig {
    fn default() -> Self {
        ListenerConfig {
            relay_capacity: DEFAULT_RELAY_CAPACITY,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            bus_timeout_ms: DEFAULT_BUS_TIMEOUT_MS,
            worker: WorkerConfig::default(),
        }
    }
}

impl ListenerConfig {
    /// Reads the file named by `THEME_WATCH_CONFIG`, or returns the defaults
    /// when the variable is unset or empty.
    pub fn load() -> Result<ListenerConfig, ConfigError> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) if !path.is_empty() => ListenerConfig::from_path(Path::new(&path)),
            _ => Ok(ListenerConfig::default()),
        }
    }

    pub fn from_path(path: &Path) -> Result<ListenerConfig, ConfigError> {
        let contents = read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        ListenerConfig::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<ListenerConfig, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn bus_timeout(&self) -> Duration {
        Duration::from_millis(self.bus_timeout_ms)
    }

    /// Relay capacity, never zero so the relay never degenerates into a rendezvous channel.
    pub fn relay_capacity(&self) -> usize {
        self.relay_capacity.max(1)
    }
}
