//! Error types surfaced by listeners, strategies and configuration loading.

use std::path::PathBuf;
use std::time::Duration;

use crate::theme::ParseThemeError;

/// Errors returned from [`Listener`](crate::Listener) operations.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// The caller broke the listen/stop/wait contract. Not retryable.
    #[error("usage error: {0}")]
    Usage(&'static str),

    /// Listening is not available in this environment. The one-shot probe
    /// still works; callers should fall back to polling it.
    #[error("listening not available in this environment")]
    UnsupportedPlatform,

    /// The watch strategy failed. Best-effort cleanup has already run.
    #[error("listen failed")]
    ListenFailed(#[source] WatchError),

    /// `wait()` ran out of time. The listener is still stopping and `wait()`
    /// may be called again.
    #[error("timed out after {0:?} waiting for the listener to stop")]
    Timeout(Duration),
}

/// Failures raised inside a watch strategy.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("no change notification facility on this platform")]
    Unsupported,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{call} failed with code {code}")]
    Os { call: &'static str, code: u32 },

    #[cfg(target_os = "linux")]
    #[error("D-Bus error: {0}")]
    Dbus(#[from] dbus::Error),

    #[error("relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("relay worker exited with {0}")]
    WorkerExited(std::process::ExitStatus),
}

/// Failures on the worker-to-caller relay.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed relay message: {0}")]
    Malformed(#[from] ParseThemeError),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}
