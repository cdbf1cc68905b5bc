//! Detects whether the OS is in dark or light mode, and listens for changes.
//!
//! [`theme()`] answers once. A [`Listener`] built by [`system_listener`]
//! reports every change to a callback until it is stopped:
//!
//! - Windows: registry change notifications on the `Personalize` key.
//! - macOS: `AppleInterfaceThemeChangedNotification` from the distributed
//!   notification center, observed by an isolated worker.
//! - Linux: the XDG desktop portal `SettingChanged` signal.
//!
//! The library logs through `tracing` and never installs a subscriber.

// Modules
pub mod capability;
pub mod config;
pub mod error;
pub mod listener;
pub mod probe;
pub mod relay;
pub mod theme;
pub mod watch;

use tracing::warn;

pub use crate::capability::can_listen;
pub use crate::config::{ListenerConfig, WorkerConfig};
pub use crate::error::{ConfigError, ListenerError, RelayError, WatchError};
pub use crate::listener::{Listener, ListenerState, WatchContext, WatchStrategy};
pub use crate::probe::{is_dark, is_light, theme, SystemProbe, ThemeProbe};
pub use crate::theme::{ChangeFilter, Theme};
pub use crate::watch::poll::PollStrategy;
pub use crate::watch::{system_listener, SystemListener, SystemStrategy};

/// Listens on the calling thread with the system strategy until the source
/// ends. Configuration comes from [`ListenerConfig::load`]; an unreadable
/// file falls back to the defaults.
pub fn listen<F>(callback: F) -> Result<(), ListenerError>
where
    F: FnMut(Theme),
{
    let config = ListenerConfig::load().unwrap_or_else(|err| {
        warn!(error = %err, "using default listener config");
        ListenerConfig::default()
    });
    system_listener(&config).listen(callback)
}
