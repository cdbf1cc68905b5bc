//! Per-platform watch strategies and the one-shot probe behind them.

use crate::config::ListenerConfig;
use crate::listener::Listener;

pub mod poll;

cfg_if::cfg_if!(
    if #[cfg(target_os = "windows")] {
        pub mod registry;
        pub use self::registry::RegistryStrategy as SystemStrategy;
        pub(crate) use self::registry::query_theme;

        pub(crate) fn listen_supported() -> bool {
            true
        }

        pub fn run_relay_worker() -> Result<(), crate::error::WatchError> {
            Err(crate::error::WatchError::Unsupported)
        }
    } else if #[cfg(target_os = "macos")] {
        pub mod macos;
        pub use self::macos::{run_relay_worker, NotificationStrategy as SystemStrategy};
        pub(crate) use self::macos::{listen_supported, query_theme};
    } else if #[cfg(target_os = "linux")] {
        pub mod linux;
        pub use self::linux::PortalStrategy as SystemStrategy;
        pub(crate) use self::linux::{listen_supported, query_theme};

        pub fn run_relay_worker() -> Result<(), crate::error::WatchError> {
            Err(crate::error::WatchError::Unsupported)
        }
    } else {
        mod unsupported;
        pub use self::unsupported::UnsupportedStrategy as SystemStrategy;

        pub(crate) fn query_theme() -> crate::theme::Theme {
            crate::theme::Theme::Unknown
        }

        pub(crate) fn listen_supported() -> bool {
            false
        }

        pub fn run_relay_worker() -> Result<(), crate::error::WatchError> {
            Err(crate::error::WatchError::Unsupported)
        }
    }
);

/// Listener driven by the native strategy for this platform.
pub type SystemListener = Listener<SystemStrategy>;

pub fn system_listener(config: &ListenerConfig) -> SystemListener {
    Listener::new(SystemStrategy::from_config(config))
}
