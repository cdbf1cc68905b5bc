use std::time::Duration;

use crate::config::ListenerConfig;
use crate::error::WatchError;
use crate::listener::{WatchContext, WatchStrategy};
use crate::theme::Theme;

/// Strategy for targets without any change notification facility.
#[derive(Debug, Default)]
pub struct UnsupportedStrategy;

impl UnsupportedStrategy {
    pub fn from_config(_config: &ListenerConfig) -> UnsupportedStrategy {
        UnsupportedStrategy
    }
}

impl WatchStrategy for UnsupportedStrategy {
    fn watch(
        &self,
        _ctx: &WatchContext<'_>,
        _on_change: &mut dyn FnMut(Theme),
    ) -> Result<(), WatchError> {
        Err(WatchError::Unsupported)
    }

    fn initiate_shutdown(&self) {}

    fn wait_for_shutdown(&self, _timeout: Option<Duration>) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ListenerError;
    use crate::listener::ListenerState;

    #[test]
    fn system_listener_reports_unsupported_platform() {
        let listener = crate::watch::system_listener(&ListenerConfig::default());
        assert!(matches!(
            listener.listen(|_| {}),
            Err(ListenerError::UnsupportedPlatform)
        ));
        assert_eq!(listener.state(), ListenerState::Dead);
    }
}
