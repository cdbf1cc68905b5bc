use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::config::ListenerConfig;
use crate::error::WatchError;
use crate::listener::{WatchContext, WatchStrategy};
use crate::probe::ThemeProbe;
use crate::theme::{ChangeFilter, Theme};

/// Re-reads a [`ThemeProbe`] at a fixed interval.
///
/// Works anywhere the probe works. The sleep between reads is a condition
/// variable wait, so `stop()` ends the loop without waiting out the interval.
pub struct PollStrategy<P> {
    probe: P,
    interval: Duration,
    sleeper: Mutex<()>,
    wakeup: Condvar,
}

impl<P: ThemeProbe> PollStrategy<P> {
    pub fn new(probe: P, interval: Duration) -> PollStrategy<P> {
        PollStrategy {
            probe,
            interval,
            sleeper: Mutex::new(()),
            wakeup: Condvar::new(),
        }
    }

    pub fn from_config(probe: P, config: &ListenerConfig) -> PollStrategy<P> {
        PollStrategy::new(probe, config.poll_interval())
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl<P: ThemeProbe> WatchStrategy for PollStrategy<P> {
    fn watch(
        &self,
        ctx: &WatchContext<'_>,
        on_change: &mut dyn FnMut(Theme),
    ) -> Result<(), WatchError> {
        let mut filter = ChangeFilter::seeded(self.probe.query_theme());
        debug!(initial = ?filter.last(), interval = ?self.interval, "polling theme");

        loop {
            {
                // Checked under the lock that `initiate_shutdown` notifies
                // under, so a stop between the check and the wait still wakes us.
                let mut guard = self.sleeper.lock();
                if !ctx.is_listening() {
                    break;
                }
                self.wakeup.wait_for(&mut guard, self.interval);
            }
            if !ctx.is_listening() {
                break;
            }
            if let Some(theme) = filter.observe(self.probe.query_theme()) {
                debug!(%theme, "theme changed");
                on_change(theme);
            }
        }
        Ok(())
    }

    fn initiate_shutdown(&self) {
        let _guard = self.sleeper.lock();
        self.wakeup.notify_all();
    }

    fn wait_for_shutdown(&self, _timeout: Option<Duration>) -> bool {
        // Nothing outlives `watch`; the listener's driver lock confirms exit.
        true
    }
}
