//! The listener lifecycle.
//!
//! A [`Listener`] moves through `Dead -> Listening -> Stopping -> Dead`.
//! `listen()` occupies the calling thread for the whole session and runs the
//! platform [`WatchStrategy`] there. `stop()` and `wait()` are meant to be
//! called from another thread; both are safe to call at any time.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use theme_watch::{system_listener, ListenerConfig};
//!
//! let listener = Arc::new(system_listener(&ListenerConfig::default()));
//! let driver = {
//!     let listener = Arc::clone(&listener);
//!     std::thread::spawn(move || listener.listen(|theme| println!("{theme}")))
//! };
//!
//! std::thread::sleep(Duration::from_secs(60));
//! listener.stop();
//! listener.wait(Some(Duration::from_secs(5))).unwrap();
//! driver.join().unwrap().unwrap();
//! ```

use std::sync::atomic::{AtomicU8, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{ListenerError, WatchError};
use crate::theme::Theme;

/// How long `listen()` waits for a finishing `wait()` to hand over the driver lock.
const DRIVER_HANDOFF: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListenerState {
    Listening,
    Stopping,
    Dead,
}

impl ListenerState {
    fn to_raw(self) -> u8 {
        match self {
            ListenerState::Dead => 0,
            ListenerState::Listening => 1,
            ListenerState::Stopping => 2,
        }
    }

    fn from_raw(raw: u8) -> ListenerState {
        match raw {
            1 => ListenerState::Listening,
            2 => ListenerState::Stopping,
            _ => ListenerState::Dead,
        }
    }
}

/// Atomic holder for a `ListenerState`.
#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new(state: ListenerState) -> StateCell {
        StateCell(AtomicU8::new(state.to_raw()))
    }

    fn load(&self) -> ListenerState {
        ListenerState::from_raw(self.0.load(Ordering::Acquire))
    }

    fn store(&self, state: ListenerState) {
        self.0.store(state.to_raw(), Ordering::Release);
    }

    /// Moves `from -> to`, or returns the state that was found instead.
    fn transition(&self, from: ListenerState, to: ListenerState) -> Result<(), ListenerState> {
        self.0
            .compare_exchange(from.to_raw(), to.to_raw(), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(ListenerState::from_raw)
    }
}

/// The view of the listener a strategy gets while its watch loop runs.
pub struct WatchContext<'a> {
    state: &'a StateCell,
}

impl WatchContext<'_> {
    /// `false` once `stop()` has been called. Loops must check this between
    /// blocking waits and return promptly when it flips.
    pub fn is_listening(&self) -> bool {
        self.state.load() == ListenerState::Listening
    }
}

/**
 * A platform mechanism that detects theme changes.
 *
 * Hooks are called by [`Listener`] only; `initiate_shutdown` and
 * `wait_for_shutdown` run on a different thread than `watch` and possibly
 * while `watch` is blocked.
 */
pub trait WatchStrategy: Send + Sync {
    /// Blocks until the listener stops or the underlying source ends, calling
    /// `on_change` with each new theme. Returning `WatchError::Unsupported`
    /// means no OS resources were acquired.
    fn watch(
        &self,
        ctx: &WatchContext<'_>,
        on_change: &mut dyn FnMut(Theme),
    ) -> Result<(), WatchError>;

    /// Signals the running watch to terminate. Must not block.
    fn initiate_shutdown(&self);

    /// Releases worker resources once terminated. Returns `false` if `timeout`
    /// elapsed first; the call may then be repeated.
    fn wait_for_shutdown(&self, timeout: Option<Duration>) -> bool;

    /// Whether `initiate_shutdown` reliably unblocks `watch`. When it does not,
    /// `Listener::wait` refuses to wait without a timeout.
    fn interruptible(&self) -> bool {
        true
    }
}

/// Lifecycle controller around a [`WatchStrategy`].
///
/// The driver lock is held for the whole of `listen()`. It is taken before
/// the state leaves `Dead`, so a successful `wait()` that acquires it knows
/// the watch loop has returned and no callback can still run.
pub struct Listener<S> {
    state: StateCell,
    driver: Mutex<()>,
    strategy: S,
}

impl<S: WatchStrategy> Listener<S> {
    pub fn new(strategy: S) -> Listener<S> {
        Listener {
            state: StateCell::new(ListenerState::Dead),
            driver: Mutex::new(()),
            strategy,
        }
    }

    pub fn state(&self) -> ListenerState {
        self.state.load()
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Runs a listen session on the calling thread, invoking `callback` on
    /// every detected change. Blocks until the session ends.
    ///
    /// Do not call `wait()` from inside `callback`; `stop()` is fine.
    pub fn listen<F>(&self, mut callback: F) -> Result<(), ListenerError>
    where
        F: FnMut(Theme),
    {
        let driver = self.driver.try_lock().or_else(|| {
            // A Dead listener with the lock taken is a wait() about to release it.
            (self.state() == ListenerState::Dead)
                .then(|| self.driver.try_lock_for(DRIVER_HANDOFF))
                .flatten()
        });
        let Some(_driver) = driver else {
            return Err(rejection(self.state()));
        };
        if let Err(found) = self
            .state
            .transition(ListenerState::Dead, ListenerState::Listening)
        {
            return Err(rejection(found));
        }
        debug!("listener started");

        let _teardown = StopOnUnwind(self);
        let ctx = WatchContext { state: &self.state };
        match self.strategy.watch(&ctx, &mut callback) {
            Ok(()) => {
                debug!(state = ?self.state(), "watch loop returned");
                Ok(())
            }
            Err(WatchError::Unsupported) => {
                self.state.store(ListenerState::Dead);
                Err(ListenerError::UnsupportedPlatform)
            }
            Err(err) => {
                debug!(error = %err, "watch loop failed, stopping");
                self.stop();
                Err(ListenerError::ListenFailed(err))
            }
        }
    }

    /// Asks a running session to end and returns immediately. A no-op unless
    /// the listener is `Listening`.
    pub fn stop(&self) {
        // The state flips before the hook runs so a woken loop always
        // observes Stopping.
        if self
            .state
            .transition(ListenerState::Listening, ListenerState::Stopping)
            .is_ok()
        {
            debug!("listener stopping");
            self.strategy.initiate_shutdown();
        }
    }

    /// Stops the session if needed and blocks until it has fully ended.
    ///
    /// A no-op when `Dead`. On timeout the listener stays `Stopping` and
    /// `wait()` can be called again.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<(), ListenerError> {
        if self.state() == ListenerState::Dead {
            return Ok(());
        }
        if timeout.is_none() && !self.strategy.interruptible() {
            return Err(ListenerError::Usage(
                "this listener cannot be interrupted; pass a timeout to wait()",
            ));
        }
        self.stop();

        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let timed_out = || ListenerError::Timeout(timeout.unwrap_or_default());
        if !self.strategy.wait_for_shutdown(timeout) {
            return Err(timed_out());
        }
        let driver = match deadline {
            Some(deadline) => self.driver.try_lock_until(deadline),
            None => Some(self.driver.lock()),
        };
        let Some(_driver) = driver else {
            return Err(timed_out());
        };

        self.state.store(ListenerState::Dead);
        debug!("listener dead");
        Ok(())
    }
}

impl<S> std::fmt::Debug for Listener<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("state", &self.state.load())
            .finish_non_exhaustive()
    }
}

fn rejection(found: ListenerState) -> ListenerError {
    match found {
        ListenerState::Stopping | ListenerState::Dead => {
            ListenerError::Usage("a previous stop is still in progress; call wait() first")
        }
        _ => ListenerError::Usage(
            "already running; do not call listen() from multiple threads concurrently",
        ),
    }
}

/// Marks the session as stopping if the callback panics out of `listen()`.
struct StopOnUnwind<'a, S: WatchStrategy>(&'a Listener<S>);

impl<S: WatchStrategy> Drop for StopOnUnwind<'_, S> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.stop();
        }
    }
}
