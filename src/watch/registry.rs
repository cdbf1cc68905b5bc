use std::ffi::c_void;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};
use windows::core::{w, PCWSTR};
use windows::Win32::Foundation::{CloseHandle, GetLastError, ERROR_SUCCESS, HANDLE, WAIT_OBJECT_0};
use windows::Win32::System::Registry::{
    RegCloseKey, RegGetValueW, RegNotifyChangeKeyValue, RegOpenKeyExW, HKEY, HKEY_CURRENT_USER,
    KEY_NOTIFY, KEY_READ, REG_NOTIFY_CHANGE_LAST_SET, REG_SAM_FLAGS, RRF_RT_REG_DWORD,
};
use windows::Win32::System::Threading::{CreateEventW, SetEvent, WaitForMultipleObjects, INFINITE};

use crate::capability;
use crate::config::ListenerConfig;
use crate::error::WatchError;
use crate::listener::{WatchContext, WatchStrategy};
use crate::theme::{ChangeFilter, Theme};

const PERSONALIZE_KEY: PCWSTR =
    w!("Software\\Microsoft\\Windows\\CurrentVersion\\Themes\\Personalize");
const APPS_USE_LIGHT_THEME: PCWSTR = w!("AppsUseLightTheme");

/// 0 means dark, anything else light. A missing value is `Unknown`; headless
/// sessions often lack the key entirely.
fn to_theme(value: Option<u32>) -> Theme {
    match value {
        Some(0) => Theme::Dark,
        Some(_) => Theme::Light,
        None => Theme::Unknown,
    }
}

struct RegKey(HKEY);

impl RegKey {
    fn open_personalize(access: REG_SAM_FLAGS) -> Result<RegKey, WatchError> {
        let mut hkey = HKEY::default();
        let status =
            unsafe { RegOpenKeyExW(HKEY_CURRENT_USER, PERSONALIZE_KEY, Some(0), access, &mut hkey) };
        if status != ERROR_SUCCESS {
            return Err(WatchError::Os {
                call: "RegOpenKeyExW",
                code: status.0,
            });
        }
        Ok(RegKey(hkey))
    }

    fn read_dword(&self, name: PCWSTR) -> Option<u32> {
        let mut data: u32 = 0;
        let mut size: u32 = std::mem::size_of::<u32>() as u32;
        let status = unsafe {
            RegGetValueW(
                self.0,
                PCWSTR::null(),
                name,
                RRF_RT_REG_DWORD,
                None,
                Some((&mut data as *mut u32).cast::<c_void>()),
                Some(&mut size),
            )
        };
        (status == ERROR_SUCCESS).then_some(data)
    }
}

impl Drop for RegKey {
    fn drop(&mut self) {
        let _ = unsafe { RegCloseKey(self.0) };
    }
}

struct Event(HANDLE);

impl Event {
    fn new(manual_reset: bool) -> Result<Event, WatchError> {
        let handle = unsafe { CreateEventW(None, manual_reset, false, PCWSTR::null()) }.map_err(|err| {
            WatchError::Os {
                call: "CreateEventW",
                code: err.code().0 as u32,
            }
        })?;
        Ok(Event(handle))
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        let _ = unsafe { CloseHandle(self.0) };
    }
}

/// Raw copy of the stop event, published to `initiate_shutdown`.
struct StopHandle(HANDLE);

// SAFETY: SetEvent may be called from any thread, and the handle is only
// used while the owning `Event` is alive (see `PublishedStop`).
unsafe impl Send for StopHandle {}

/// Clears the published stop handle before the event itself is closed.
struct PublishedStop<'a>(&'a Mutex<Option<StopHandle>>);

impl<'a> PublishedStop<'a> {
    fn publish(slot: &'a Mutex<Option<StopHandle>>, event: &Event) -> PublishedStop<'a> {
        *slot.lock() = Some(StopHandle(event.0));
        PublishedStop(slot)
    }
}

impl Drop for PublishedStop<'_> {
    fn drop(&mut self) {
        self.0.lock().take();
    }
}

pub(crate) fn query_theme() -> Theme {
    match RegKey::open_personalize(KEY_READ) {
        Ok(key) => to_theme(key.read_dword(APPS_USE_LIGHT_THEME)),
        Err(err) => {
            debug!(error = %err, "personalize key unavailable");
            Theme::Unknown
        }
    }
}

/// Waits on registry change notifications for the `Personalize` key.
///
/// Each wait covers two events: the auto-reset change event armed through
/// `RegNotifyChangeKeyValue`, and a manual-reset stop event set by
/// `initiate_shutdown`. A stop therefore unblocks the loop at once, and no
/// callback is delivered after the stop event fires.
#[derive(Default)]
pub struct RegistryStrategy {
    stop_event: Mutex<Option<StopHandle>>,
}

impl RegistryStrategy {
    pub fn from_config(_config: &ListenerConfig) -> RegistryStrategy {
        RegistryStrategy::default()
    }
}

impl WatchStrategy for RegistryStrategy {
    fn watch(
        &self,
        ctx: &WatchContext<'_>,
        on_change: &mut dyn FnMut(Theme),
    ) -> Result<(), WatchError> {
        if !capability::can_listen() {
            return Err(WatchError::Unsupported);
        }
        let key = RegKey::open_personalize(KEY_READ | KEY_NOTIFY)?;
        let mut filter = ChangeFilter::seeded(to_theme(key.read_dword(APPS_USE_LIGHT_THEME)));
        let changed = Event::new(false)?;
        let stop = Event::new(true)?;
        let _published = PublishedStop::publish(&self.stop_event, &stop);
        debug!(initial = ?filter.last(), "watching personalize key");

        while ctx.is_listening() {
            let status = unsafe {
                RegNotifyChangeKeyValue(
                    key.0,
                    true,
                    REG_NOTIFY_CHANGE_LAST_SET,
                    Some(changed.0),
                    true,
                )
            };
            if status != ERROR_SUCCESS {
                return Err(WatchError::Os {
                    call: "RegNotifyChangeKeyValue",
                    code: status.0,
                });
            }

            let signaled = unsafe { WaitForMultipleObjects(&[changed.0, stop.0], false, INFINITE) };
            if signaled == WAIT_OBJECT_0 {
                if !ctx.is_listening() {
                    break;
                }
                if let Some(theme) = filter.observe(to_theme(key.read_dword(APPS_USE_LIGHT_THEME))) {
                    debug!(%theme, "theme changed");
                    on_change(theme);
                }
            } else if signaled.0 == WAIT_OBJECT_0.0 + 1 {
                break;
            } else {
                return Err(WatchError::Os {
                    call: "WaitForMultipleObjects",
                    code: unsafe { GetLastError() }.0,
                });
            }
        }
        Ok(())
    }

    fn initiate_shutdown(&self) {
        if let Some(stop) = self.stop_event.lock().as_ref() {
            if let Err(err) = unsafe { SetEvent(stop.0) } {
                warn!(error = %err, "could not signal registry watch to stop");
            }
        }
    }

    /// The watch loop releases the listener's driver lock when it exits,
    /// which is what `Listener::wait` acquires; nothing else outlives it.
    fn wait_for_shutdown(&self, _timeout: Option<Duration>) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_value_mapping() {
        assert_eq!(to_theme(Some(0)), Theme::Dark);
        assert_eq!(to_theme(Some(1)), Theme::Light);
        assert_eq!(to_theme(None), Theme::Unknown);
    }

    #[test]
    fn stop_without_session_is_harmless() {
        let strategy = RegistryStrategy::default();
        strategy.initiate_shutdown();
        assert!(strategy.stop_event.lock().is_none());
    }
}
