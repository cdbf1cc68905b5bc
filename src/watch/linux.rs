use std::time::Duration;

// DBus
use dbus::arg::{RefArg, Variant};
use dbus::blocking::Connection;
use dbus::{arg, Message};
use tracing::{debug, warn};

use crate::capability;
use crate::config::ListenerConfig;
use crate::error::WatchError;
use crate::listener::{WatchContext, WatchStrategy};
use crate::relay;
use crate::theme::{ChangeFilter, Theme};

const PORTAL_DESTINATION: &str = "org.freedesktop.portal.Desktop";
const PORTAL_PATH: &str = "/org/freedesktop/portal/desktop";
const SETTINGS_INTERFACE: &str = "org.freedesktop.portal.Settings";
const APPEARANCE_NAMESPACE: &str = "org.freedesktop.appearance";
const COLOR_SCHEME_KEY: &str = "color-scheme";
const DEFAULT_BUS_TIMEOUT: Duration = Duration::from_millis(5000);

struct SettingChanged {
    pub namespace: String,
    pub key: String,
    pub value: Variant<Box<dyn RefArg>>,
}

impl arg::AppendAll for SettingChanged {
    fn append(&self, i: &mut arg::IterAppend) {
        RefArg::append(&self.namespace, i);
        RefArg::append(&self.key, i);
        RefArg::append(&self.value, i);
    }
}

impl arg::ReadAll for SettingChanged {
    fn read(i: &mut arg::Iter) -> Result<Self, arg::TypeMismatchError> {
        Ok(SettingChanged {
            namespace: i.read()?,
            key: i.read()?,
            value: i.read()?,
        })
    }
}

impl dbus::message::SignalArgs for SettingChanged {
    const NAME: &'static str = "SettingChanged";
    const INTERFACE: &'static str = SETTINGS_INTERFACE;
}

impl SettingChanged {
    fn is_color_scheme(&self) -> bool {
        self.namespace == APPEARANCE_NAMESPACE && self.key == COLOR_SCHEME_KEY
    }
}

/// `color-scheme` is 0 (no preference), 1 (prefer dark) or 2 (prefer light).
fn to_theme(value: i64) -> Theme {
    match value {
        1 => Theme::Dark,
        0 | 2 => Theme::Light,
        _ => Theme::Unknown,
    }
}

fn variant_theme(value: &Variant<Box<dyn RefArg>>) -> Theme {
    // `Read` nests the value in a second variant; `as_i64` looks through both.
    value.0.as_i64().map(to_theme).unwrap_or(Theme::Unknown)
}

fn read_color_scheme(connection: &Connection, timeout: Duration) -> Result<Theme, dbus::Error> {
    let proxy = connection.with_proxy(PORTAL_DESTINATION, PORTAL_PATH, timeout);
    let (value,): (Variant<Box<dyn RefArg>>,) = proxy.method_call(
        SETTINGS_INTERFACE,
        "Read",
        (APPEARANCE_NAMESPACE, COLOR_SCHEME_KEY),
    )?;
    Ok(variant_theme(&value))
}

pub(crate) fn query_theme() -> Theme {
    let result = Connection::new_session()
        .and_then(|connection| read_color_scheme(&connection, DEFAULT_BUS_TIMEOUT));
    match result {
        Ok(theme) => theme,
        Err(err) => {
            debug!(error = %err, "desktop portal unavailable");
            Theme::Unknown
        }
    }
}

pub(crate) fn listen_supported() -> bool {
    Connection::new_session().is_ok()
}

/// Watches the XDG desktop portal's `SettingChanged` signal on the session bus.
///
/// The connection is dispatched in slices of `poll_interval`, and the
/// listening flag is checked between slices; `stop()` is therefore observed
/// within one slice without any extra wakeup.
#[derive(Debug, Clone)]
pub struct PortalStrategy {
    bus_timeout: Duration,
    dispatch_slice: Duration,
    relay_capacity: usize,
}

impl PortalStrategy {
    pub fn from_config(config: &ListenerConfig) -> PortalStrategy {
        PortalStrategy {
            bus_timeout: config.bus_timeout(),
            dispatch_slice: config.poll_interval(),
            relay_capacity: config.relay_capacity(),
        }
    }
}

impl Default for PortalStrategy {
    fn default() -> Self {
        PortalStrategy::from_config(&ListenerConfig::default())
    }
}

impl WatchStrategy for PortalStrategy {
    fn watch(
        &self,
        ctx: &WatchContext<'_>,
        on_change: &mut dyn FnMut(Theme),
    ) -> Result<(), WatchError> {
        if !capability::can_listen() {
            return Err(WatchError::Unsupported);
        }
        let connection = Connection::new_session()?;
        let initial = read_color_scheme(&connection, self.bus_timeout).unwrap_or_else(|err| {
            warn!(error = %err, "could not read initial color scheme");
            Theme::Unknown
        });
        let mut filter = ChangeFilter::seeded(initial);

        let (sender, receiver) = relay::channel(self.relay_capacity);
        let proxy = connection.with_proxy(PORTAL_DESTINATION, PORTAL_PATH, self.bus_timeout);
        let token = proxy.match_signal(
            move |signal: SettingChanged, _: &Connection, _: &Message| {
                if signal.is_color_scheme() {
                    sender.push(variant_theme(&signal.value));
                }
                true
            },
        )?;
        debug!(?initial, "listening for portal setting changes");

        while ctx.is_listening() {
            connection.process(self.dispatch_slice)?;
            for reading in receiver.pending() {
                if !ctx.is_listening() {
                    break;
                }
                if let Some(theme) = filter.observe(reading) {
                    debug!(%theme, "theme changed");
                    on_change(theme);
                }
            }
        }

        if let Err(err) = connection.remove_match(token) {
            warn!(error = %err, "could not remove portal signal match");
        }
        Ok(())
    }

    fn initiate_shutdown(&self) {}

    fn wait_for_shutdown(&self, _timeout: Option<Duration>) -> bool {
        true
    }
}
