//! One-shot theme queries.

use crate::theme::Theme;

/// A synchronous, side-effect free source of the current theme.
///
/// Implementations must be callable from any thread, including a watch
/// strategy's background worker.
pub trait ThemeProbe: Send + Sync {
    fn query_theme(&self) -> Theme;
}

impl<F> ThemeProbe for F
where
    F: Fn() -> Theme + Send + Sync,
{
    fn query_theme(&self) -> Theme {
        self()
    }
}

/// Reads the theme from the host OS.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemProbe;

impl ThemeProbe for SystemProbe {
    fn query_theme(&self) -> Theme {
        crate::watch::query_theme()
    }
}

/// The current OS theme, or `Theme::Unknown` when it cannot be determined.
pub fn theme() -> Theme {
    SystemProbe.query_theme()
}

pub fn is_dark() -> bool {
    theme().is_dark()
}

pub fn is_light() -> bool {
    theme().is_light()
}
