use std::str::FromStr;

/// The OS appearance setting.
///
/// `Unknown` means the underlying facility is absent (for example a headless
/// session without the preference key). It is never folded into `Light`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Theme {
    Dark,
    Light,
    Unknown,
}

impl Theme {
    pub fn is_dark(self) -> bool {
        self == Theme::Dark
    }

    pub fn is_light(self) -> bool {
        self == Theme::Light
    }

    pub fn is_known(self) -> bool {
        self != Theme::Unknown
    }
}

impl std::fmt::Display for Theme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Theme::Dark => write!(f, "Dark"),
            Theme::Light => write!(f, "Light"),
            Theme::Unknown => write!(f, "Unknown"),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid theme value {0:?}")]
pub struct ParseThemeError(pub String);

/**
 * Parses the string representation produced by `Display`.
 */
impl FromStr for Theme {
    type Err = ParseThemeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Dark" => Ok(Theme::Dark),
            "Light" => Ok(Theme::Light),
            "Unknown" => Ok(Theme::Unknown),
            _ => Err(ParseThemeError(value.to_string())),
        }
    }
}

/// Tracks the last delivered theme so that unchanged readings are not
/// reported twice. `Unknown` readings are ignored entirely.
#[derive(Debug, Default, Clone)]
pub struct ChangeFilter {
    last: Option<Theme>,
}

impl ChangeFilter {
    /// A filter that treats `initial` as already seen.
    pub fn seeded(initial: Theme) -> ChangeFilter {
        let mut filter = ChangeFilter::default();
        filter.observe(initial);
        filter
    }

    /// Records `reading` and returns it if it differs from the last known value.
    ///
    /// The first known reading of an unseeded filter counts as a change.
    pub fn observe(&mut self, reading: Theme) -> Option<Theme> {
        if !reading.is_known() || self.last == Some(reading) {
            return None;
        }
        self.last = Some(reading);
        Some(reading)
    }

    pub fn last(&self) -> Option<Theme> {
        self.last
    }
}
