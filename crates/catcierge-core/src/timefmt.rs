//! Wall-clock timestamps for filenames and templates.
//!
//! Formatting is strftime-like with one extension carried over from the
//! template grammar: `%f` expands to the 6-digit microsecond part, and
//! `@` / `&` may be used in place of `%` so format strings can live inside
//! `%...%` template variables. The `--base_time` replay knob shifts every
//! stamp produced by [`WallClock::now`] by a fixed offset; monotonic
//! timers are unaffected.

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Duration, Local, NaiveDateTime, Timelike};
use thiserror::Error;

/// Stamp format used in image filenames.
pub const FILENAME_TIME_FORMAT: &str = "%Y-%m-%d_%H_%M_%S.%f";

/// Default stamp format for template time variables.
pub const TEMPLATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S.%f";

#[derive(Debug, Error)]
pub enum TimeFormatError {
    #[error("invalid time formatting string \"{0}\"")]
    InvalidFormat(String),

    #[error("base time \"{0}\" is not of the form YYYY-mm-ddTHH:MM:SS")]
    InvalidBaseTime(String),
}

/// Source of human-facing timestamps, optionally shifted for replay.
#[derive(Debug, Clone, Default)]
pub struct WallClock {
    /// Subtracted from the real clock; zero in normal operation.
    base_diff: Duration,
}

impl WallClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shift the clock so that "now" at construction reads as `base`.
    pub fn with_base_time(base: &str) -> Result<Self, TimeFormatError> {
        let base = NaiveDateTime::parse_from_str(base, "%Y-%m-%dT%H:%M:%S")
            .map_err(|_| TimeFormatError::InvalidBaseTime(base.to_string()))?;
        let diff = Local::now().naive_local() - base;
        Ok(Self { base_diff: diff })
    }

    pub fn now(&self) -> DateTime<Local> {
        Local::now() - self.base_diff
    }
}

/// Replace the `@` and `&` substitution characters with `%`.
pub fn unescape_format(fmt: &str) -> String {
    fmt.chars()
        .map(|c| if c == '@' || c == '&' { '%' } else { c })
        .collect()
}

/// Format a timestamp, supporting the `%f` microsecond extension.
pub fn strftime(fmt: &str, t: &DateTime<Local>) -> Result<String, TimeFormatError> {
    // Expand %f ourselves; everything else is standard strftime.
    let micros = t.nanosecond() / 1_000;
    let mut expanded = String::with_capacity(fmt.len() + 8);
    let mut chars = fmt.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            expanded.push(c);
            continue;
        }

        match chars.peek() {
            Some('f') => {
                chars.next();
                expanded.push_str(&format!("{micros:06}"));
            }
            Some('%') => {
                chars.next();
                expanded.push_str("%%");
            }
            _ => expanded.push('%'),
        }
    }

    let items: Vec<Item> = StrftimeItems::new(&expanded).collect();
    if items.iter().any(|it| matches!(it, Item::Error)) {
        return Err(TimeFormatError::InvalidFormat(fmt.to_string()));
    }

    Ok(t.format_with_items(items.into_iter()).to_string())
}
