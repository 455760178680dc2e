use super::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Device log severity, ordered by priority.
///
/// This is distinct from `DiagnosticLevel` (used for configuring the shipper's
/// own tracing output). `LogLevel` is the level of the events being shipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Verbose,
    Debug,
    Info,
    Warn,
    Error,
    Assert,
}

impl LogLevel {
    pub const ALL: [LogLevel; 6] = [
        LogLevel::Verbose,
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warn,
        LogLevel::Error,
        LogLevel::Assert,
    ];

    /// Numeric priority; higher is more severe.
    pub const fn priority(self) -> u8 {
        match self {
            LogLevel::Verbose => 2,
            LogLevel::Debug => 3,
            LogLevel::Info => 4,
            LogLevel::Warn => 5,
            LogLevel::Error => 6,
            LogLevel::Assert => 7,
        }
    }

    /// Single-letter label used in the wire line, e.g. `[W]`.
    pub const fn short_label(self) -> &'static str {
        match self {
            LogLevel::Verbose => "V",
            LogLevel::Debug => "D",
            LogLevel::Info => "I",
            LogLevel::Warn => "W",
            LogLevel::Error => "E",
            LogLevel::Assert => "A",
        }
    }

    pub fn from_short_label(label: &str) -> Result<Self, ValidationError> {
        Self::ALL
            .into_iter()
            .find(|level| level.short_label() == label)
            .ok_or_else(|| ValidationError::UnsupportedLevel(label.to_string()))
    }

    pub fn from_priority(priority: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|level| level.priority() == priority)
    }

    pub fn is_supported(label: &str) -> bool {
        Self::from_short_label(label).is_ok()
    }

    /// Whether a record at `self` passes a minimum-level filter.
    pub fn is_loggable(self, minimum: LogLevel) -> bool {
        self.priority() >= minimum.priority()
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            LogLevel::Verbose => "verbose",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Assert => "assert",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts long names (case-insensitive) as well as the single-letter labels,
/// so both `--min-log-level warn` and `--min-log-level W` work.
impl FromStr for LogLevel {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "verbose" | "v" => Ok(LogLevel::Verbose),
            "debug" | "d" => Ok(LogLevel::Debug),
            "info" | "i" => Ok(LogLevel::Info),
            "warn" | "warning" | "w" => Ok(LogLevel::Warn),
            "error" | "e" => Ok(LogLevel::Error),
            "assert" | "wtf" | "a" => Ok(LogLevel::Assert),
            _ => Err(ValidationError::UnsupportedLevel(s.to_string())),
        }
    }
}
