use super::config::{DiagnosticLevel, LogFormat};
use std::sync::OnceLock;
use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Dependency targets that are far too chatty below `warn`.
const QUIET_TARGETS: &[&str] = &["lapin", "amq_protocol", "pinky_swear", "polling", "async_io"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoggingError {
    #[error("Invalid filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },
    #[error("Failed to install tracing subscriber: {0}")]
    InitFailed(String),
}

/// Builds the `EnvFilter` directive string for the shipper's diagnostics.
pub struct LoggingSystem {
    directives: Vec<String>,
}

impl LoggingSystem {
    pub fn new() -> Self {
        Self {
            directives: QUIET_TARGETS
                .iter()
                .map(|target| format!("{target}=warn"))
                .collect(),
        }
    }

    pub fn add_directive(&mut self, directive: impl Into<String>) {
        self.directives.push(directive.into());
    }

    pub fn build_filter_string(&self, level: DiagnosticLevel) -> String {
        std::iter::once(level.as_str().to_string())
            .chain(self.directives.iter().cloned())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// `RUST_LOG`, when set, replaces the configured level entirely.
    pub fn env_filter(&self, level: DiagnosticLevel) -> Result<EnvFilter, LoggingError> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        let filter = self.build_filter_string(level);
        EnvFilter::try_new(&filter).map_err(|e| LoggingError::InvalidFilter {
            reason: e.to_string(),
            filter,
        })
    }

    pub fn initialize_tracing(
        &self,
        level: DiagnosticLevel,
        format: LogFormat,
    ) -> Result<(), LoggingError> {
        let filter = self.env_filter(level)?;
        let result = match format {
            LogFormat::Compact => tracing::subscriber::set_global_default(
                tracing_subscriber::registry().with(filter).with(
                    fmt::layer()
                        .with_target(true)
                        .with_writer(std::io::stderr)
                        .compact(),
                ),
            ),
            LogFormat::Json => tracing::subscriber::set_global_default(
                tracing_subscriber::registry().with(filter).with(
                    fmt::layer()
                        .json()
                        .with_current_span(false)
                        .with_writer(std::io::stderr),
                ),
            ),
        };
        result.map_err(|e| LoggingError::InitFailed(e.to_string()))
    }
}

impl Default for LoggingSystem {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs the global subscriber once. Later calls return the first outcome.
pub fn setup_logging_safe(level: DiagnosticLevel) -> Result<(), LoggingError> {
    setup_logging_with_format(level, LogFormat::Compact)
}

pub fn setup_logging_with_format(
    level: DiagnosticLevel,
    format: LogFormat,
) -> Result<(), LoggingError> {
    static INIT: OnceLock<Result<(), LoggingError>> = OnceLock::new();
    INIT.get_or_init(|| LoggingSystem::new().initialize_tracing(level, format))
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_pins_noisy_dependencies() {
        let filter = LoggingSystem::new().build_filter_string(DiagnosticLevel::Debug);
        assert!(filter.starts_with("debug,"));
        for target in QUIET_TARGETS {
            assert!(filter.contains(&format!("{target}=warn")), "{filter}");
        }
    }

    #[test]
    fn test_extra_directives_are_appended() {
        let mut system = LoggingSystem::new();
        system.add_directive("rask_log_shipper::pipeline=trace");
        let filter = system.build_filter_string(DiagnosticLevel::Info);
        assert!(filter.ends_with(",rask_log_shipper::pipeline=trace"));
    }

    #[test]
    fn test_setup_is_idempotent() {
        let first = setup_logging_safe(DiagnosticLevel::Info);
        let second = setup_logging_safe(DiagnosticLevel::Trace);
        assert_eq!(first, second);
    }
}
