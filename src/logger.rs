//! Ingestion facade: filters by level, formats records into wire lines and
//! hands them to the log buffer.

use crate::buffer::LogBuffer;
use crate::domain::{LogLevel, LogRecord, ValidationError};
use std::error::Error;
use std::fmt::Write as _;

/// Cheap, clonable handle for emitting device log events.
#[derive(Clone)]
pub struct Logger {
    buffer: LogBuffer,
    min_level: LogLevel,
    console_echo: bool,
}

impl Logger {
    pub fn new(buffer: LogBuffer, min_level: LogLevel, console_echo: bool) -> Self {
        Self {
            buffer,
            min_level,
            console_echo,
        }
    }

    pub fn min_level(&self) -> LogLevel {
        self.min_level
    }

    pub fn is_loggable(&self, level: LogLevel) -> bool {
        level.is_loggable(self.min_level)
    }

    pub fn log(&self, level: LogLevel, tag: &str, message: &str) {
        if !self.is_loggable(level) {
            return;
        }
        self.emit(LogRecord::now(level, tag, message));
    }

    /// Logs `message` followed by the rendered error and its source chain.
    pub fn log_error(
        &self,
        level: LogLevel,
        tag: &str,
        message: &str,
        error: &(dyn Error + 'static),
    ) {
        if !self.is_loggable(level) {
            return;
        }
        let mut rendered = format!("{message}\n{error}");
        let mut source = error.source();
        while let Some(cause) = source {
            let _ = write!(rendered, "\ncaused by: {cause}");
            source = cause.source();
        }
        self.emit(LogRecord::now(level, tag, rendered));
    }

    /// Accepts a level given as its single-letter label. Unknown labels are
    /// rejected and nothing is buffered.
    pub fn submit_raw(&self, level_label: &str, tag: &str, message: &str) -> Result<(), ValidationError> {
        let level = LogLevel::from_short_label(level_label)?;
        self.log(level, tag, message);
        Ok(())
    }

    pub fn v(&self, tag: &str, message: &str) {
        self.log(LogLevel::Verbose, tag, message);
    }

    pub fn d(&self, tag: &str, message: &str) {
        self.log(LogLevel::Debug, tag, message);
    }

    pub fn i(&self, tag: &str, message: &str) {
        self.log(LogLevel::Info, tag, message);
    }

    pub fn w(&self, tag: &str, message: &str) {
        self.log(LogLevel::Warn, tag, message);
    }

    pub fn e(&self, tag: &str, message: &str) {
        self.log(LogLevel::Error, tag, message);
    }

    pub fn wtf(&self, tag: &str, message: &str) {
        self.log(LogLevel::Assert, tag, message);
    }

    fn emit(&self, record: LogRecord) {
        if self.console_echo {
            echo(&record);
        }
        self.buffer.enqueue(record.format_line());
    }
}

fn echo(record: &LogRecord) {
    let tag = record.tag.as_str();
    let message = record.message.as_str();
    match record.level {
        LogLevel::Verbose => tracing::trace!(target: "device", tag, "{message}"),
        LogLevel::Debug => tracing::debug!(target: "device", tag, "{message}"),
        LogLevel::Info => tracing::info!(target: "device", tag, "{message}"),
        LogLevel::Warn => tracing::warn!(target: "device", tag, "{message}"),
        LogLevel::Error | LogLevel::Assert => tracing::error!(target: "device", tag, "{message}"),
    }
}
