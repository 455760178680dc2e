use super::log_level::LogLevel;
use chrono::{DateTime, FixedOffset, Local};
use serde::{Deserialize, Serialize};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A single device log event.
///
/// Records are immutable once created; the pipeline only ever sees the
/// rendered wire line produced by [`LogRecord::format_line`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: DateTime<FixedOffset>,
    /// Timezone label rendered after the timestamp.
    pub zone: String,
    pub level: LogLevel,
    pub tag: String,
    pub message: String,
}

impl LogRecord {
    /// Record stamped with the current local wall-clock time.
    pub fn now(level: LogLevel, tag: impl Into<String>, message: impl Into<String>) -> Self {
        let local = Local::now();
        let timestamp = local.fixed_offset();
        Self {
            zone: zone_label(&timestamp),
            timestamp,
            level,
            tag: tag.into(),
            message: message.into(),
        }
    }

    pub fn with_timestamp(
        timestamp: DateTime<FixedOffset>,
        level: LogLevel,
        tag: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            zone: zone_label(&timestamp),
            timestamp,
            level,
            tag: tag.into(),
            message: message.into(),
        }
    }

    /// `YYYY-MM-DD HH:MM:SS <zone> [<L>] <tag>: <message>`
    pub fn format_line(&self) -> String {
        format!(
            "{} {} [{}] {}: {}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.zone,
            self.level.short_label(),
            self.tag,
            self.message
        )
    }
}

/// `UTC` for a zero offset, otherwise `GMT+hh:mm` / `GMT-hh:mm`.
fn zone_label(timestamp: &DateTime<FixedOffset>) -> String {
    let seconds = timestamp.offset().local_minus_utc();
    if seconds == 0 {
        return "UTC".to_string();
    }
    let sign = if seconds < 0 { '-' } else { '+' };
    let seconds = seconds.unsigned_abs();
    format!("GMT{}{:02}:{:02}", sign, seconds / 3600, (seconds % 3600) / 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed(offset_secs: i32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(offset_secs)
            .unwrap()
            .with_ymd_and_hms(2024, 3, 9, 14, 5, 7)
            .unwrap()
    }

    #[test]
    fn test_format_line_layout() {
        let record = LogRecord::with_timestamp(fixed(0), LogLevel::Warn, "Net", "socket closed");
        assert_eq!(
            record.format_line(),
            "2024-03-09 14:05:07 UTC [W] Net: socket closed"
        );
    }

    #[test]
    fn test_zone_label_for_offsets() {
        let east = LogRecord::with_timestamp(fixed(7 * 3600), LogLevel::Info, "t", "m");
        assert_eq!(east.zone, "GMT+07:00");

        let west = LogRecord::with_timestamp(fixed(-(3 * 3600 + 1800)), LogLevel::Info, "t", "m");
        assert_eq!(west.zone, "GMT-03:30");
    }

    #[test]
    fn test_multiline_message_is_kept_verbatim() {
        let record = LogRecord::with_timestamp(
            fixed(0),
            LogLevel::Error,
            "Main",
            "boom\ncaused by: disk full",
        );
        assert!(record.format_line().ends_with("[E] Main: boom\ncaused by: disk full"));
    }
}
