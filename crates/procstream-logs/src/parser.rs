use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

use procstream_types::{
    LogLevel, LogRecord, META_ORIGINAL_LINE, META_PROCESS_NAME, META_STREAM, StreamKind,
};

/// Leading `YYYY-MM-DD HH:MM:SS:` prefix
static TIMESTAMP_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}):\s*").expect("valid timestamp regex")
});

/// Leading bracketed level token, e.g. `[WARN]`
static LEVEL_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\[(info|warn|warning|error|critical|debug)\]\s*")
        .expect("valid level token regex")
});

/// Keyword inference, checked in order; first match wins
static KEYWORD_LEVELS: LazyLock<[(Regex, LogLevel); 3]> = LazyLock::new(|| {
    [
        (
            Regex::new(r"(?i)critical|fatal").expect("valid keyword regex"),
            LogLevel::Critical,
        ),
        (
            Regex::new(r"(?i)error|exception|fail").expect("valid keyword regex"),
            LogLevel::Error,
        ),
        (
            Regex::new(r"(?i)warn").expect("valid keyword regex"),
            LogLevel::Warning,
        ),
    ]
});

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Log parser for turning raw process output into log records
pub struct LogParser;

impl LogParser {
    /// Parse a raw output line into a LogRecord
    ///
    /// Returns `None` for blank lines.
    pub fn parse(raw: &str, stream: StreamKind, source: &str, category: &str) -> Option<LogRecord> {
        if raw.trim().is_empty() {
            return None;
        }

        let (timestamp, rest) = Self::extract_timestamp(raw);
        let (explicit, rest) = Self::extract_level_token(rest);

        let level = match explicit {
            Some(level) => level,
            None => {
                let initial = stream.default_level();
                // Keyword inference only refines lines still sitting at the default info level
                if initial == LogLevel::Info {
                    Self::infer_level(rest).unwrap_or(initial)
                } else {
                    initial
                }
            }
        };

        let mut message = rest.trim();
        if message.is_empty() {
            message = raw.trim();
        }

        let mut metadata = HashMap::new();
        metadata.insert(
            META_PROCESS_NAME.to_string(),
            Value::String(source.to_string()),
        );
        metadata.insert(
            META_ORIGINAL_LINE.to_string(),
            Value::String(raw.to_string()),
        );
        metadata.insert(
            META_STREAM.to_string(),
            Value::String(stream.as_str().to_string()),
        );

        Some(LogRecord {
            timestamp: timestamp.unwrap_or_else(Utc::now),
            level,
            message: message.to_string(),
            source: source.to_string(),
            category: category.to_string(),
            metadata,
        })
    }

    /// Strip a leading timestamp prefix, interpreting it as UTC
    fn extract_timestamp(raw: &str) -> (Option<DateTime<Utc>>, &str) {
        if let Some(caps) = TIMESTAMP_PREFIX.captures(raw) {
            if let Ok(naive) = NaiveDateTime::parse_from_str(&caps[1], TIMESTAMP_FORMAT) {
                let end = caps.get(0).map_or(0, |m| m.end());
                return (Some(naive.and_utc()), &raw[end..]);
            }
        }
        (None, raw)
    }

    /// Strip a leading bracketed level token
    fn extract_level_token(content: &str) -> (Option<LogLevel>, &str) {
        let trimmed = content.trim_start();
        if let Some(caps) = LEVEL_TOKEN.captures(trimmed) {
            let end = caps.get(0).map_or(0, |m| m.end());
            return (LogLevel::from_token(&caps[1]), &trimmed[end..]);
        }
        (None, content)
    }

    /// Infer a level from keywords in the message
    fn infer_level(content: &str) -> Option<LogLevel> {
        KEYWORD_LEVELS
            .iter()
            .find(|(pattern, _)| pattern.is_match(content))
            .map(|(_, level)| *level)
    }
}
