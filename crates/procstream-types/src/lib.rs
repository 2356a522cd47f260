//! Shared types for procstream
//!
//! This crate contains data structures used across multiple procstream crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// Log Types
// ============================================================================

/// Metadata key holding the monitored process identifier
pub const META_PROCESS_NAME: &str = "processName";

/// Metadata key holding the verbatim input line
pub const META_ORIGINAL_LINE: &str = "originalLine";

/// Metadata key holding the output stream the line arrived on
pub const META_STREAM: &str = "stream";

/// Log severity level
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// Map a bracketed level token to a level.
    ///
    /// `warn` folds into `Warning` and `debug` into `Info`.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "info" | "debug" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warning),
            "error" => Some(Self::Error),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    /// Whether records at this level are forwarded to the notification channel
    pub fn is_alerting(&self) -> bool {
        matches!(self, Self::Error | Self::Critical)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output stream of the attached process
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    /// Level a line starts from before any token or keyword is considered
    pub fn default_level(&self) -> LogLevel {
        match self {
            Self::Stdout => LogLevel::Info,
            Self::Stderr => LogLevel::Error,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// A single structured log record produced from one process output line
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    /// When the line was written (from its prefix) or observed
    pub timestamp: DateTime<Utc>,

    pub level: LogLevel,

    /// Line text with timestamp prefix and level token stripped
    pub message: String,

    /// Identifier of the monitored process
    pub source: String,

    /// Tag identifying the ingestion path
    pub category: String,

    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl LogRecord {
    /// Create a record stamped with the current time and empty metadata
    pub fn new(
        level: LogLevel,
        message: impl Into<String>,
        source: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            source: source.into(),
            category: category.into(),
            metadata: HashMap::new(),
        }
    }

    /// The verbatim line this record was parsed from, if any
    pub fn original_line(&self) -> Option<&str> {
        self.metadata
            .get(META_ORIGINAL_LINE)
            .and_then(|v| v.as_str())
    }
}

// ============================================================================
// Streamer Types
// ============================================================================

/// Lifecycle phase of the log streamer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamerPhase {
    /// Operator has switched streaming off
    Disabled,
    /// Enabled but not attached
    Idle,
    /// Consuming output from a live attachment
    Attached,
    /// Attachment ended, waiting for the backoff timer
    Reconnecting,
    /// Retries exhausted; needs an explicit start
    Stopped,
}

impl StreamerPhase {
    /// Whether the streamer is logically streaming in this phase
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Attached | Self::Reconnecting)
    }
}

/// Read-only snapshot of the streamer state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamerStatus {
    pub enabled: bool,
    pub streaming: bool,
    pub reconnect_attempts: u32,
    pub phase: StreamerPhase,
}
