use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;

use procstream_types::{LogLevel, LogRecord, META_PROCESS_NAME, META_STREAM};

// Chat embed limits
const TITLE_LIMIT: usize = 256;
const DESCRIPTION_LIMIT: usize = 4096;
const FIELD_VALUE_LIMIT: usize = 1024;

/// Errors raised while delivering a notification
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification channel is not configured")]
    NotConfigured,

    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webhook rejected the payload with status {0}")]
    Rejected(u16),
}

/// A single name/value pair shown in a notification
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NotificationField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

impl NotificationField {
    pub fn new(name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            inline,
        }
    }
}

/// Structured alert payload
#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    pub title: String,
    pub description: String,
    /// RGB colour derived from severity
    pub color: u32,
    pub fields: Vec<NotificationField>,
    /// Ping the configured role when delivered
    pub mention: bool,
    pub timestamp: DateTime<Utc>,
    pub footer: Option<String>,
}

impl Notification {
    /// Build the alert for an error/critical log record
    pub fn from_record(record: &LogRecord) -> Self {
        let process = record
            .metadata
            .get(META_PROCESS_NAME)
            .and_then(|v| v.as_str())
            .unwrap_or(&record.source);

        let mut fields = vec![
            NotificationField::new("Level", record.level.as_str().to_uppercase(), true),
            NotificationField::new("Process", process, true),
        ];
        if let Some(stream) = record.metadata.get(META_STREAM).and_then(|v| v.as_str()) {
            fields.push(NotificationField::new("Stream", stream, true));
        }
        if let Some(original) = record.original_line() {
            if original.trim() != record.message {
                fields.push(NotificationField::new(
                    "Original line",
                    format!("```{}```", original),
                    false,
                ));
            }
        }

        Self {
            title: format!("{} in {}", level_title(record.level), process),
            description: record.message.clone(),
            color: level_color(record.level),
            fields,
            mention: record.level == LogLevel::Critical,
            timestamp: record.timestamp,
            footer: Some(record.category.clone()),
        }
    }
}

fn level_title(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Critical => "Critical error",
        LogLevel::Error => "Error",
        LogLevel::Warning => "Warning",
        LogLevel::Info => "Notice",
    }
}

/// Embed colour for a severity
fn level_color(level: LogLevel) -> u32 {
    match level {
        LogLevel::Critical => 0x8B0000,
        LogLevel::Error => 0xE74C3C,
        LogLevel::Warning => 0xF39C12,
        LogLevel::Info => 0x3498DB,
    }
}

/// Outbound notification channel
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Whether deliveries should be attempted at all
    fn is_configured(&self) -> bool;

    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Notifier used when no channel is configured
#[derive(Clone, Copy, Debug, Default)]
pub struct DisabledNotifier;

#[async_trait]
impl Notifier for DisabledNotifier {
    fn is_configured(&self) -> bool {
        false
    }

    async fn notify(&self, _notification: &Notification) -> Result<(), NotifyError> {
        Err(NotifyError::NotConfigured)
    }
}

/// Chat webhook settings
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Webhook URL; notifications are skipped when unset or empty
    pub url: Option<String>,

    /// Role pinged on critical records
    pub mention_role_id: Option<String>,

    /// Display name for the posting bot
    pub username: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: Option<u64>,
}

/// Posts notifications as chat embeds to a webhook
pub struct WebhookNotifier {
    client: reqwest::Client,
    config: WebhookConfig,
}

impl WebhookNotifier {
    pub fn new(config: WebhookConfig) -> Result<Self, NotifyError> {
        let timeout = Duration::from_secs(config.timeout_secs.unwrap_or(10));
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, config })
    }

    fn url(&self) -> Option<&str> {
        self.config
            .url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
    }

    fn mention_role(&self) -> Option<&str> {
        self.config
            .mention_role_id
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
    }

    /// Render the JSON body sent to the webhook
    pub fn payload(&self, notification: &Notification) -> Value {
        let fields: Vec<Value> = notification
            .fields
            .iter()
            .map(|f| {
                json!({
                    "name": truncate(&f.name, TITLE_LIMIT),
                    "value": truncate(&f.value, FIELD_VALUE_LIMIT),
                    "inline": f.inline,
                })
            })
            .collect();

        let mut embed = json!({
            "title": truncate(&notification.title, TITLE_LIMIT),
            "description": truncate(&notification.description, DESCRIPTION_LIMIT),
            "color": notification.color,
            "fields": fields,
            "timestamp": notification.timestamp.to_rfc3339(),
        });
        if let Some(footer) = &notification.footer {
            embed["footer"] = json!({ "text": footer });
        }

        let mut body = json!({ "embeds": [embed] });
        if let Some(username) = &self.config.username {
            body["username"] = json!(username);
        }
        if notification.mention {
            if let Some(role) = self.mention_role() {
                body["content"] = json!(format!("<@&{}>", role));
            }
        }
        body
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn is_configured(&self) -> bool {
        self.url().is_some()
    }

    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let url = self.url().ok_or(NotifyError::NotConfigured)?;
        let response = self
            .client
            .post(url)
            .json(&self.payload(notification))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Rejected(status.as_u16()));
        }
        tracing::debug!(title = %notification.title, "notification delivered");
        Ok(())
    }
}

/// Cut `text` to at most `limit` characters, marking the cut with an ellipsis
fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(limit.saturating_sub(3)).collect();
    out.push_str("...");
    out
}
