//! Configuration file for procstream

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use procstream_logs::{DEFAULT_SUBSCRIBER_CAPACITY, ProcessCommand, ReconnectPolicy, StreamerSettings};
use procstream_sinks::{DEFAULT_MEMORY_CAPACITY, WebhookConfig};

/// Config file looked up in the working directory when none is given
const DEFAULT_CONFIG_FILE: &str = "procstream.toml";

/// Environment variable that overrides the webhook URL
const WEBHOOK_URL_ENV: &str = "PROCSTREAM_WEBHOOK_URL";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub streamer: StreamerConfig,
    pub reconnect: ReconnectPolicy,
    pub store: StoreConfig,
    pub notifier: WebhookConfig,
    pub http: HttpConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamerConfig {
    /// Start streaming at boot
    pub enabled: bool,

    /// Name of the managed process whose logs are followed
    pub process_name: String,

    pub category: String,

    /// Command that follows the logs; defaults to `pm2 logs <process_name>`
    pub command: Option<ProcessCommand>,

    /// How far a live subscriber may lag before it skips records
    pub subscriber_capacity: usize,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            process_name: "app".to_string(),
            category: "process-stream".to_string(),
            command: None,
            subscriber_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
        }
    }
}

impl StreamerConfig {
    pub fn command(&self) -> ProcessCommand {
        self.command
            .clone()
            .unwrap_or_else(|| ProcessCommand::pm2(&self.process_name))
    }

    pub fn settings(&self, reconnect: ReconnectPolicy) -> StreamerSettings {
        StreamerSettings {
            process_name: self.process_name.clone(),
            category: self.category.clone(),
            enabled: self.enabled,
            reconnect,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// sled database directory; records are kept in memory when unset
    pub path: Option<PathBuf>,

    /// Records the in-memory store keeps before dropping the oldest
    pub memory_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: SocketAddr,

    /// Upper bound for `?limit=` on the recent logs endpoint
    pub max_recent: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8787)),
            max_recent: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default tracing filter directive; `RUST_LOG` takes precedence
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Load the config from `path`, or from `procstream.toml` if it exists
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };

        if let Ok(url) = std::env::var(WEBHOOK_URL_ENV) {
            config.notifier.url = Some(url);
        }
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}
