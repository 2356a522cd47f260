//! Log store and notification channels for procstream
//!
//! This crate provides the persistence and outbound-alert collaborators the
//! streamer fans records out to.

mod notifier;
mod sled_store;
mod store;

pub use notifier::{
    DisabledNotifier, Notification, NotificationField, Notifier, NotifyError, WebhookConfig,
    WebhookNotifier,
};
pub use sled_store::SledLogStore;
pub use store::{DEFAULT_MEMORY_CAPACITY, LogStore, MemoryLogStore, StoreError};

// Re-export types used in our public API
pub use procstream_types::{LogLevel, LogRecord};
