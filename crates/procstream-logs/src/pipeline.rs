use std::sync::Arc;
use tokio_util::task::TaskTracker;

use procstream_sinks::{LogStore, Notification, Notifier};
use procstream_types::LogRecord;

use crate::broadcast::LogBroadcaster;

/// Fans each record out to the store, live subscribers and the notifier
///
/// Every leg is independent: a failing store does not stop the publish or
/// the alert, and nothing here returns an error to the caller.
#[derive(Clone)]
pub struct LogPipeline {
    store: Arc<dyn LogStore>,
    notifier: Arc<dyn Notifier>,
    broadcaster: LogBroadcaster,
    /// In-flight notification deliveries
    deliveries: TaskTracker,
}

impl LogPipeline {
    pub fn new(
        store: Arc<dyn LogStore>,
        notifier: Arc<dyn Notifier>,
        broadcaster: LogBroadcaster,
    ) -> Self {
        Self {
            store,
            notifier,
            broadcaster,
            deliveries: TaskTracker::new(),
        }
    }

    /// Persist, publish and (for error/critical records) alert
    pub async fn process(&self, record: LogRecord) {
        if let Err(e) = self.store.append(&record).await {
            tracing::warn!(error = %e, source = %record.source, "failed to persist log record");
        }

        let reached = self.broadcaster.publish(&record);
        tracing::trace!(subscribers = reached, level = %record.level, "log record published");

        if record.level.is_alerting() && self.notifier.is_configured() {
            self.spawn_notification(Notification::from_record(&record));
        }
    }

    fn spawn_notification(&self, notification: Notification) {
        let notifier = Arc::clone(&self.notifier);
        self.deliveries.spawn(async move {
            if let Err(e) = notifier.notify(&notification).await {
                tracing::warn!(error = %e, title = %notification.title, "failed to deliver notification");
            }
        });
    }

    /// Wait for in-flight notifications to finish
    pub async fn drain(&self) {
        self.deliveries.close();
        self.deliveries.wait().await;
        self.deliveries.reopen();
    }

    pub fn store(&self) -> &Arc<dyn LogStore> {
        &self.store
    }

    pub fn broadcaster(&self) -> &LogBroadcaster {
        &self.broadcaster
    }
}
