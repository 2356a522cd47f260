use tokio::sync::broadcast;

use procstream_types::LogRecord;

/// Default number of records a slow subscriber may fall behind by
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 1024;

/// Fan-out of live log records to real-time subscribers
///
/// Delivery is best-effort: subscribers that connect later get no replay,
/// and a subscriber that lags past the channel capacity skips records.
#[derive(Clone)]
pub struct LogBroadcaster {
    sender: broadcast::Sender<LogRecord>,
}

impl LogBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Register a new subscriber
    pub fn subscribe(&self) -> broadcast::Receiver<LogRecord> {
        self.sender.subscribe()
    }

    /// Publish a record, returning how many subscribers it reached
    pub fn publish(&self, record: &LogRecord) -> usize {
        // An error only means nobody is listening right now
        self.sender.send(record.clone()).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for LogBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procstream_types::LogLevel;

    fn record(message: &str) -> LogRecord {
        LogRecord::new(LogLevel::Info, message, "api", "process-stream")
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let broadcaster = LogBroadcaster::default();
        assert_eq!(broadcaster.publish(&record("nobody home")), 0);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_all_subscribers_receive() {
        let broadcaster = LogBroadcaster::default();
        let mut a = broadcaster.subscribe();
        let mut b = broadcaster.subscribe();

        assert_eq!(broadcaster.publish(&record("hello")), 2);
        assert_eq!(a.recv().await.unwrap().message, "hello");
        assert_eq!(b.recv().await.unwrap().message, "hello");
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_no_replay() {
        let broadcaster = LogBroadcaster::default();
        let _early = broadcaster.subscribe();
        broadcaster.publish(&record("before"));

        let mut late = broadcaster.subscribe();
        broadcaster.publish(&record("after"));
        assert_eq!(late.recv().await.unwrap().message, "after");
    }
}
