use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;

use procstream_types::LogRecord;

/// Errors raised by a log store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage backend failed: {0}")]
    Backend(#[from] sled::Error),

    #[error("failed to encode log record: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode stored log record: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("log store unavailable: {0}")]
    Unavailable(String),
}

/// Append-only document store for log records
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Persist one record
    async fn append(&self, record: &LogRecord) -> Result<(), StoreError>;

    /// Most recent `limit` records for `source`, newest first
    async fn recent(&self, source: &str, limit: usize) -> Result<Vec<LogRecord>, StoreError>;
}

/// Records kept by [`MemoryLogStore::new`]
pub const DEFAULT_MEMORY_CAPACITY: usize = 10_000;

/// In-process store, used when no database path is configured
///
/// Holds at most `capacity` records; appending to a full store drops the
/// oldest record.
#[derive(Clone)]
pub struct MemoryLogStore {
    records: Arc<RwLock<VecDeque<LogRecord>>>,
    capacity: usize,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MEMORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Arc::new(RwLock::new(VecDeque::new())),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl Default for MemoryLogStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn append(&self, record: &LogRecord) -> Result<(), StoreError> {
        if self.capacity == 0 {
            return Err(StoreError::Unavailable("memory store has zero capacity".to_string()));
        }

        let mut records = self.records.write();
        while records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record.clone());
        Ok(())
    }

    async fn recent(&self, source: &str, limit: usize) -> Result<Vec<LogRecord>, StoreError> {
        let records = self.records.read();
        let mut matching: Vec<LogRecord> = records
            .iter()
            .filter(|r| r.source == source)
            .cloned()
            .collect();

        // Stable sort keeps insertion order for equal timestamps; reverse makes it newest first
        matching.sort_by_key(|r| r.timestamp);
        matching.reverse();
        matching.truncate(limit);
        Ok(matching)
    }
}
