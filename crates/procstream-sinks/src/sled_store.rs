use async_trait::async_trait;
use std::path::Path;

use procstream_types::LogRecord;

use crate::store::{LogStore, StoreError};

/// Prefix for the per-source trees
const TREE_PREFIX: &str = "logs:";

/// sled-backed log store
///
/// Records live in one tree per source, keyed by
/// `order-preserving timestamp (8 bytes) ++ sequence id (8 bytes)`, so a
/// reverse scan of a tree yields that source's records newest first.
#[derive(Clone)]
pub struct SledLogStore {
    db: sled::Db,
}

impl SledLogStore {
    /// Open (or create) a store at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    fn tree(&self, source: &str) -> Result<sled::Tree, StoreError> {
        Ok(self.db.open_tree(format!("{TREE_PREFIX}{source}"))?)
    }

    fn key_for(&self, record: &LogRecord) -> Result<[u8; 16], StoreError> {
        // Flip the sign bit so negative timestamps sort before positive ones
        let micros = record.timestamp.timestamp_micros() as u64 ^ (1 << 63);
        let seq = self.db.generate_id()?;

        let mut key = [0u8; 16];
        key[..8].copy_from_slice(&micros.to_be_bytes());
        key[8..].copy_from_slice(&seq.to_be_bytes());
        Ok(key)
    }

    /// Flush pending writes to disk
    pub async fn flush(&self) -> Result<(), StoreError> {
        self.db.flush_async().await?;
        Ok(())
    }
}

#[async_trait]
impl LogStore for SledLogStore {
    async fn append(&self, record: &LogRecord) -> Result<(), StoreError> {
        let tree = self.tree(&record.source)?;
        let key = self.key_for(record)?;
        let value = serde_json::to_vec(record).map_err(StoreError::Encode)?;
        tree.insert(key, value)?;
        Ok(())
    }

    async fn recent(&self, source: &str, limit: usize) -> Result<Vec<LogRecord>, StoreError> {
        let tree = self.tree(source)?;

        tree.iter()
            .rev()
            .take(limit)
            .map(|item| {
                let (_, value) = item?;
                serde_json::from_slice(&value).map_err(StoreError::Decode)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use procstream_types::LogLevel;

    fn temp_store() -> SledLogStore {
        let db = sled::Config::new().temporary(true).open().unwrap();
        SledLogStore { db }
    }

    #[tokio::test]
    async fn test_recent_is_time_ordered_per_source() {
        let store = temp_store();
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

        // Insert out of order to check the key ordering rather than insertion order
        for (offset, message) in [(2, "late"), (0, "early"), (1, "middle")] {
            let mut record = LogRecord::new(LogLevel::Info, message, "api", "process-stream");
            record.timestamp = base + Duration::seconds(offset);
            store.append(&record).await.unwrap();
        }
        let other = LogRecord::new(LogLevel::Error, "unrelated", "worker", "process-stream");
        store.append(&other).await.unwrap();

        let recent = store.recent("api", 10).await.unwrap();
        let messages: Vec<_> = recent.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(messages, vec!["late", "middle", "early"]);

        let limited = store.recent("api", 1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].message, "late");
    }

    #[tokio::test]
    async fn test_unknown_source_is_empty() {
        let store = temp_store();
        assert!(store.recent("nobody", 5).await.unwrap().is_empty());
    }
}
