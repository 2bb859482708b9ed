//! In-memory Storage Backend
//!
//! Entries live in a process-resident table split across the stripes of a
//! [`LockRegistry`], so each stripe's mutex guards exactly the keys hashed to
//! it. The table is the source of truth while the process runs; the snapshot
//! file only exists for recovery across restarts.
//!
//! ```text
//!   put/get/delete ──> lock(key) ──> stripe HashMap
//!
//!   get_pattern / delete_all / checkpoint ──> lock_all() ──> every stripe
//!                                                   │
//!                          Checkpointer (every N s) ┘──> memory.db
//! ```
//!
//! A successful `put` means the value is visible to later reads, not that it
//! has reached disk. Anything written after the last checkpoint is lost on a
//! crash.

use crate::storage::pattern::{self, PatternQuery};
use crate::storage::snapshot::{self, Checkpointer, SnapshotFile};
use crate::storage::{Entry, LockRegistry, Storage, StorageError, StorageOptions, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Identifier reported by [`Storage::kind`].
pub const KIND: &str = "memory";

/// The striped table plus the snapshot it checkpoints to.
#[derive(Debug)]
pub struct MemoryTable {
    shards: LockRegistry<HashMap<String, Entry>>,
    snapshot: SnapshotFile,
    /// Orders snapshot writes so an older table state never lands last
    writer: Mutex<()>,
}

impl MemoryTable {
    /// Loads the snapshot in `dir` (if any) into a table of `stripes` shards.
    pub fn open(dir: impl Into<PathBuf>, stripes: usize) -> StorageResult<Self> {
        let snapshot = SnapshotFile::new(dir);
        let loaded = snapshot.load()?;

        let table = Self {
            shards: LockRegistry::new(stripes),
            snapshot,
            writer: Mutex::new(()),
        };

        let count = loaded.len();
        for (key, mut entry) in loaded {
            // The map key is authoritative
            entry.key = key;
            table.put(entry);
        }
        debug!(entries = count, "Snapshot loaded");

        Ok(table)
    }

    /// Inserts or replaces an entry.
    pub fn put(&self, entry: Entry) {
        let mut shard = self.shards.lock(&entry.key);
        shard.insert(entry.key.clone(), entry);
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.shards.lock_all().stripes().iter().map(|s| s.len()).sum()
    }

    /// Returns true if the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes the whole table to the snapshot file, returning the entry count.
    ///
    /// The table is only locked while it is encoded; the file write happens
    /// after the stripes are released.
    pub fn checkpoint(&self) -> StorageResult<usize> {
        let _writer = self.writer.lock();

        let (data, count) = {
            let all = self.shards.lock_all();
            let count = all.stripes().iter().map(|s| s.len()).sum();
            let data = SnapshotFile::encode(all.stripes().iter().flat_map(|s| s.values()))?;
            (data, count)
        };

        self.snapshot.write(&data)?;
        Ok(count)
    }
}

/// Backend keeping every entry in memory with periodic snapshots.
#[derive(Debug)]
pub struct MemoryStorage {
    table: Arc<MemoryTable>,
    checkpointer: Mutex<Option<Checkpointer>>,
}

impl MemoryStorage {
    /// Opens the store in `dir`, restoring its last snapshot.
    ///
    /// Periodic checkpoints run when called inside a Tokio runtime and the
    /// snapshot interval is non-zero; otherwise only `flush` writes snapshots.
    pub fn open(dir: impl Into<PathBuf>, options: &StorageOptions) -> StorageResult<Self> {
        let table = Arc::new(MemoryTable::open(dir, options.lock_stripes)?);

        let checkpointer = if options.snapshot_interval.is_zero() {
            debug!("Periodic snapshots disabled");
            None
        } else if tokio::runtime::Handle::try_current().is_err() {
            warn!("No Tokio runtime, periodic snapshots disabled");
            None
        } else {
            Some(Checkpointer::start(
                Arc::clone(&table),
                options.snapshot_interval,
            ))
        };

        Ok(Self {
            table,
            checkpointer: Mutex::new(checkpointer),
        })
    }

    /// The underlying table.
    pub fn table(&self) -> &Arc<MemoryTable> {
        &self.table
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    fn put(&self, key: &str, value: Bytes, expiration: Option<Duration>) -> StorageResult<()> {
        let entry = Entry::new(key, value, expiration);
        trace!(key = %key, expiration = entry.expiration, "Entry stored");
        self.table.put(entry);
        Ok(())
    }

    fn get(&self, key: &str) -> StorageResult<Bytes> {
        let shard = self.table.shards.lock(key);
        match shard.get(key) {
            Some(entry) if !entry.is_expired() => Ok(entry.value.clone()),
            _ => Err(StorageError::NotFound),
        }
    }

    fn get_pattern(&self, pattern: &str) -> StorageResult<Bytes> {
        let query = PatternQuery::new(pattern);
        let all = self.table.shards.lock_all();

        pattern::render(
            all.stripes()
                .iter()
                .flat_map(|s| s.values())
                .filter(|entry| query.selects(entry)),
        )
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        let mut shard = self.table.shards.lock(key);
        shard
            .remove(key)
            .map(|_| ())
            .ok_or(StorageError::NotFound)
    }

    fn delete_all(&self) -> StorageResult<()> {
        let mut all = self.table.shards.lock_all();
        let mut removed = 0usize;
        for shard in all.stripes_mut() {
            removed += shard.len();
            shard.clear();
        }

        debug!(removed = removed, "All entries deleted");
        Ok(())
    }

    fn kind(&self) -> &'static str {
        KIND
    }

    async fn flush(&self) {
        let checkpointer = self.checkpointer.lock().take();
        if let Some(checkpointer) = checkpointer {
            checkpointer.stop().await;
        }

        if let Ok(entries) = snapshot::checkpoint(Arc::clone(&self.table)).await {
            info!(entries = entries, "Final snapshot written");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::thread;
    use tempfile::TempDir;

    fn options() -> StorageOptions {
        StorageOptions {
            snapshot_interval: Duration::from_millis(20),
            ..StorageOptions::default()
        }
    }

    #[test]
    fn test_open_without_runtime() {
        let tmp = TempDir::new().unwrap();
        let storage = MemoryStorage::open(tmp.path(), &options()).unwrap();
        assert!(storage.checkpointer.lock().is_none());

        storage.put("k", Bytes::from("v"), None).unwrap();
        assert_eq!(storage.get("k").unwrap(), Bytes::from("v"));
    }

    #[tokio::test]
    async fn test_kind_and_not_exist() {
        let tmp = TempDir::new().unwrap();
        let storage = MemoryStorage::open(tmp.path(), &options()).unwrap();

        assert_eq!(storage.kind(), "memory");
        assert!(storage.is_not_exist(&StorageError::NotFound));
        let other = StorageError::io("x", std::io::Error::other("some error"));
        assert!(!storage.is_not_exist(&other));
        storage.flush().await;
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let tmp = TempDir::new().unwrap();
        let storage = MemoryStorage::open(tmp.path(), &options()).unwrap();

        assert!(storage.get("a key").unwrap_err().is_not_found());
        assert!(storage.delete("a key").unwrap_err().is_not_found());

        storage.put("a key", Bytes::from("a value"), None).unwrap();
        storage.put("a key", Bytes::from("a new value"), None).unwrap();
        assert_eq!(storage.get("a key").unwrap(), Bytes::from("a new value"));

        storage.delete("a key").unwrap();
        assert!(storage.get("a key").unwrap_err().is_not_found());
        storage.flush().await;
    }

    #[tokio::test]
    async fn test_put_with_expiration() {
        let tmp = TempDir::new().unwrap();
        let storage = MemoryStorage::open(tmp.path(), &options()).unwrap();

        storage
            .put("a key", Bytes::from("a value"), Some(Duration::from_millis(50)))
            .unwrap();
        assert_eq!(storage.get("a key").unwrap(), Bytes::from("a value"));

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(storage.get("a key").unwrap_err().is_not_found());
        assert_eq!(storage.get_pattern("*").unwrap(), Bytes::from("[]"));

        // Still stored until deleted, and deleting it succeeds
        assert_eq!(storage.table().len(), 1);
        storage.delete("a key").unwrap();
        assert!(storage.table().is_empty());
        storage.flush().await;
    }

    #[tokio::test]
    async fn test_get_pattern() {
        let tmp = TempDir::new().unwrap();
        let storage = MemoryStorage::open(tmp.path(), &options()).unwrap();

        assert_eq!(storage.get_pattern("*").unwrap(), Bytes::from("[]"));
        assert_eq!(storage.get_pattern("a*glob?").unwrap(), Bytes::from("[]"));

        storage.put("a key", Bytes::from("a value"), None).unwrap();
        storage.put("another key", Bytes::from("another value"), None).unwrap();

        assert_eq!(
            storage.get_pattern("another*").unwrap(),
            Bytes::from(r#"[{"another key":"another value"}]"#)
        );
        assert_eq!(storage.get_pattern("another[").unwrap(), Bytes::from("[]"));
        storage.flush().await;
    }

    #[tokio::test]
    async fn test_delete_all() {
        let tmp = TempDir::new().unwrap();
        let storage = MemoryStorage::open(tmp.path(), &options()).unwrap();

        storage.delete_all().unwrap();
        storage.put("a key", Bytes::from("a value"), None).unwrap();
        storage.put("another key", Bytes::from("another value"), None).unwrap();

        storage.delete_all().unwrap();
        assert!(storage.get("a key").unwrap_err().is_not_found());
        assert!(storage.get("another key").unwrap_err().is_not_found());
        assert!(storage.table().is_empty());
        storage.flush().await;
    }

    #[tokio::test]
    async fn test_recovers_after_flush() {
        let tmp = TempDir::new().unwrap();
        {
            let storage = MemoryStorage::open(tmp.path(), &StorageOptions::default()).unwrap();
            storage.put("a key", Bytes::from("a value"), None).unwrap();
            storage
                .put("binary", Bytes::from_static(&[0, 159, 146, 150]), None)
                .unwrap();
            storage.flush().await;
        }

        let storage = MemoryStorage::open(tmp.path(), &StorageOptions::default()).unwrap();
        assert_eq!(storage.get("a key").unwrap(), Bytes::from("a value"));
        assert_eq!(
            storage.get("binary").unwrap(),
            Bytes::from_static(&[0, 159, 146, 150])
        );
        storage.flush().await;
    }

    #[tokio::test]
    async fn test_expired_entries_stay_expired_after_reload() {
        let tmp = TempDir::new().unwrap();
        {
            let storage = MemoryStorage::open(tmp.path(), &options()).unwrap();
            storage
                .put("short", Bytes::from("v"), Some(Duration::from_millis(10)))
                .unwrap();
            storage.flush().await;
        }

        tokio::time::sleep(Duration::from_millis(30)).await;
        let storage = MemoryStorage::open(tmp.path(), &options()).unwrap();
        assert!(storage.get("short").unwrap_err().is_not_found());
        storage.flush().await;
    }

    #[tokio::test]
    async fn test_periodic_checkpoint() {
        let tmp = TempDir::new().unwrap();
        let storage = MemoryStorage::open(tmp.path(), &options()).unwrap();
        storage.put("k", Bytes::from("v"), None).unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;

        // Written by the background task, without any flush
        let loaded = SnapshotFile::new(tmp.path()).load().unwrap();
        assert_eq!(loaded["k"].value, Bytes::from("v"));
        storage.flush().await;
    }

    #[tokio::test]
    async fn test_no_checkpoints_after_flush() {
        let tmp = TempDir::new().unwrap();
        let storage = MemoryStorage::open(tmp.path(), &options()).unwrap();
        storage.put("before", Bytes::from("v"), None).unwrap();
        storage.flush().await;

        storage.put("after", Bytes::from("v"), None).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let loaded = SnapshotFile::new(tmp.path()).load().unwrap();
        assert!(loaded.contains_key("before"));
        assert!(!loaded.contains_key("after"));
    }

    #[test]
    fn test_corrupt_snapshot_fails_open() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(snapshot::SNAPSHOT_FILE), b"not json").unwrap();

        let err = MemoryStorage::open(tmp.path(), &options()).unwrap_err();
        assert!(matches!(err, StorageError::Decode(_)));
    }

    #[test]
    fn test_concurrent_puts_on_distinct_keys() {
        let tmp = TempDir::new().unwrap();
        let storage = Arc::new(MemoryStorage::open(tmp.path(), &options()).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let storage = Arc::clone(&storage);
                thread::spawn(move || {
                    for j in 0..100 {
                        let key = format!("key-{}-{}", i, j);
                        storage.put(&key, Bytes::from("value"), None).unwrap();
                        assert_eq!(storage.get(&key).unwrap(), Bytes::from("value"));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(storage.table().len(), 800);
    }
}
