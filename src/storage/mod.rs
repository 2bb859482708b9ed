//! Storage Module
//!
//! This module is the core of keystash: a [`Storage`] contract mapping string
//! keys to byte values with optional expiration, and the two backends that
//! implement it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    dyn Storage (façade)                     │
//! │     put · get · get_pattern · delete · delete_all · flush   │
//! └──────────────┬──────────────────────────────┬───────────────┘
//!                │                              │
//!   ┌────────────▼────────────┐    ┌────────────▼────────────┐
//!   │   FileSystemStorage     │    │     MemoryStorage       │
//!   │   one file per key      │    │  striped HashMap table  │
//!   │   LockRegistry<()>      │    │  + Checkpointer task    │
//!   └────────────┬────────────┘    └────────────┬────────────┘
//!                ▼                              ▼
//!        <dir>/<sha256(key)>             <dir>/memory.db
//! ```
//!
//! ## Features
//!
//! - **Striped Locking**: a fixed pool of mutexes serializes access per key
//! - **Lazy Expiry**: expired entries are filtered out on every read
//! - **Glob Queries**: `get_pattern` returns matching entries as JSON
//!
//! ## Example
//!
//! ```
//! use keystash::storage::{self, Provider, Storage, StorageOptions};
//! use bytes::Bytes;
//!
//! let dir = std::env::temp_dir().join("keystash-doc");
//! let storage = storage::open(Provider::Fs, &dir, &StorageOptions::default()).unwrap();
//!
//! storage.put("session", Bytes::from("token123"), None).unwrap();
//! assert_eq!(storage.get("session").unwrap(), Bytes::from("token123"));
//! # storage.delete_all().unwrap();
//! ```

pub mod entry;
pub mod error;
pub mod filesystem;
pub mod locks;
pub mod memory;
pub mod pattern;
pub mod snapshot;

// Re-export commonly used types
pub use entry::{now_nanos, Entry, NO_EXPIRATION};
pub use error::{StorageError, StorageResult};
pub use filesystem::FileSystemStorage;
pub use locks::{LockAllGuard, LockRegistry, DEFAULT_STRIPES};
pub use memory::{MemoryStorage, MemoryTable};
pub use pattern::{GlobPattern, PatternError, PatternQuery};
pub use snapshot::{Checkpointer, SnapshotFile, DEFAULT_SNAPSHOT_INTERVAL, SNAPSHOT_FILE};

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// The contract every backend implements.
///
/// All operations except `flush` are synchronous and may block on I/O.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Stores `value` under `key`, replacing any existing entry.
    ///
    /// `expiration` is relative to now; `None` never expires.
    fn put(&self, key: &str, value: Bytes, expiration: Option<Duration>) -> StorageResult<()>;

    /// Returns the value of a present, unexpired entry.
    fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Returns `[{"<key>":"<value>"},...]` for every unexpired key matching the glob.
    fn get_pattern(&self, pattern: &str) -> StorageResult<Bytes>;

    /// Removes an entry. Absent keys are `NotFound`; expired ones are removed.
    fn delete(&self, key: &str) -> StorageResult<()>;

    /// Removes every entry.
    fn delete_all(&self) -> StorageResult<()>;

    /// Backend identifier (`"fs"` or `"memory"`).
    fn kind(&self) -> &'static str;

    /// Returns true if `err` means the entry does not exist.
    fn is_not_exist(&self, err: &StorageError) -> bool {
        err.is_not_found()
    }

    /// Persists any buffered state and stops background work. Called once at shutdown.
    async fn flush(&self);
}

/// Which backend to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Provider {
    /// One file per key
    Fs,
    /// In-memory table with periodic snapshots
    Memory,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Fs => f.write_str(filesystem::KIND),
            Provider::Memory => f.write_str(memory::KIND),
        }
    }
}

/// Tuning knobs shared by the backends.
#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// Number of lock stripes (default: 64)
    pub lock_stripes: usize,

    /// Interval between memory snapshots; zero disables them (default: 15s)
    pub snapshot_interval: Duration,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            lock_stripes: DEFAULT_STRIPES,
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
        }
    }
}

/// Opens the chosen backend over `dir`.
pub fn open(
    provider: Provider,
    dir: impl AsRef<Path>,
    options: &StorageOptions,
) -> StorageResult<Arc<dyn Storage>> {
    let dir = dir.as_ref();
    let storage: Arc<dyn Storage> = match provider {
        Provider::Fs => Arc::new(FileSystemStorage::open(dir, options)?),
        Provider::Memory => Arc::new(MemoryStorage::open(dir, options)?),
    };

    info!(provider = %provider, dir = %dir.display(), "Storage opened");
    Ok(storage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// The façade contract, run against every backend.
    fn exercise(storage: &dyn Storage) {
        storage.put("a key", Bytes::from("a value"), None).unwrap();
        storage.put("another key", Bytes::from("another value"), None).unwrap();

        assert_eq!(storage.get("a key").unwrap(), Bytes::from("a value"));
        assert_eq!(
            storage.get_pattern("another*").unwrap(),
            Bytes::from(r#"[{"another key":"another value"}]"#)
        );

        let err = storage.delete("missing").unwrap_err();
        assert!(storage.is_not_exist(&err));

        storage.delete("a key").unwrap();
        assert!(storage.is_not_exist(&storage.get("a key").unwrap_err()));

        storage.delete_all().unwrap();
        assert_eq!(storage.get_pattern("*").unwrap(), Bytes::from("[]"));
    }

    #[tokio::test]
    async fn test_open_fs() {
        let tmp = TempDir::new().unwrap();
        let storage = open(Provider::Fs, tmp.path(), &StorageOptions::default()).unwrap();
        assert_eq!(storage.kind(), "fs");
        exercise(storage.as_ref());
        storage.flush().await;
    }

    #[tokio::test]
    async fn test_open_memory() {
        let tmp = TempDir::new().unwrap();
        let storage = open(Provider::Memory, tmp.path(), &StorageOptions::default()).unwrap();
        assert_eq!(storage.kind(), "memory");
        exercise(storage.as_ref());
        storage.flush().await;
        assert!(tmp.path().join(SNAPSHOT_FILE).exists());
    }

    #[test]
    fn test_default_options() {
        let options = StorageOptions::default();
        assert_eq!(options.lock_stripes, 64);
        assert_eq!(options.snapshot_interval, Duration::from_secs(15));
    }

    #[test]
    fn test_provider_display() {
        assert_eq!(Provider::Fs.to_string(), "fs");
        assert_eq!(Provider::Memory.to_string(), "memory");
    }
}
