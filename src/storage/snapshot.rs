//! Snapshot File and Background Checkpointer
//!
//! The memory backend keeps one snapshot file, `memory.db`, holding the whole
//! table as a JSON object from key to encoded entry. It is replaced, never
//! appended:
//!
//! ```text
//!   memory.db.tmp  ──write──> sync_all ──rename──> memory.db ──> fsync(dir)
//! ```
//!
//! A reader therefore sees either the previous snapshot or the new one, never
//! a torn mix.
//!
//! The [`Checkpointer`] is a Tokio task that writes a snapshot on a fixed
//! interval until it is stopped. Each write runs on the blocking pool since it
//! does file I/O.

use crate::storage::filesystem::ensure_dir;
use crate::storage::memory::MemoryTable;
use crate::storage::{Entry, StorageError, StorageResult};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Name of the snapshot file inside the storage directory.
pub const SNAPSHOT_FILE: &str = "memory.db";

/// Default interval between periodic checkpoints.
pub const DEFAULT_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(15);

const SNAPSHOT_TEMP: &str = "memory.db.tmp";

/// Location of a snapshot and the operations on it.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    dir: PathBuf,
}

impl SnapshotFile {
    /// Snapshot stored in `dir`. Nothing is touched until `load` or `write`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the live snapshot.
    pub fn path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }

    /// Reads the snapshot. A missing or empty file is an empty table.
    pub fn load(&self) -> StorageResult<HashMap<String, Entry>> {
        ensure_dir(&self.dir)?;

        let path = self.path();
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(StorageError::io(path, e)),
        };
        if data.is_empty() {
            return Ok(HashMap::new());
        }

        serde_json::from_slice(&data).map_err(StorageError::Decode)
    }

    /// Serializes entries into the snapshot layout.
    pub fn encode<'a>(entries: impl IntoIterator<Item = &'a Entry>) -> StorageResult<Vec<u8>> {
        let table: BTreeMap<&str, &Entry> = entries
            .into_iter()
            .map(|entry| (entry.key.as_str(), entry))
            .collect();
        serde_json::to_vec(&table).map_err(StorageError::Encode)
    }

    /// Atomically replaces the snapshot with `data`.
    pub fn write(&self, data: &[u8]) -> StorageResult<()> {
        ensure_dir(&self.dir)?;

        let temp_path = self.dir.join(SNAPSHOT_TEMP);
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options
            .open(&temp_path)
            .map_err(|e| StorageError::io(&temp_path, e))?;
        file.write_all(data)
            .map_err(|e| StorageError::io(&temp_path, e))?;
        file.sync_all()
            .map_err(|e| StorageError::io(&temp_path, e))?;
        drop(file);

        let path = self.path();
        fs::rename(&temp_path, &path).map_err(|e| StorageError::io(&path, e))?;

        sync_directory(&self.dir)
    }
}

#[cfg(unix)]
fn sync_directory(dir: &Path) -> StorageResult<()> {
    File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| StorageError::io(dir, e))
}

#[cfg(not(unix))]
fn sync_directory(_dir: &Path) -> StorageResult<()> {
    Ok(())
}

/// Handle to the periodic checkpoint task.
///
/// Dropping the handle signals the task to stop; [`Checkpointer::stop`] also
/// waits for it to finish.
#[derive(Debug)]
pub struct Checkpointer {
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl Checkpointer {
    /// Spawns the checkpoint loop on the current Tokio runtime.
    pub fn start(table: Arc<MemoryTable>, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(checkpoint_loop(table, interval, shutdown_rx));

        info!(interval_ms = interval.as_millis() as u64, "Snapshot checkpointer started");

        Self {
            shutdown_tx,
            handle: Some(handle),
        }
    }

    /// Stops the task and waits for an in-flight checkpoint to complete.
    pub async fn stop(mut self) {
        let _ = self.shutdown_tx.send(true);

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Snapshot checkpointer ended abnormally");
            }
        }

        info!("Snapshot checkpointer stopped");
    }
}

impl Drop for Checkpointer {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Runs one checkpoint on the blocking pool, logging the outcome.
pub(crate) async fn checkpoint(table: Arc<MemoryTable>) -> StorageResult<usize> {
    let result = match tokio::task::spawn_blocking(move || table.checkpoint()).await {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "Checkpoint task panicked");
            return Ok(0);
        }
    };

    match &result {
        Ok(entries) => trace!(entries = *entries, "Snapshot written"),
        Err(e) => error!(error = %e, "Failed to write snapshot"),
    }
    result
}

async fn checkpoint_loop(
    table: Arc<MemoryTable>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Snapshot checkpointer received shutdown signal");
                    return;
                }
            }
        }

        // Failures are logged and retried at the next tick
        let _ = checkpoint(Arc::clone(&table)).await;
    }
}
