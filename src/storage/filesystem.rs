//! File-per-key Storage Backend
//!
//! Each key lives in its own file under the storage directory. The file name
//! is the hex SHA-256 of the key, so any key is a safe, fixed-width name; the
//! original key is kept inside the encoded [`Entry`].
//!
//! ```text
//! <basedir>/
//! ├── 3f2a…c91e   {"key":"a key","value":"YSB2YWx1ZQ==","expiration":0}
//! └── 9b07…04d2   {"key":"another key","value":"…","expiration":0}
//! ```
//!
//! Writes truncate and rewrite the file in place and `fsync` before returning,
//! so a successful `put` is durable. No contents are cached between calls.

use crate::storage::pattern::{self, PatternQuery};
use crate::storage::{
    Entry, LockRegistry, Storage, StorageError, StorageOptions, StorageResult,
};
use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Identifier reported by [`Storage::kind`].
pub const KIND: &str = "fs";

/// Durable backend keeping one file per key.
#[derive(Debug)]
pub struct FileSystemStorage {
    dir: PathBuf,
    locks: LockRegistry,
}

impl FileSystemStorage {
    /// Opens (creating if needed) a file-per-key store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>, options: &StorageOptions) -> StorageResult<Self> {
        let dir = dir.into();
        ensure_dir(&dir)?;
        debug!(dir = %dir.display(), stripes = options.lock_stripes, "File storage opened");

        Ok(Self {
            dir,
            locks: LockRegistry::new(options.lock_stripes),
        })
    }

    /// The storage directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding `key`.
    pub fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(file_name(key))
    }

    /// Reads and decodes one file. Missing and empty files are `NotFound`.
    fn read_entry(&self, path: &Path) -> StorageResult<Entry> {
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(StorageError::NotFound),
            Err(e) => return Err(StorageError::io(path, e)),
        };

        let mut buf = Vec::new();
        file.read_to_end(&mut buf)
            .map_err(|e| StorageError::io(path, e))?;
        if buf.is_empty() {
            return Err(StorageError::NotFound);
        }

        Entry::decode(&buf)
    }

    fn write_entry(&self, path: &Path, entry: &Entry) -> StorageResult<()> {
        let encoded = entry.encode()?;
        ensure_dir(&self.dir)?;

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(path).map_err(|e| StorageError::io(path, e))?;
        file.write_all(&encoded)
            .map_err(|e| StorageError::io(path, e))?;
        file.sync_all().map_err(|e| StorageError::io(path, e))
    }

    fn remove_file(&self, path: &Path) -> StorageResult<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound),
            Err(e) => Err(StorageError::io(path, e)),
        }
    }

    /// Every regular file in the storage directory.
    fn entry_files(&self) -> StorageResult<Vec<PathBuf>> {
        ensure_dir(&self.dir)?;

        let read_dir = fs::read_dir(&self.dir).map_err(|e| StorageError::io(&self.dir, e))?;
        let mut files = Vec::new();
        for dirent in read_dir {
            let dirent = dirent.map_err(|e| StorageError::io(&self.dir, e))?;
            match dirent.file_type() {
                Ok(ft) if ft.is_file() => files.push(dirent.path()),
                Ok(_) => {}
                Err(e) => return Err(StorageError::io(dirent.path(), e)),
            }
        }
        Ok(files)
    }
}

#[async_trait]
impl Storage for FileSystemStorage {
    fn put(&self, key: &str, value: Bytes, expiration: Option<Duration>) -> StorageResult<()> {
        let _guard = self.locks.lock(key);

        let entry = Entry::new(key, value, expiration);
        self.write_entry(&self.entry_path(key), &entry)?;
        trace!(key = %key, expiration = entry.expiration, "Entry written");
        Ok(())
    }

    fn get(&self, key: &str) -> StorageResult<Bytes> {
        let _guard = self.locks.lock(key);

        let entry = match self.read_entry(&self.entry_path(key)) {
            Ok(entry) => entry,
            Err(StorageError::Decode(e)) => {
                warn!(key = %key, error = %e, "Undecodable entry treated as missing");
                return Err(StorageError::NotFound);
            }
            Err(e) => return Err(e),
        };

        if entry.is_expired() {
            return Err(StorageError::NotFound);
        }
        Ok(entry.value)
    }

    fn get_pattern(&self, pattern: &str) -> StorageResult<Bytes> {
        let _all = self.locks.lock_all();

        let query = PatternQuery::new(pattern);
        let mut matched = Vec::new();
        for path in self.entry_files()? {
            match self.read_entry(&path) {
                Ok(entry) if query.selects(&entry) => matched.push(entry),
                Ok(_) | Err(StorageError::NotFound) => {}
                Err(e) => debug!(path = %path.display(), error = %e, "Skipping unreadable entry"),
            }
        }

        trace!(pattern = %pattern, matched = matched.len(), "Pattern scan finished");
        pattern::render(&matched)
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        let _guard = self.locks.lock(key);

        ensure_dir(&self.dir)?;
        self.remove_file(&self.entry_path(key))
    }

    fn delete_all(&self) -> StorageResult<()> {
        let _all = self.locks.lock_all();

        let mut first_error = None;
        let mut removed = 0usize;
        for path in self.entry_files()? {
            match self.remove_file(&path) {
                Ok(()) => removed += 1,
                Err(StorageError::NotFound) => {}
                Err(e) => {
                    warn!(error = %e, "Failed to remove entry");
                    first_error.get_or_insert(e);
                }
            }
        }

        debug!(removed = removed, "All entries deleted");
        first_error.map_or(Ok(()), Err)
    }

    fn kind(&self) -> &'static str {
        KIND
    }

    async fn flush(&self) {}
}

/// Fixed-width file name for a key.
pub fn file_name(key: &str) -> String {
    format!("{:x}", Sha256::digest(key.as_bytes()))
}

pub(crate) fn ensure_dir(dir: &Path) -> StorageResult<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir).map_err(|e| StorageError::io(dir, e))
}
