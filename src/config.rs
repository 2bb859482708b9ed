//! Command-line configuration for the keystash server.

use crate::storage::{Provider, StorageOptions, DEFAULT_STRIPES};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone, Parser)]
#[command(name = "keystash")]
#[command(author, version, about = "Single-node key-value store over HTTP", long_about = None)]
pub struct Config {
    /// Address to listen on
    #[arg(long, default_value = crate::DEFAULT_LISTENER)]
    pub listener: String,

    /// Directory holding the stored data
    #[arg(long)]
    pub basedir: PathBuf,

    /// Storage backend
    #[arg(long, value_enum)]
    pub provider: Provider,

    /// Seconds between memory snapshots (0 disables periodic snapshots)
    #[arg(long, default_value_t = 15)]
    pub snapshot_interval: u64,

    /// Number of lock stripes
    #[arg(long, default_value_t = DEFAULT_STRIPES)]
    pub lock_stripes: usize,

    /// Log filter, e.g. "info" or "keystash=debug" (RUST_LOG takes precedence)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Storage knobs derived from the flags.
    pub fn storage_options(&self) -> StorageOptions {
        StorageOptions {
            lock_stripes: self.lock_stripes,
            snapshot_interval: Duration::from_secs(self.snapshot_interval),
        }
    }
}
