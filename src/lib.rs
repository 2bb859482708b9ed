//! # keystash - A Single-Node Key-Value Store
//!
//! keystash maps string keys to byte values with optional expiration and
//! serves them over a small HTTP API. Two storage backends are available:
//!
//! - **fs**: one file per key, written and synced on every `put`
//! - **memory**: a resident table, checkpointed to a snapshot file periodically
//!   and on shutdown
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              keystash                                   │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌──────────────────────────────┐ │
//! │  │   axum      │───>│  Handlers   │───>│       dyn Storage            │ │
//! │  │   Router    │    │ (blocking)  │    │  put/get/get_pattern/delete  │ │
//! │  └─────────────┘    └─────────────┘    └──────┬───────────────┬───────┘ │
//! │                                               │               │         │
//! │                                               ▼               ▼         │
//! │                              ┌────────────────────┐ ┌─────────────────┐ │
//! │                              │ FileSystemStorage  │ │  MemoryStorage  │ │
//! │                              │  <dir>/<sha256>    │ │ <dir>/memory.db │ │
//! │                              └────────────────────┘ └────────┬────────┘ │
//! │                                                              ▲          │
//! │                                              ┌───────────────┴───────┐  │
//! │                                              │     Checkpointer      │  │
//! │                                              │(Background Tokio Task)│  │
//! │                                              └───────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use keystash::storage::{self, Provider, StorageOptions};
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let storage = storage::open(Provider::Memory, "/var/lib/keystash", &StorageOptions::default())?;
//!     let listener = TcpListener::bind(keystash::DEFAULT_LISTENER).await?;
//!
//!     keystash::http::serve(listener, storage.clone(), async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//!
//!     storage.flush().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`storage`]: the `Storage` contract, both backends, locking and glob queries
//! - [`http`]: axum router mapping requests onto storage calls
//! - [`config`]: command-line flags for the server binary
//!
//! ## Design Highlights
//!
//! ### Striped Locks
//!
//! Both backends serialize access per key through a fixed pool of 64 mutexes.
//! Whole-store operations take every stripe in order, so they see a
//! consistent view without a global lock on the single-key path.
//!
//! ### Lazy Expiry
//!
//! Expired entries are never purged in the background. Every read path
//! checks the deadline and treats an expired entry as absent.

pub mod config;
pub mod http;
pub mod storage;

// Re-export commonly used types for convenience
pub use config::Config;
pub use storage::{Provider, Storage, StorageError, StorageOptions, StorageResult};

/// The default address the server listens on
pub const DEFAULT_LISTENER: &str = "0.0.0.0:8080";

/// Version of keystash
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
