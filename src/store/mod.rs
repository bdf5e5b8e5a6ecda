//! Durable key-value storage for limiter logs and registration records.
//!
//! Every limiter and the registry share a single store, the same way the
//! site's scripts share one browser storage area. Entries are plain strings;
//! callers own the encoding of their values.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::config::{StoreConfig, StoreKind};

/// Errors that can occur while reading or writing a store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store contents are corrupt: {0}")]
    Corrupt(String),
}

/// A string-to-string store shared by everything in the process.
///
/// Implementations must tolerate being called from several limiters through
/// a shared handle. Atomicity across processes is not required.
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`, or `None` when it is absent.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove `key`. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// List all keys currently present.
    fn keys(&self) -> Result<Vec<String>, StoreError>;
}

/// Open the store described by `config`.
pub fn open(config: &StoreConfig) -> Arc<dyn KeyValueStore> {
    match config.kind {
        StoreKind::Memory => {
            info!("Using in-memory store");
            Arc::new(MemoryStore::new())
        }
        StoreKind::File => {
            info!(path = %config.path.display(), "Using file store");
            Arc::new(FileStore::open(&config.path))
        }
    }
}
