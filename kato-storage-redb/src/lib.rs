#![allow(clippy::missing_errors_doc)]

//! # KATO Storage - redb
//!
//! redb embedded database implementing the durable pattern store.
//!
//! This crate provides:
//! - Durable pattern rows keyed by `(kb_id, name)` with
//!   commit-before-acknowledge semantics
//! - Async wrappers around synchronous redb transactions via
//!   `spawn_blocking`
//! - Postcard serialization for compact rows
//! - An LRU read cache for hot pattern records
//!
//! ## Example
//!
//! ```no_run
//! use kato_storage_redb::RedbPatternStore;
//! use std::path::Path;
//!
//! # async fn example() -> kato_core::Result<()> {
//! let store = RedbPatternStore::open(Path::new("./kato.redb")).await?;
//! # Ok(())
//! # }
//! ```

use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;

use kato_core::{Error, PatternRecord, Result};
use lru::LruCache;
use parking_lot::Mutex;
use redb::Database;
use tracing::info;

mod patterns;
mod tables;

/// Default capacity of the hot-record read cache
pub const DEFAULT_READ_CACHE_CAPACITY: usize = 1024;

/// Maximum size for pattern record deserialization (1MB).
///
/// Limits row size to prevent resource exhaustion from corrupted or
/// oversized payloads.
pub const MAX_RECORD_SIZE: usize = 1_000_000;

/// Durable pattern store backed by a single redb database file
pub struct RedbPatternStore {
    db: Arc<Database>,
    read_cache: Mutex<LruCache<String, PatternRecord>>,
}

impl RedbPatternStore {
    /// Open (or create) the database at `path`
    pub async fn open(path: &Path) -> Result<Self> {
        let path = path.to_path_buf();
        let db = tokio::task::spawn_blocking(move || {
            Database::create(&path)
                .map_err(|e| Error::Storage(format!("Failed to open redb database: {e}")))
        })
        .await
        .map_err(|e| Error::Storage(format!("Task join error: {e}")))??;

        let store = Self {
            db: Arc::new(db),
            read_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(DEFAULT_READ_CACHE_CAPACITY)
                    .unwrap_or(NonZeroUsize::MIN),
            )),
        };
        store.initialize_tables().await?;
        info!("opened redb pattern store");
        Ok(store)
    }

    async fn initialize_tables(&self) -> Result<()> {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let write_txn = db
                .begin_write()
                .map_err(|e| Error::Storage(format!("Failed to begin write transaction: {e}")))?;
            write_txn
                .open_table(tables::PATTERNS_TABLE)
                .map_err(|e| Error::Storage(format!("Failed to open patterns table: {e}")))?;
            write_txn
                .commit()
                .map_err(|e| Error::Storage(format!("Failed to commit transaction: {e}")))?;
            Ok::<_, Error>(())
        })
        .await
        .map_err(|e| Error::Storage(format!("Task join error: {e}")))?
    }

    pub(crate) fn cache_put(&self, key: String, record: PatternRecord) {
        self.read_cache.lock().put(key, record);
    }

    pub(crate) fn cache_get(&self, key: &str) -> Option<PatternRecord> {
        self.read_cache.lock().get(key).cloned()
    }

    pub(crate) fn cache_clear(&self) {
        self.read_cache.lock().clear();
    }
}
