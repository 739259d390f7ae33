//! # Storage Abstraction
//!
//! Unified traits for the engine's three backends: the durable
//! pattern store, the fast-path metadata cache, and the pluggable
//! vector index.
//!
//! The engine depends only on these traits. Each has one blessed
//! implementation (redb-backed store in `kato-storage-redb`, the
//! in-memory cache/index here) and the in-memory forms double as
//! test backends.

pub mod memory;

use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{GlobalStats, PatternName, PatternRecord, PutOutcome, SymbolStats};

/// Durable persistence of patterns keyed by `(kb_id, name)`
///
/// A `put` must be acknowledged only after the write is durable;
/// partial writes must never produce a visible record. Reads issued
/// by the session that performed the `put` see the updated row.
#[async_trait]
pub trait PatternStore: Send + Sync {
    /// Insert-or-increment.
    ///
    /// When the row exists: frequency += 1, this learning's emotive
    /// averages are appended to each window (trimmed to `persistence`
    /// from the tail, oldest dropped), and metadata values are
    /// set-unioned. The record's `events` never change.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    async fn put(&self, record: &PatternRecord, persistence: usize) -> Result<PutOutcome>;

    /// Retrieve a full record, `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    async fn get(&self, kb_id: &str, name: &str) -> Result<Option<PatternRecord>>;

    /// Batch retrieval; result order matches the input order.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    async fn get_batch(
        &self,
        kb_id: &str,
        names: &[PatternName],
    ) -> Result<Vec<Option<PatternRecord>>>;

    /// Records whose `length` falls in `min..=max`, ascending by name.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    async fn query_by_length(
        &self,
        kb_id: &str,
        min_length: usize,
        max_length: usize,
    ) -> Result<Vec<PatternRecord>>;

    /// Drop every record in the namespace.
    ///
    /// # Errors
    ///
    /// Returns error if the storage operation fails.
    async fn clear_kb(&self, kb_id: &str) -> Result<()>;
}

/// Fast-path mirror of hot pattern fields and per-kb symbol statistics
#[async_trait]
pub trait MetadataCache: Send + Sync {
    /// Increment a pattern's frequency counter, returning the new value.
    ///
    /// # Errors
    ///
    /// Returns error if the cache operation fails.
    async fn incr_frequency(&self, kb_id: &str, name: &str) -> Result<u64>;

    /// Push one per-learning average per emotive key, trimming each
    /// FIFO to `persistence`.
    ///
    /// # Errors
    ///
    /// Returns error if the cache operation fails.
    async fn append_emotive(
        &self,
        kb_id: &str,
        name: &str,
        emotives: &BTreeMap<String, f64>,
        persistence: usize,
    ) -> Result<()>;

    /// Rolling emotive windows for a pattern, newest last.
    ///
    /// # Errors
    ///
    /// Returns error if the cache operation fails.
    async fn get_emotive_windows(
        &self,
        kb_id: &str,
        name: &str,
    ) -> Result<BTreeMap<String, VecDeque<f64>>>;

    /// Increment the kb's unique-pattern counter. Callers invoke this
    /// only on newly-inserted patterns.
    ///
    /// # Errors
    ///
    /// Returns error if the cache operation fails.
    async fn incr_unique_pattern_count(&self, kb_id: &str) -> Result<u64>;

    /// Add `delta` occurrences to a symbol's frequency-weighted total.
    ///
    /// # Errors
    ///
    /// Returns error if the cache operation fails.
    async fn incr_symbol_frequency(&self, kb_id: &str, symbol: &str, delta: u64) -> Result<()>;

    /// Add `delta` to the count of distinct patterns containing the symbol.
    ///
    /// # Errors
    ///
    /// Returns error if the cache operation fails.
    async fn incr_pattern_member_frequency(
        &self,
        kb_id: &str,
        symbol: &str,
        delta: u64,
    ) -> Result<()>;

    /// Statistics for one symbol, `None` when never seen.
    ///
    /// # Errors
    ///
    /// Returns error if the cache operation fails.
    async fn get_symbol_stats(&self, kb_id: &str, symbol: &str) -> Result<Option<SymbolStats>>;

    /// Batch statistics lookup; result order matches the input order.
    ///
    /// # Errors
    ///
    /// Returns error if the cache operation fails.
    async fn get_symbol_stats_batch(
        &self,
        kb_id: &str,
        symbols: &[String],
    ) -> Result<Vec<Option<SymbolStats>>>;

    /// Per-kb global counters.
    ///
    /// # Errors
    ///
    /// Returns error if the cache operation fails.
    async fn get_global_stats(&self, kb_id: &str) -> Result<GlobalStats>;

    /// Rebuild a kb's counters from authoritative store records.
    ///
    /// Used by the repair path after a cache update failed behind a
    /// durable store write. Replaces every counter for the kb.
    ///
    /// # Errors
    ///
    /// Returns error if the cache operation fails.
    async fn rebuild_from_records(&self, kb_id: &str, records: &[PatternRecord]) -> Result<()>;

    /// Drop every counter in the namespace.
    ///
    /// # Errors
    ///
    /// Returns error if the cache operation fails.
    async fn clear_kb(&self, kb_id: &str) -> Result<()>;
}

/// Pluggable approximate-nearest-neighbor service
///
/// One collection per kb; the engine never mixes vectors across
/// namespaces. Results are ordered by descending score with
/// ascending-symbol tie-breaks.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or overwrite a vector under its synthetic symbol.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::VectorBackend`] on failure.
    async fn upsert(&self, kb_id: &str, symbol: &str, vector: &[f32]) -> Result<()>;

    /// K-nearest symbols to the query vector, descending score.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::VectorBackend`] on failure.
    async fn search(&self, kb_id: &str, vector: &[f32], k: usize) -> Result<Vec<(String, f32)>>;

    /// Drop the kb's collection.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::VectorBackend`] on failure.
    async fn drop_collection(&self, kb_id: &str) -> Result<()>;
}
