//! # Test Utilities
//!
//! Shared test utilities for the KATO pattern engine.
//!
//! Provides:
//! - Observation builders
//! - Engine scenario helpers
//! - Failure-injecting backend wrappers for retry and repair tests

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use kato_core::engine::PatternEngine;
use kato_core::types::{PatternName, PutOutcome};
use kato_core::{
    Deadline, Error, GlobalStats, LearnOutcome, MetadataCache, Observation, PatternRecord,
    PatternStore, Result, SymbolStats,
};

/// Observation carrying only strings
pub fn observation(strings: &[&str]) -> Observation {
    Observation::from_strings(strings.iter().copied())
}

/// Observation with strings and one emotive map
pub fn observation_with_emotives(strings: &[&str], emotives: &[(&str, f64)]) -> Observation {
    Observation {
        emotives: emotives
            .iter()
            .map(|(k, v)| ((*k).to_string(), *v))
            .collect(),
        ..observation(strings)
    }
}

/// Observation with strings and one metadata map
pub fn observation_with_metadata(
    strings: &[&str],
    metadata: &[(&str, serde_json::Value)],
) -> Observation {
    Observation {
        metadata: metadata
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect(),
        ..observation(strings)
    }
}

/// Observation with strings and vectors
pub fn observation_with_vectors(strings: &[&str], vectors: &[&[f32]]) -> Observation {
    Observation {
        vectors: vectors.iter().map(|v| v.to_vec()).collect(),
        ..observation(strings)
    }
}

/// Observe each event then learn, returning the learn outcome
pub async fn learn_sequence(
    engine: &PatternEngine,
    session_id: &str,
    sequence: &[&[&str]],
) -> Result<LearnOutcome> {
    for event in sequence {
        engine
            .observe(session_id, observation(event), Deadline::none())
            .await?;
    }
    engine.learn(session_id, Deadline::none()).await
}

/// Pattern store that fails the first `failures` calls with a
/// retriable storage error, then delegates
pub struct FlakyPatternStore<S> {
    inner: S,
    remaining_failures: AtomicUsize,
    calls: AtomicUsize,
}

impl<S> FlakyPatternStore<S> {
    pub fn new(inner: S, failures: usize) -> Self {
        Self {
            inner,
            remaining_failures: AtomicUsize::new(failures),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn maybe_fail(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.remaining_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::Storage("injected transient failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl<S: PatternStore> PatternStore for FlakyPatternStore<S> {
    async fn put(&self, record: &PatternRecord, persistence: usize) -> Result<PutOutcome> {
        self.maybe_fail()?;
        self.inner.put(record, persistence).await
    }

    async fn get(&self, kb_id: &str, name: &str) -> Result<Option<PatternRecord>> {
        self.maybe_fail()?;
        self.inner.get(kb_id, name).await
    }

    async fn get_batch(
        &self,
        kb_id: &str,
        names: &[PatternName],
    ) -> Result<Vec<Option<PatternRecord>>> {
        self.maybe_fail()?;
        self.inner.get_batch(kb_id, names).await
    }

    async fn query_by_length(
        &self,
        kb_id: &str,
        min_length: usize,
        max_length: usize,
    ) -> Result<Vec<PatternRecord>> {
        self.maybe_fail()?;
        self.inner
            .query_by_length(kb_id, min_length, max_length)
            .await
    }

    async fn clear_kb(&self, kb_id: &str) -> Result<()> {
        self.maybe_fail()?;
        self.inner.clear_kb(kb_id).await
    }
}

/// Pattern store whose every call fails with a non-retriable error
#[derive(Default)]
pub struct BrokenPatternStore;

impl BrokenPatternStore {
    fn fail<T>(&self) -> Result<T> {
        Err(Error::CorpusUnavailable {
            message: "injected permanent failure".to_string(),
        })
    }
}

#[async_trait]
impl PatternStore for BrokenPatternStore {
    async fn put(&self, _record: &PatternRecord, _persistence: usize) -> Result<PutOutcome> {
        self.fail()
    }

    async fn get(&self, _kb_id: &str, _name: &str) -> Result<Option<PatternRecord>> {
        self.fail()
    }

    async fn get_batch(
        &self,
        _kb_id: &str,
        _names: &[PatternName],
    ) -> Result<Vec<Option<PatternRecord>>> {
        self.fail()
    }

    async fn query_by_length(
        &self,
        _kb_id: &str,
        _min_length: usize,
        _max_length: usize,
    ) -> Result<Vec<PatternRecord>> {
        self.fail()
    }

    async fn clear_kb(&self, _kb_id: &str) -> Result<()> {
        self.fail()
    }
}

/// Metadata cache whose write operations can be toggled to fail,
/// exercising the learn-succeeds-then-repair path
pub struct ToggleFailCache<C> {
    inner: C,
    fail_writes: AtomicBool,
}

impl<C> ToggleFailCache<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writes(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Storage("injected cache write failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl<C: MetadataCache> MetadataCache for ToggleFailCache<C> {
    async fn incr_frequency(&self, kb_id: &str, name: &str) -> Result<u64> {
        self.check_writes()?;
        self.inner.incr_frequency(kb_id, name).await
    }

    async fn append_emotive(
        &self,
        kb_id: &str,
        name: &str,
        emotives: &BTreeMap<String, f64>,
        persistence: usize,
    ) -> Result<()> {
        self.check_writes()?;
        self.inner
            .append_emotive(kb_id, name, emotives, persistence)
            .await
    }

    async fn get_emotive_windows(
        &self,
        kb_id: &str,
        name: &str,
    ) -> Result<BTreeMap<String, VecDeque<f64>>> {
        self.inner.get_emotive_windows(kb_id, name).await
    }

    async fn incr_unique_pattern_count(&self, kb_id: &str) -> Result<u64> {
        self.check_writes()?;
        self.inner.incr_unique_pattern_count(kb_id).await
    }

    async fn incr_symbol_frequency(&self, kb_id: &str, symbol: &str, delta: u64) -> Result<()> {
        self.check_writes()?;
        self.inner.incr_symbol_frequency(kb_id, symbol, delta).await
    }

    async fn incr_pattern_member_frequency(
        &self,
        kb_id: &str,
        symbol: &str,
        delta: u64,
    ) -> Result<()> {
        self.check_writes()?;
        self.inner
            .incr_pattern_member_frequency(kb_id, symbol, delta)
            .await
    }

    async fn get_symbol_stats(&self, kb_id: &str, symbol: &str) -> Result<Option<SymbolStats>> {
        self.inner.get_symbol_stats(kb_id, symbol).await
    }

    async fn get_symbol_stats_batch(
        &self,
        kb_id: &str,
        symbols: &[String],
    ) -> Result<Vec<Option<SymbolStats>>> {
        self.inner.get_symbol_stats_batch(kb_id, symbols).await
    }

    async fn get_global_stats(&self, kb_id: &str) -> Result<GlobalStats> {
        self.inner.get_global_stats(kb_id).await
    }

    async fn rebuild_from_records(&self, kb_id: &str, records: &[PatternRecord]) -> Result<()> {
        self.inner.rebuild_from_records(kb_id, records).await
    }

    async fn clear_kb(&self, kb_id: &str) -> Result<()> {
        self.inner.clear_kb(kb_id).await
    }
}
