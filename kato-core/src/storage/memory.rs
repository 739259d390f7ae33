//! In-memory backends
//!
//! Default wiring for engines constructed without external storage,
//! and the test doubles for all three backend traits. All state is
//! process-local; maps are `BTreeMap` keyed by name/symbol so
//! iteration order is deterministic.

use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::storage::{MetadataCache, PatternStore, VectorIndex};
use crate::types::{GlobalStats, PatternName, PatternRecord, PutOutcome, SymbolStats};

/// Durable-store test double backed by per-kb ordered maps
#[derive(Debug, Default)]
pub struct InMemoryPatternStore {
    kbs: RwLock<BTreeMap<String, BTreeMap<PatternName, PatternRecord>>>,
}

impl InMemoryPatternStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PatternStore for InMemoryPatternStore {
    async fn put(&self, record: &PatternRecord, persistence: usize) -> Result<PutOutcome> {
        let mut kbs = self.kbs.write();
        let kb = kbs.entry(record.kb_id.clone()).or_default();
        match kb.get_mut(&record.name) {
            Some(existing) => {
                existing.apply_relearn(record, persistence);
                Ok(PutOutcome {
                    created: false,
                    frequency: existing.frequency,
                })
            }
            None => {
                let mut fresh = record.clone();
                for window in fresh.emotive_windows.values_mut() {
                    while window.len() > persistence {
                        window.pop_front();
                    }
                }
                let frequency = fresh.frequency;
                kb.insert(fresh.name.clone(), fresh);
                Ok(PutOutcome {
                    created: true,
                    frequency,
                })
            }
        }
    }

    async fn get(&self, kb_id: &str, name: &str) -> Result<Option<PatternRecord>> {
        Ok(self
            .kbs
            .read()
            .get(kb_id)
            .and_then(|kb| kb.get(name))
            .cloned())
    }

    async fn get_batch(
        &self,
        kb_id: &str,
        names: &[PatternName],
    ) -> Result<Vec<Option<PatternRecord>>> {
        let kbs = self.kbs.read();
        let kb = kbs.get(kb_id);
        Ok(names
            .iter()
            .map(|name| kb.and_then(|kb| kb.get(name)).cloned())
            .collect())
    }

    async fn query_by_length(
        &self,
        kb_id: &str,
        min_length: usize,
        max_length: usize,
    ) -> Result<Vec<PatternRecord>> {
        Ok(self
            .kbs
            .read()
            .get(kb_id)
            .map(|kb| {
                kb.values()
                    .filter(|record| (min_length..=max_length).contains(&record.length))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn clear_kb(&self, kb_id: &str) -> Result<()> {
        self.kbs.write().remove(kb_id);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct KbCounters {
    frequencies: BTreeMap<PatternName, u64>,
    emotives: BTreeMap<PatternName, BTreeMap<String, VecDeque<f64>>>,
    symbols: BTreeMap<String, SymbolStats>,
    globals: GlobalStats,
}

/// Metadata-cache blessed in-process implementation
///
/// Key shapes mirror the external contract (`freq:{kb}:{name}`,
/// `stats:{kb}:symbol:{symbol}`, ...) but live as nested maps.
#[derive(Debug, Default)]
pub struct InMemoryMetadataCache {
    kbs: RwLock<BTreeMap<String, KbCounters>>,
}

impl InMemoryMetadataCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataCache for InMemoryMetadataCache {
    async fn incr_frequency(&self, kb_id: &str, name: &str) -> Result<u64> {
        let mut kbs = self.kbs.write();
        let kb = kbs.entry(kb_id.to_string()).or_default();
        let counter = kb.frequencies.entry(name.to_string()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn append_emotive(
        &self,
        kb_id: &str,
        name: &str,
        emotives: &BTreeMap<String, f64>,
        persistence: usize,
    ) -> Result<()> {
        let mut kbs = self.kbs.write();
        let kb = kbs.entry(kb_id.to_string()).or_default();
        let windows = kb.emotives.entry(name.to_string()).or_default();
        for (key, value) in emotives {
            let window = windows.entry(key.clone()).or_default();
            window.push_back(*value);
            while window.len() > persistence {
                window.pop_front();
            }
        }
        Ok(())
    }

    async fn get_emotive_windows(
        &self,
        kb_id: &str,
        name: &str,
    ) -> Result<BTreeMap<String, VecDeque<f64>>> {
        Ok(self
            .kbs
            .read()
            .get(kb_id)
            .and_then(|kb| kb.emotives.get(name))
            .cloned()
            .unwrap_or_default())
    }

    async fn incr_unique_pattern_count(&self, kb_id: &str) -> Result<u64> {
        let mut kbs = self.kbs.write();
        let kb = kbs.entry(kb_id.to_string()).or_default();
        kb.globals.total_unique_patterns += 1;
        Ok(kb.globals.total_unique_patterns)
    }

    async fn incr_symbol_frequency(&self, kb_id: &str, symbol: &str, delta: u64) -> Result<()> {
        let mut kbs = self.kbs.write();
        let kb = kbs.entry(kb_id.to_string()).or_default();
        kb.symbols.entry(symbol.to_string()).or_default().frequency += delta;
        kb.globals.total_symbols_in_patterns_frequencies += delta;
        Ok(())
    }

    async fn incr_pattern_member_frequency(
        &self,
        kb_id: &str,
        symbol: &str,
        delta: u64,
    ) -> Result<()> {
        let mut kbs = self.kbs.write();
        let kb = kbs.entry(kb_id.to_string()).or_default();
        kb.symbols
            .entry(symbol.to_string())
            .or_default()
            .pattern_member_frequency += delta;
        Ok(())
    }

    async fn get_symbol_stats(&self, kb_id: &str, symbol: &str) -> Result<Option<SymbolStats>> {
        Ok(self
            .kbs
            .read()
            .get(kb_id)
            .and_then(|kb| kb.symbols.get(symbol))
            .copied())
    }

    async fn get_symbol_stats_batch(
        &self,
        kb_id: &str,
        symbols: &[String],
    ) -> Result<Vec<Option<SymbolStats>>> {
        let kbs = self.kbs.read();
        let kb = kbs.get(kb_id);
        Ok(symbols
            .iter()
            .map(|symbol| kb.and_then(|kb| kb.symbols.get(symbol)).copied())
            .collect())
    }

    async fn rebuild_from_records(&self, kb_id: &str, records: &[PatternRecord]) -> Result<()> {
        let mut fresh = KbCounters::default();
        for record in records {
            fresh
                .frequencies
                .insert(record.name.clone(), record.frequency);
            fresh
                .emotives
                .insert(record.name.clone(), record.emotive_windows.clone());
            fresh.globals.total_unique_patterns += 1;
            let mut counts: BTreeMap<&str, u64> = BTreeMap::new();
            for symbol in record.events.iter().flatten() {
                *counts.entry(symbol.as_str()).or_insert(0) += 1;
            }
            for (symbol, count) in counts {
                let stats = fresh.symbols.entry(symbol.to_string()).or_default();
                stats.pattern_member_frequency += 1;
                let weighted = count * record.frequency;
                stats.frequency += weighted;
                fresh.globals.total_symbols_in_patterns_frequencies += weighted;
            }
        }
        self.kbs.write().insert(kb_id.to_string(), fresh);
        Ok(())
    }

    async fn get_global_stats(&self, kb_id: &str) -> Result<GlobalStats> {
        Ok(self
            .kbs
            .read()
            .get(kb_id)
            .map(|kb| kb.globals)
            .unwrap_or_default())
    }

    async fn clear_kb(&self, kb_id: &str) -> Result<()> {
        self.kbs.write().remove(kb_id);
        Ok(())
    }
}

/// Exact-scan vector index: one collection per kb, cosine scores
///
/// Serves as both the default in-process backend and the test double;
/// ANN services (HNSW and friends) plug in behind the same trait.
#[derive(Debug, Default)]
pub struct InMemoryVectorIndex {
    collections: RwLock<BTreeMap<String, BTreeMap<String, Vec<f32>>>>,
}

impl InMemoryVectorIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, kb_id: &str, symbol: &str, vector: &[f32]) -> Result<()> {
        let mut collections = self.collections.write();
        collections
            .entry(kb_id.to_string())
            .or_default()
            .insert(symbol.to_string(), vector.to_vec());
        Ok(())
    }

    async fn search(&self, kb_id: &str, vector: &[f32], k: usize) -> Result<Vec<(String, f32)>> {
        let collections = self.collections.read();
        let Some(collection) = collections.get(kb_id) else {
            return Ok(Vec::new());
        };
        let mut scored: Vec<(String, f32)> = collection
            .iter()
            .map(|(symbol, stored)| {
                if stored.len() != vector.len() {
                    return Err(Error::VectorBackend {
                        retriable: false,
                        message: format!(
                            "dimension mismatch: query {} vs stored {}",
                            vector.len(),
                            stored.len()
                        ),
                    });
                }
                Ok((symbol.clone(), cosine_similarity(vector, stored)))
            })
            .collect::<Result<_>>()?;
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn drop_collection(&self, kb_id: &str) -> Result<()> {
        self.collections.write().remove(kb_id);
        Ok(())
    }
}
