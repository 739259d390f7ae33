//! Candidate pre-screening over the pattern corpus
//!
//! Narrows a kb's corpus from potentially millions of patterns to at
//! most `search_depth` candidates before per-candidate scoring.
//! Stages run in a fixed order: symbol inverted index, length
//! bucketing, n-gram Jaccard estimate, bloom negative check, cap.
//!
//! The per-kb structures are shared and read-mostly; writers take the
//! kb's own lock so learns in one kb never contend with predictions
//! in another. All containers are ordered, so candidate iteration is
//! deterministic and ties resolve by ascending pattern name.

pub mod signature;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::constants::limits;
use crate::error::{Error, Result};
use crate::storage::PatternStore;
use crate::types::{Event, PatternName, PatternRecord};

use signature::{gram_set, PatternSignature};

/// A candidate that survived pre-screening
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub name: PatternName,
    pub pre_score: f64,
}

#[derive(Default)]
struct KbIndex {
    /// symbol -> names of patterns containing it
    inverted: BTreeMap<String, BTreeSet<PatternName>>,
    signatures: BTreeMap<PatternName, PatternSignature>,
    max_length: usize,
    warmed: bool,
}

/// Shared per-kb candidate-filter state
#[derive(Default)]
pub struct CorpusIndex {
    kbs: RwLock<HashMap<String, Arc<RwLock<KbIndex>>>>,
}

impl CorpusIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn kb(&self, kb_id: &str) -> Arc<RwLock<KbIndex>> {
        if let Some(kb) = self.kbs.read().get(kb_id) {
            return Arc::clone(kb);
        }
        let mut kbs = self.kbs.write();
        Arc::clone(kbs.entry(kb_id.to_string()).or_default())
    }

    /// Index one learned pattern. Idempotent per (name, events).
    pub fn register(&self, kb_id: &str, name: &PatternName, events: &[Event]) {
        let kb = self.kb(kb_id);
        let mut kb = kb.write();
        kb.warmed = true;
        if kb.signatures.contains_key(name) {
            return;
        }
        let signature = PatternSignature::build(events);
        kb.max_length = kb.max_length.max(signature.length);
        for symbol in events.iter().flatten().collect::<BTreeSet<_>>() {
            kb.inverted
                .entry(symbol.clone())
                .or_default()
                .insert(name.clone());
        }
        kb.signatures.insert(name.clone(), signature);
    }

    /// True once this kb has been indexed in-process
    pub fn is_warm(&self, kb_id: &str) -> bool {
        self.kb(kb_id).read().warmed
    }

    /// Replace a kb's index from authoritative store records.
    ///
    /// Used on cold start over a durable store and by the
    /// cache-repair path.
    pub fn rebuild_from_records(&self, kb_id: &str, records: &[PatternRecord]) {
        let kb = self.kb(kb_id);
        let mut fresh = KbIndex {
            warmed: true,
            ..KbIndex::default()
        };
        for record in records {
            let signature = PatternSignature::build(&record.events);
            fresh.max_length = fresh.max_length.max(signature.length);
            for symbol in record.unique_symbols() {
                fresh
                    .inverted
                    .entry(symbol)
                    .or_default()
                    .insert(record.name.clone());
            }
            fresh.signatures.insert(record.name.clone(), signature);
        }
        debug!(kb_id, patterns = records.len(), "rebuilt corpus index");
        *kb.write() = fresh;
    }

    /// Rebuild lazily if this kb has never been indexed in-process.
    /// A store failure surfaces as `CorpusUnavailable`.
    pub async fn ensure_warm(&self, kb_id: &str, store: &dyn PatternStore) -> Result<()> {
        if !self.is_warm(kb_id) {
            let records = store
                .query_by_length(kb_id, 1, usize::MAX)
                .await
                .map_err(|e| Error::CorpusUnavailable {
                    message: format!("index rebuild failed: {e}"),
                })?;
            self.rebuild_from_records(kb_id, &records);
        }
        Ok(())
    }

    /// Drop a kb's index (part of `clear_all`)
    pub fn clear_kb(&self, kb_id: &str) {
        self.kbs.write().remove(kb_id);
    }

    /// Run the pre-screening stages for one prediction.
    ///
    /// `observed_events` is the session's current STM; cold symbols
    /// simply contribute no candidates.
    pub fn candidates(
        &self,
        kb_id: &str,
        observed_events: &[Event],
        recall_threshold: f64,
        search_depth: usize,
    ) -> Vec<Candidate> {
        let observed_symbols: BTreeSet<String> =
            observed_events.iter().flatten().cloned().collect();
        if observed_symbols.is_empty() {
            return Vec::new();
        }

        let kb = self.kb(kb_id);
        let kb = kb.read();

        // Stage 1: inverted-index union
        let mut pool: BTreeSet<&PatternName> = BTreeSet::new();
        for symbol in &observed_symbols {
            if let Some(names) = kb.inverted.get(symbol) {
                pool.extend(names.iter());
            }
        }

        // Stage 2: length bucketing. A candidate far shorter or far
        // longer than the observation cannot clear the recall
        // threshold.
        let observed_count = observed_symbols.len();
        let min_length =
            ((observed_count as f64) * recall_threshold).ceil().max(1.0) as usize;
        let max_length = (((observed_count as f64)
            / recall_threshold.max(limits::RECALL_EPSILON))
        .floor() as usize)
            .min(kb.max_length.max(1));

        let observed_grams = gram_set(observed_events);
        let cutoff = recall_threshold - limits::NGRAM_TOLERANCE;

        let mut survivors: Vec<Candidate> = Vec::new();
        'candidates: for name in pool {
            let Some(signature) = kb.signatures.get(name) else {
                continue;
            };
            if signature.length < min_length || signature.length > max_length {
                continue;
            }

            // Stage 3: n-gram Jaccard estimate
            let estimate = signature.jaccard_estimate(&observed_grams);
            if estimate < cutoff {
                continue;
            }

            // Stage 4: bloom negative check over the symbols the gram
            // signature claims are shared. A bloom miss means the gram
            // hit was a hash collision; the candidate is dropped.
            for symbol in &observed_symbols {
                if signature.claims_symbol(symbol) && !signature.may_contain(symbol) {
                    continue 'candidates;
                }
            }

            survivors.push(Candidate {
                name: name.clone(),
                pre_score: estimate,
            });
        }

        // Stage 5: cap to the highest pre-scores, ties by ascending name
        survivors.sort_by(|a, b| {
            b.pre_score
                .partial_cmp(&a.pre_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.name.cmp(&b.name))
        });
        survivors.truncate(search_depth);
        survivors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::hash_pattern;
    use crate::storage::memory::InMemoryPatternStore;
    use crate::types::PatternRecord;

    fn events(spec: &[&[&str]]) -> Vec<Event> {
        spec.iter()
            .map(|e| e.iter().map(ToString::to_string).collect())
            .collect()
    }

    fn register(index: &CorpusIndex, kb: &str, spec: &[&[&str]]) -> PatternName {
        let evs = events(spec);
        let name = hash_pattern(&evs).unwrap();
        index.register(kb, &name, &evs);
        name
    }

    #[test]
    fn unseen_symbols_yield_no_candidates() {
        let index = CorpusIndex::new();
        register(&index, "kb", &[&["a"], &["b"]]);
        let found = index.candidates("kb", &events(&[&["z"]]), 0.1, 10);
        assert!(found.is_empty());
    }

    #[test]
    fn shared_symbols_survive_all_stages() {
        let index = CorpusIndex::new();
        let name = register(&index, "kb", &[&["a"], &["b"], &["c"], &["d"]]);
        let found = index.candidates("kb", &events(&[&["b"], &["c"]]), 0.1, 10);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, name);
        assert!(found[0].pre_score > 0.0);
    }

    #[test]
    fn length_bucket_prunes_oversized_candidates() {
        let index = CorpusIndex::new();
        // 12 symbols against a 1-symbol observation at threshold 0.5:
        // max admissible length is 2.
        register(
            &index,
            "kb",
            &[&["a", "b", "c", "d", "e", "f"], &["g", "h", "i", "j", "k", "a"]],
        );
        let found = index.candidates("kb", &events(&[&["a"]]), 0.5, 10);
        assert!(found.is_empty());
    }

    #[test]
    fn cap_keeps_highest_pre_scores_with_stable_ties() {
        let index = CorpusIndex::new();
        let exact = register(&index, "kb", &[&["a"], &["b"]]);
        register(&index, "kb", &[&["a"], &["x"], &["y"]]);
        register(&index, "kb", &[&["a"], &["p"], &["q"]]);

        let found = index.candidates("kb", &events(&[&["a"], &["b"]]), 0.1, 2);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].name, exact);
        // The two partial overlaps tie; the kept one is the lesser name.
        assert!(found[1].pre_score < found[0].pre_score);
    }

    #[test]
    fn kb_indexes_are_isolated() {
        let index = CorpusIndex::new();
        register(&index, "kb1", &[&["a"], &["b"]]);
        assert!(index.candidates("kb2", &events(&[&["a"]]), 0.1, 10).is_empty());

        index.clear_kb("kb1");
        assert!(index.candidates("kb1", &events(&[&["a"]]), 0.1, 10).is_empty());
    }

    #[tokio::test]
    async fn rebuild_restores_a_cold_index() {
        let store = InMemoryPatternStore::new();
        let evs = events(&[&["a"], &["b"], &["c"]]);
        let name = hash_pattern(&evs).unwrap();
        store
            .put(
                &PatternRecord::new(
                    "kb".to_string(),
                    name.clone(),
                    evs.clone(),
                    BTreeMap::new(),
                    BTreeMap::new(),
                ),
                5,
            )
            .await
            .unwrap();

        let index = CorpusIndex::new();
        index.ensure_warm("kb", &store).await.unwrap();
        let found = index.candidates("kb", &events(&[&["b"]]), 0.1, 10);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, name);
    }
}
