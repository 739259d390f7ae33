//! Per-pattern pre-screening signatures
//!
//! Each learned pattern carries a compact signature used by the
//! candidate filter: its total length, a gram set for the Jaccard
//! pre-score, and a bloom filter over its unique symbols for the
//! definitive negative check.
//!
//! Grams are symbol-grained: one hash per symbol, plus one hash per
//! ordered symbol pair spanning adjacent events. Event-identity grams
//! would zero out every partial observation, so the grams stay at
//! symbol granularity while still encoding sequence adjacency.

use std::collections::BTreeSet;
use std::hash::{DefaultHasher, Hash, Hasher};

use bloomfilter::Bloom;

use crate::constants::limits;
use crate::types::Event;

const SYMBOL_GRAM_TAG: u8 = 1;
const PAIR_GRAM_TAG: u8 = 2;

fn symbol_gram(symbol: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    SYMBOL_GRAM_TAG.hash(&mut hasher);
    symbol.hash(&mut hasher);
    hasher.finish()
}

fn pair_gram(first: &str, second: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    PAIR_GRAM_TAG.hash(&mut hasher);
    first.hash(&mut hasher);
    second.hash(&mut hasher);
    hasher.finish()
}

/// Gram set for an event sequence: symbol unigrams plus
/// adjacent-event symbol pairs
pub fn gram_set(events: &[Event]) -> BTreeSet<u64> {
    let mut grams = BTreeSet::new();
    for event in events {
        for symbol in event {
            grams.insert(symbol_gram(symbol));
        }
    }
    for window in events.windows(2) {
        for first in &window[0] {
            for second in &window[1] {
                grams.insert(pair_gram(first, second));
            }
        }
    }
    grams
}

/// Precomputed filter data stored with each pattern
pub struct PatternSignature {
    /// Total symbol count of the pattern
    pub length: usize,
    /// Symbol and adjacency grams
    pub grams: BTreeSet<u64>,
    /// Unique symbols; misses are definitive
    bloom: Bloom<String>,
}

impl PatternSignature {
    /// Build from an already-canonicalized event sequence
    pub fn build(events: &[Event]) -> Self {
        let length = events.iter().map(Vec::len).sum();
        let unique: BTreeSet<&String> = events.iter().flatten().collect();
        let mut bloom = Bloom::new_for_fp_rate(unique.len().max(1), limits::BLOOM_FP_RATE);
        for symbol in &unique {
            bloom.set(*symbol);
        }
        Self {
            length,
            grams: gram_set(events),
            bloom,
        }
    }

    /// Bloom membership check; `false` means definitively absent
    pub fn may_contain(&self, symbol: &String) -> bool {
        self.bloom.check(symbol)
    }

    /// True when the gram set claims this symbol is shared. The claim
    /// is approximate (hash grams can collide) and is verified
    /// against the bloom filter by the candidate filter.
    pub fn claims_symbol(&self, symbol: &str) -> bool {
        self.grams.contains(&symbol_gram(symbol))
    }

    /// Jaccard overlap estimate against an observed gram set
    pub fn jaccard_estimate(&self, observed: &BTreeSet<u64>) -> f64 {
        if observed.is_empty() && self.grams.is_empty() {
            return 0.0;
        }
        let intersection = observed.intersection(&self.grams).count();
        let union = observed.len() + self.grams.len() - intersection;
        intersection as f64 / union as f64
    }
}

impl std::fmt::Debug for PatternSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternSignature")
            .field("length", &self.length)
            .field("grams", &self.grams.len())
            .finish_non_exhaustive()
    }
}
