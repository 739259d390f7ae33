//! Per-candidate scoring
//!
//! Locates the matched window inside a candidate's event sequence,
//! extracts the matched symbol multiset, and computes the approximate
//! similarity that gates recall. Candidates with no aligned symbol,
//! or with similarity below the recall threshold, are dropped.

use std::collections::{BTreeMap, BTreeSet};

use crate::constants::limits;
use crate::types::Event;

/// Outcome of matching one candidate against the observed events
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    /// Index of the first candidate event containing an observed symbol
    pub first_index: usize,
    /// Index of the last candidate event containing an observed symbol
    pub last_index: usize,
    /// Observed symbols aligned with the present window, sorted, with
    /// multiplicity bounded by both sides
    pub matches: Vec<String>,
    /// Approximate multiset Jaccard between observed and present symbols
    pub similarity: f64,
    /// Non-contiguous matching runs within the window, minus one
    pub fragmentation: i64,
}

fn multiset(events: &[Event]) -> BTreeMap<&str, usize> {
    let mut counts = BTreeMap::new();
    for symbol in events.iter().flatten() {
        *counts.entry(symbol.as_str()).or_insert(0) += 1;
    }
    counts
}

/// Match a candidate's events against the session's observed events.
///
/// Returns `None` when no observed symbol aligns or the similarity
/// falls below `recall_threshold` (compared with the fixed recall
/// tolerance).
pub fn match_candidate(
    observed: &[Event],
    candidate: &[Event],
    recall_threshold: f64,
) -> Option<MatchOutcome> {
    let observed_symbols: BTreeSet<&str> = observed
        .iter()
        .flatten()
        .map(String::as_str)
        .collect();
    if observed_symbols.is_empty() {
        return None;
    }

    let matched_flags: Vec<bool> = candidate
        .iter()
        .map(|event| event.iter().any(|s| observed_symbols.contains(s.as_str())))
        .collect();
    let first_index = matched_flags.iter().position(|&m| m)?;
    let last_index = matched_flags.iter().rposition(|&m| m)?;

    let present = &candidate[first_index..=last_index];
    let observed_counts = multiset(observed);
    let present_counts = multiset(present);

    let mut matches = Vec::new();
    let mut intersection = 0_usize;
    let mut union = 0_usize;
    for (symbol, &observed_count) in &observed_counts {
        let present_count = present_counts.get(symbol).copied().unwrap_or(0);
        let shared = observed_count.min(present_count);
        intersection += shared;
        union += observed_count.max(present_count);
        for _ in 0..shared {
            matches.push((*symbol).to_string());
        }
    }
    for (symbol, &present_count) in &present_counts {
        if !observed_counts.contains_key(symbol) {
            union += present_count;
        }
    }

    if matches.is_empty() {
        return None;
    }

    let similarity = if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    };
    if similarity < recall_threshold - limits::RECALL_TOLERANCE {
        return None;
    }

    let window_flags = &matched_flags[first_index..=last_index];
    let runs = window_flags
        .iter()
        .zip(std::iter::once(&false).chain(window_flags.iter()))
        .filter(|(current, previous)| **current && !**previous)
        .count();
    let fragmentation = runs as i64 - 1;

    Some(MatchOutcome {
        first_index,
        last_index,
        matches,
        similarity,
        fragmentation,
    })
}
