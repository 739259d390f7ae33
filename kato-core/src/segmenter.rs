//! Temporal segmentation of a matched pattern
//!
//! Splits a candidate's event sequence around the matched window and
//! derives the missing/extras symbol sets. The three segments always
//! concatenate back to the candidate's full event sequence.

use std::collections::BTreeSet;

use crate::types::Event;

/// past / present / future split with symbol-set derivations
#[derive(Debug, Clone, PartialEq)]
pub struct Segmentation {
    /// Events before the matched window
    pub past: Vec<Event>,
    /// The matched window, full events inclusive of unobserved symbols
    pub present: Vec<Event>,
    /// Events after the matched window
    pub future: Vec<Event>,
    /// Present-window symbols absent from the observation, sorted
    pub missing: Vec<String>,
    /// Observed symbols absent from the present window, sorted
    pub extras: Vec<String>,
}

/// Segment `events` at the inclusive matched window
/// `[first_index, last_index]` against the observed events.
pub fn segment(
    events: &[Event],
    first_index: usize,
    last_index: usize,
    observed: &[Event],
) -> Segmentation {
    let past = events[..first_index].to_vec();
    let present = events[first_index..=last_index].to_vec();
    let future = events[last_index + 1..].to_vec();

    let observed_symbols: BTreeSet<&String> = observed.iter().flatten().collect();
    let present_symbols: BTreeSet<&String> = present.iter().flatten().collect();

    let missing = present_symbols
        .difference(&observed_symbols)
        .map(|s| (*s).clone())
        .collect();
    let extras = observed_symbols
        .difference(&present_symbols)
        .map(|s| (*s).clone())
        .collect();

    Segmentation {
        past,
        present,
        future,
        missing,
        extras,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events(spec: &[&[&str]]) -> Vec<Event> {
        spec.iter()
            .map(|e| e.iter().map(ToString::to_string).collect())
            .collect()
    }

    #[test]
    fn interior_window_splits_three_ways() {
        let evs = events(&[&["a"], &["b"], &["c"], &["d"]]);
        let seg = segment(&evs, 1, 2, &events(&[&["b"], &["c"]]));
        assert_eq!(seg.past, events(&[&["a"]]));
        assert_eq!(seg.present, events(&[&["b"], &["c"]]));
        assert_eq!(seg.future, events(&[&["d"]]));
        assert!(seg.missing.is_empty());
        assert!(seg.extras.is_empty());
    }

    #[test]
    fn full_window_leaves_past_and_future_empty() {
        let evs = events(&[&["a"], &["b"]]);
        let seg = segment(&evs, 0, 1, &events(&[&["a"], &["b"]]));
        assert!(seg.past.is_empty());
        assert!(seg.future.is_empty());
        assert_eq!(seg.present, evs);
    }

    #[test]
    fn missing_collects_unobserved_window_symbols() {
        let evs = events(&[&["a", "b"], &["c", "d"], &["e", "f"]]);
        let seg = segment(&evs, 0, 1, &events(&[&["a"], &["c"]]));
        assert_eq!(seg.missing, vec!["b", "d"]);
        assert!(seg.extras.is_empty());
        assert_eq!(seg.future, events(&[&["e", "f"]]));
    }

    #[test]
    fn extras_collects_observed_symbols_outside_the_window() {
        let evs = events(&[&["cat"], &["dog"]]);
        let seg = segment(&evs, 0, 1, &events(&[&["bird", "cat"], &["dog", "fish"]]));
        assert!(seg.missing.is_empty());
        assert_eq!(seg.extras, vec!["bird", "fish"]);
    }

    #[test]
    fn segments_concatenate_to_the_original() {
        let evs = events(&[&["a"], &["b"], &["c"], &["d"], &["e"]]);
        let seg = segment(&evs, 2, 3, &events(&[&["c"], &["d"]]));
        let mut rejoined = seg.past.clone();
        rejoined.extend(seg.present.clone());
        rejoined.extend(seg.future.clone());
        assert_eq!(rejoined, evs);
    }
}
