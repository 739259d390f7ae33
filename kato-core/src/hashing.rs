//! Deterministic identifiers for patterns and vectors
//!
//! Everything in this module is a pure function. Pattern names and
//! synthetic vector symbols are sha1 over a canonical byte
//! serialization, so identical inputs always map to identical
//! identifiers, across processes and across sessions.

use sha1::{Digest, Sha1};

use crate::constants::{prefixes, separators};
use crate::error::{Error, Result};
use crate::types::{Event, PatternName};

/// Canonicalize one event: lexicographically sorted unique symbols.
///
/// Input bytes are preserved exactly; comparison is byte-wise,
/// case-sensitive, with no Unicode normalization.
pub fn canonicalize_event<I, S>(symbols: I) -> Result<Event>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut event: Vec<String> = symbols.into_iter().map(Into::into).collect();
    if event.is_empty() {
        return Err(Error::invalid_input("event contains no symbols"));
    }
    event.sort_unstable();
    event.dedup();
    Ok(event)
}

/// Hash an already-canonicalized event sequence into a pattern name.
///
/// Events are joined with the reserved event separator and each
/// event's symbols with the reserved symbol separator; the name is
/// the lowercase sha1 hex of those bytes.
pub fn hash_pattern(events: &[Event]) -> Result<PatternName> {
    if events.is_empty() {
        return Err(Error::invalid_input("pattern contains no events"));
    }
    let mut hasher = Sha1::new();
    for (index, event) in events.iter().enumerate() {
        if event.is_empty() {
            return Err(Error::invalid_input_with(
                "pattern contains an empty event",
                [("event_index".to_string(), index.to_string())],
            ));
        }
        if index > 0 {
            hasher.update([separators::EVENT]);
        }
        for (position, symbol) in event.iter().enumerate() {
            if position > 0 {
                hasher.update([separators::SYMBOL]);
            }
            hasher.update(symbol.as_bytes());
        }
    }
    let digest = hasher.finalize();
    Ok(format!("{digest:x}"))
}

/// Hash a vector into its lowercase sha1 hex.
///
/// Elements are serialized in dimension order as IEEE-754
/// little-endian f32 bytes, so byte-identical vectors hash
/// identically everywhere.
pub fn hash_vector(vector: &[f32]) -> Result<String> {
    if vector.is_empty() {
        return Err(Error::invalid_input("vector has zero length"));
    }
    let mut hasher = Sha1::new();
    for value in vector {
        hasher.update(value.to_le_bytes());
    }
    let digest = hasher.finalize();
    Ok(format!("{digest:x}"))
}

/// Synthetic symbol minted for an upserted vector: `VCTR|<hex>`
pub fn vector_symbol(vector: &[f32]) -> Result<String> {
    Ok(format!("{}{}", prefixes::VECTOR, hash_vector(vector)?))
}

/// True for synthetic `VCTR|*` symbols
pub fn is_vector_symbol(symbol: &str) -> bool {
    symbol.starts_with(prefixes::VECTOR)
}

/// External form of a pattern identifier: `PTRN|<40-hex>`
pub fn format_pattern_name(name: &str) -> String {
    format!("{}{name}", prefixes::PATTERN)
}

/// Parse either identifier form back to the bare 40-hex storage form
pub fn parse_pattern_name(input: &str) -> Result<PatternName> {
    let bare = input.strip_prefix(prefixes::PATTERN).unwrap_or(input);
    if bare.len() != 40 || !bare.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::invalid_input_with(
            "pattern name is not a 40-hex identifier",
            [("name".to_string(), input.to_string())],
        ));
    }
    Ok(bare.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_sorts_and_dedups() {
        let event = canonicalize_event(["b", "a", "b", "c"]).unwrap();
        assert_eq!(event, vec!["a", "b", "c"]);
    }

    #[test]
    fn canonicalize_is_case_sensitive() {
        let event = canonicalize_event(["b", "A", "a"]).unwrap();
        assert_eq!(event, vec!["A", "a", "b"]);
    }

    #[test]
    fn canonicalize_rejects_empty() {
        let err = canonicalize_event(Vec::<String>::new()).unwrap_err();
        assert_eq!(err.code(), "invalid_input");
    }

    #[test]
    fn hash_pattern_is_pure() {
        let events = vec![
            vec!["a".to_string(), "b".to_string()],
            vec!["c".to_string()],
        ];
        let first = hash_pattern(&events).unwrap();
        let second = hash_pattern(&events).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 40);
        assert!(first.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn separators_distinguish_event_boundaries() {
        let joined = vec![vec!["a".to_string(), "b".to_string()]];
        let split = vec![vec!["a".to_string()], vec!["b".to_string()]];
        assert_ne!(hash_pattern(&joined).unwrap(), hash_pattern(&split).unwrap());
    }

    #[test]
    fn hash_pattern_rejects_empty_events() {
        assert!(hash_pattern(&[]).is_err());
        let err = hash_pattern(&[vec!["a".to_string()], vec![]]).unwrap_err();
        assert_eq!(
            err.context().get("event_index").map(String::as_str),
            Some("1")
        );
    }

    #[test]
    fn byte_identical_vectors_share_a_symbol() {
        let v1 = vec![0.25_f32, -1.5, 3.0];
        let v2 = vec![0.25_f32, -1.5, 3.0];
        assert_eq!(vector_symbol(&v1).unwrap(), vector_symbol(&v2).unwrap());
        assert!(is_vector_symbol(&vector_symbol(&v1).unwrap()));
    }

    #[test]
    fn vector_order_matters() {
        let forward = hash_vector(&[1.0, 2.0]).unwrap();
        let reversed = hash_vector(&[2.0, 1.0]).unwrap();
        assert_ne!(forward, reversed);
    }

    #[test]
    fn zero_length_vector_is_rejected() {
        assert!(hash_vector(&[]).is_err());
    }

    #[test]
    fn pattern_name_round_trips_both_forms() {
        let events = vec![vec!["x".to_string(), "y".to_string()]];
        let bare = hash_pattern(&events).unwrap();
        let external = format_pattern_name(&bare);
        assert!(external.starts_with("PTRN|"));
        assert_eq!(parse_pattern_name(&external).unwrap(), bare);
        assert_eq!(parse_pattern_name(&bare).unwrap(), bare);
        assert!(parse_pattern_name("PTRN|nothex").is_err());
    }
}
