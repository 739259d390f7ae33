//! Observation validation and event assembly
//!
//! Fans one raw observation out to vector resolution and
//! canonicalization. Validation happens before any backend call, and
//! the assembled event is handed back only once every vector call
//! succeeded, so a failed observation never leaves a partial STM
//! append behind.

use crate::error::{Error, Result};
use crate::hashing;
use crate::types::{Deadline, Event, Observation, SessionConfig};
use crate::vector::VectorIndexClient;

/// Validate shape ahead of any backend work
pub fn validate(observation: &Observation) -> Result<()> {
    if observation.is_empty() {
        return Err(Error::invalid_input(
            "observation carries no strings and no vectors",
        ));
    }
    for (index, vector) in observation.vectors.iter().enumerate() {
        if vector.is_empty() {
            return Err(Error::invalid_input_with(
                "vector has zero length",
                [("vector_index".to_string(), index.to_string())],
            ));
        }
    }
    Ok(())
}

/// Assemble the canonicalized event for one observation.
///
/// Vectors resolve to synthetic symbols (with nearest-neighbor
/// substitution) before the combined symbol set is sorted and
/// deduplicated. Stored events are always sorted; the session's
/// `sort` flag only exists for experimental input paths and never
/// changes the stored form.
pub async fn assemble_event(
    observation: &Observation,
    kb_id: &str,
    vectors: &VectorIndexClient,
    config: &SessionConfig,
    deadline: Deadline,
) -> Result<Event> {
    validate(observation)?;

    let mut symbols = observation.strings.clone();
    if !observation.vectors.is_empty() {
        let synthetic = vectors
            .resolve_symbols(
                kb_id,
                &observation.vectors,
                config.vector_knn,
                config.vector_similarity_threshold,
                deadline,
            )
            .await?;
        symbols.extend(synthetic);
    }

    hashing::canonicalize_event(symbols)
}
