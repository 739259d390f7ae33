//! # Pattern Engine
//!
//! The only public facade over the engine: session lifecycle,
//! observation, learning, and prediction. Orchestrates the
//! observation pipeline, the candidate filter, the matcher and
//! segmenter, and the metric computer over the configured backends.
//!
//! ## Example
//!
//! ```
//! use kato_core::engine::PatternEngine;
//! use kato_core::types::{Deadline, Observation, PredictOptions, SessionOptions};
//!
//! # #[tokio::main]
//! # async fn main() -> kato_core::Result<()> {
//! let engine = PatternEngine::new();
//! let session = engine.create_session("kb", &SessionOptions::default())?;
//!
//! for symbol in ["a", "b", "c", "d"] {
//!     engine
//!         .observe(&session, Observation::from_strings([symbol]), Deadline::none())
//!         .await?;
//! }
//! let learned = engine.learn(&session, Deadline::none()).await?;
//! assert!(learned.created);
//!
//! engine.clear_stm(&session).await?;
//! engine
//!     .observe(&session, Observation::from_strings(["b"]), Deadline::none())
//!     .await?;
//! engine
//!     .observe(&session, Observation::from_strings(["c"]), Deadline::none())
//!     .await?;
//! let predictions = engine
//!     .predict(&session, &PredictOptions::default(), Deadline::none())
//!     .await?;
//! assert_eq!(predictions[0].future, vec![vec!["d".to_string()]]);
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, info, instrument, warn};

use crate::constants::limits;
use crate::corpus::CorpusIndex;
use crate::error::{Error, Result};
use crate::hashing;
use crate::matcher::{self, MatchOutcome};
use crate::metrics::{self, MetricInputs, StatsView};
use crate::observation;
use crate::retry::{RetryMetrics, RetryPolicy};
use crate::segmenter::{self, Segmentation};
use crate::session::{Session, SessionManager, WorkingMemory};
use crate::storage::memory::{InMemoryMetadataCache, InMemoryPatternStore, InMemoryVectorIndex};
use crate::storage::{MetadataCache, PatternStore, VectorIndex};
use crate::types::{
    Deadline, EngineConfig, LearnOutcome, Observation, ObserveOutcome, PatternRecord,
    PredictOptions, Prediction, SessionOptions, StmMode, StmSnapshot,
};
use crate::vector::VectorIndexClient;

/// Deterministic memory-and-prediction engine over pluggable backends
pub struct PatternEngine {
    config: EngineConfig,
    store: Arc<dyn PatternStore>,
    cache: Arc<dyn MetadataCache>,
    vectors: VectorIndexClient,
    corpus: CorpusIndex,
    sessions: SessionManager,
    /// Retry outcomes across every backend, shared with the vector client
    retry_metrics: Arc<RetryMetrics>,
    /// kbs whose metadata cache needs a rebuild from the store
    repair_queue: parking_lot::Mutex<BTreeSet<String>>,
}

impl Default for PatternEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternEngine {
    /// Engine with in-memory backends and default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Engine with in-memory backends and custom configuration
    #[must_use]
    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_backends(
            config,
            Arc::new(InMemoryPatternStore::new()),
            Arc::new(InMemoryMetadataCache::new()),
            Arc::new(InMemoryVectorIndex::new()),
        )
    }

    /// Engine over externally supplied backends
    pub fn with_backends(
        config: EngineConfig,
        store: Arc<dyn PatternStore>,
        cache: Arc<dyn MetadataCache>,
        vector_index: Arc<dyn VectorIndex>,
    ) -> Self {
        let retry_metrics = Arc::new(RetryMetrics::new());
        let vectors = VectorIndexClient::new(
            vector_index,
            config.vector_dimension,
            config.retry.clone(),
            Arc::clone(&retry_metrics),
            config.backend_call_timeout,
        );
        Self {
            config,
            store,
            cache,
            vectors,
            corpus: CorpusIndex::new(),
            sessions: SessionManager::new(),
            retry_metrics,
            repair_queue: parking_lot::Mutex::new(BTreeSet::new()),
        }
    }

    fn retry_policy(&self, deadline: Deadline) -> RetryPolicy {
        RetryPolicy::with_config(self.config.retry.clone())
            .with_metrics(Arc::clone(&self.retry_metrics))
            .with_deadline(deadline)
    }

    /// Retry outcome counters across every backend call
    pub fn retry_metrics(&self) -> &RetryMetrics {
        &self.retry_metrics
    }

    /// Bound a backend interaction by the operation deadline
    async fn bounded<T, F>(&self, deadline: Deadline, operation: &'static str, future: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        deadline.check(operation)?;
        match deadline.remaining() {
            Some(left) => tokio::time::timeout(left, future)
                .await
                .map_err(|_| Error::DeadlineExceeded { operation })?,
            None => future.await,
        }
    }

    /// Create a session bound to `kb_id`, applying per-session overrides
    pub fn create_session(&self, kb_id: &str, options: &SessionOptions) -> Result<String> {
        let config = options.resolve(&self.config.session);
        self.sessions.create(kb_id.to_string(), config)
    }

    /// Remove a session and its working memory
    pub fn delete_session(&self, session_id: &str) -> Result<()> {
        self.sessions.delete(session_id)
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Validate, canonicalize, and append one observation to the
    /// session's working memory, auto-learning at the configured
    /// threshold.
    #[instrument(skip(self, observation), fields(session_id = %session_id))]
    pub async fn observe(
        &self,
        session_id: &str,
        observation: Observation,
        deadline: Deadline,
    ) -> Result<ObserveOutcome> {
        deadline.check("observe")?;
        let session = self.sessions.get(session_id)?;
        let mut wm = session.stm.lock().await;

        let event = observation::assemble_event(
            &observation,
            &session.kb_id,
            &self.vectors,
            &session.config,
            deadline,
        )
        .await?;

        let observation_index = wm.push(event, observation.emotives, observation.metadata);
        debug!(
            stm_length = wm.events().len(),
            observation_index, "appended observation"
        );

        let auto_learned = if session.config.max_pattern_length > 0
            && wm.events().len() >= session.config.max_pattern_length
        {
            Some(self.learn_locked(&session, &mut wm, deadline).await?)
        } else {
            None
        };

        Ok(ObserveOutcome {
            stm_length: wm.events().len(),
            observation_index,
            auto_learned,
        })
    }

    /// Convert the session's working memory into a learned pattern
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn learn(&self, session_id: &str, deadline: Deadline) -> Result<LearnOutcome> {
        deadline.check("learn")?;
        let session = self.sessions.get(session_id)?;
        let mut wm = session.stm.lock().await;
        self.learn_locked(&session, &mut wm, deadline).await
    }

    async fn learn_locked(
        &self,
        session: &Session,
        wm: &mut WorkingMemory,
        deadline: Deadline,
    ) -> Result<LearnOutcome> {
        let total = wm.total_symbols();
        if total < limits::MIN_PATTERN_SYMBOLS {
            return Err(Error::TooFewSymbols { count: total });
        }

        let events = wm.events().to_vec();
        let name = hashing::hash_pattern(&events)?;
        let learning_emotives = wm.aggregate_emotives();
        let record = PatternRecord::new(
            session.kb_id.clone(),
            name.clone(),
            events.clone(),
            learning_emotives.clone(),
            wm.aggregate_metadata(),
        );
        let persistence = session.config.persistence;

        // Durable write first; the learn is acknowledged only once
        // this returns.
        let outcome = self
            .bounded(deadline, "learn", async {
                self.retry_policy(deadline)
                    .execute(|| self.store.put(&record, persistence))
                    .await
            })
            .await
            .map_err(as_corpus_unavailable)?;

        self.corpus.register(&session.kb_id, &name, &events);

        // A cache failure behind a durable write does not fail the
        // learn; the kb's counters are rebuilt from the store on the
        // next read.
        if let Err(e) = self
            .update_cache(&session.kb_id, &record, outcome.created, persistence, &learning_emotives)
            .await
        {
            warn!(kb_id = %session.kb_id, error = %e, "metadata cache update failed; queueing repair");
            self.repair_queue.lock().insert(session.kb_id.clone());
        }

        match session.config.stm_mode {
            StmMode::Clear => wm.clear(),
            StmMode::Rolling => match session.config.max_pattern_length {
                0 => {}
                1 => wm.clear(),
                keep_plus_one => wm.roll(keep_plus_one - 1),
            },
        }

        info!(
            kb_id = %session.kb_id,
            pattern = %name,
            created = outcome.created,
            frequency = outcome.frequency,
            "learned pattern"
        );

        Ok(LearnOutcome {
            pattern_name: hashing::format_pattern_name(&name),
            created: outcome.created,
        })
    }

    async fn update_cache(
        &self,
        kb_id: &str,
        record: &PatternRecord,
        created: bool,
        persistence: usize,
        learning_emotives: &BTreeMap<String, f64>,
    ) -> Result<()> {
        self.cache.incr_frequency(kb_id, &record.name).await?;
        self.cache
            .append_emotive(kb_id, &record.name, learning_emotives, persistence)
            .await?;

        if created {
            self.cache.incr_unique_pattern_count(kb_id).await?;
            let unique = record.unique_symbols();
            try_join_all(unique.iter().map(|symbol| {
                self.cache.incr_pattern_member_frequency(kb_id, symbol, 1)
            }))
            .await?;
        }

        let mut counts: BTreeMap<&str, u64> = BTreeMap::new();
        for symbol in record.events.iter().flatten() {
            *counts.entry(symbol.as_str()).or_insert(0) += 1;
        }
        try_join_all(
            counts
                .into_iter()
                .map(|(symbol, count)| self.cache.incr_symbol_frequency(kb_id, symbol, count)),
        )
        .await?;
        Ok(())
    }

    /// Warm a cold kb and apply any queued cache repair. Both paths
    /// rebuild from the same authoritative record stream; a cold
    /// in-process index always implies a cold cache.
    async fn ensure_kb_ready(&self, kb_id: &str, deadline: Deadline) -> Result<()> {
        let needs_warm = !self.corpus.is_warm(kb_id);
        let needs_repair = self.repair_queue.lock().contains(kb_id);
        if !needs_warm && !needs_repair {
            return Ok(());
        }
        let records = self
            .bounded(deadline, "kb_warmup", async {
                self.retry_policy(deadline)
                    .execute(|| self.store.query_by_length(kb_id, 1, usize::MAX))
                    .await
            })
            .await
            .map_err(as_corpus_unavailable)?;
        if needs_warm {
            self.corpus.rebuild_from_records(kb_id, &records);
        }
        self.cache.rebuild_from_records(kb_id, &records).await?;
        self.repair_queue.lock().remove(kb_id);
        info!(kb_id, patterns = records.len(), "rebuilt kb state from store");
        Ok(())
    }

    /// Rank temporal predictions for the session's current working
    /// memory. Fewer than two observed symbols, or a session with
    /// predictions disabled, yields an empty result.
    #[instrument(skip(self, options), fields(session_id = %session_id))]
    pub async fn predict(
        &self,
        session_id: &str,
        options: &PredictOptions,
        deadline: Deadline,
    ) -> Result<Vec<Prediction>> {
        deadline.check("predict")?;
        let session = self.sessions.get(session_id)?;
        let wm = session.stm.lock().await;

        if !session.config.process_predictions {
            return Ok(Vec::new());
        }
        if wm.total_symbols() < limits::MIN_PATTERN_SYMBOLS {
            return Ok(Vec::new());
        }
        let observed = wm.events().to_vec();

        // Candidate generation: a deadline hit here degrades to an
        // empty result instead of failing the call.
        let candidate_phase = async {
            self.ensure_kb_ready(&session.kb_id, deadline).await?;
            let candidates = self.corpus.candidates(
                &session.kb_id,
                &observed,
                session.config.recall_threshold,
                session.config.search_depth,
            );
            let names: Vec<String> = candidates.into_iter().map(|c| c.name).collect();
            self.retry_policy(deadline)
                .execute(|| self.store.get_batch(&session.kb_id, &names))
                .await
                .map_err(as_corpus_unavailable)
        };
        let records = match self.bounded(deadline, "predict", candidate_phase).await {
            Ok(records) => records,
            Err(Error::DeadlineExceeded { .. }) => {
                warn!(session_id, "deadline hit during candidate generation; returning empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let mut survivors: Vec<(PatternRecord, MatchOutcome, Segmentation)> = Vec::new();
        for record in records.into_iter().flatten() {
            if let Some(outcome) =
                matcher::match_candidate(&observed, &record.events, session.config.recall_threshold)
            {
                let seg = segmenter::segment(
                    &record.events,
                    outcome.first_index,
                    outcome.last_index,
                    &observed,
                );
                survivors.push((record, outcome, seg));
            }
        }
        if survivors.is_empty() {
            return Ok(Vec::new());
        }

        let ensemble_frequency: u64 = survivors.iter().map(|(r, _, _)| r.frequency).sum();

        let needed: Vec<String> = survivors
            .iter()
            .flat_map(|(_, _, seg)| seg.present.iter().flatten().cloned())
            .collect::<BTreeSet<String>>()
            .into_iter()
            .collect();
        let stats = self
            .bounded(deadline, "predict_stats", async {
                let symbol_stats = self
                    .cache
                    .get_symbol_stats_batch(&session.kb_id, &needed)
                    .await?;
                let globals = self.cache.get_global_stats(&session.kb_id).await?;
                Ok::<_, Error>(StatsView {
                    globals,
                    symbols: needed
                        .iter()
                        .zip(symbol_stats)
                        .filter_map(|(symbol, stats)| stats.map(|s| (symbol.clone(), s)))
                        .collect(),
                })
            })
            .await
            .map_err(as_corpus_unavailable)?;

        let mut predictions = Vec::with_capacity(survivors.len());
        for (record, outcome, seg) in survivors {
            let block = metrics::compute(
                &MetricInputs {
                    matches: &outcome.matches,
                    present: &seg.present,
                    extras: &seg.extras,
                    similarity: outcome.similarity,
                    fragmentation: outcome.fragmentation,
                    frequency: record.frequency,
                    ensemble_frequency,
                },
                &stats,
            )?;
            predictions.push(build_prediction(record, outcome, seg, block));
        }

        let rank_metric = options.rank_sort_algo.unwrap_or(session.config.rank_sort_algo);
        predictions.sort_by(|a, b| {
            metrics::rank_value(b, rank_metric)
                .partial_cmp(&metrics::rank_value(a, rank_metric))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.name.cmp(&b.name))
        });
        predictions.truncate(
            options
                .max_predictions
                .unwrap_or(session.config.max_predictions),
        );
        Ok(predictions)
    }

    /// Snapshot the session's working memory
    pub async fn get_stm(&self, session_id: &str) -> Result<StmSnapshot> {
        let session = self.sessions.get(session_id)?;
        let wm = session.stm.lock().await;
        Ok(wm.snapshot())
    }

    /// Drop the session's unlearned events and accumulators
    pub async fn clear_stm(&self, session_id: &str) -> Result<()> {
        let session = self.sessions.get(session_id)?;
        let mut wm = session.stm.lock().await;
        wm.clear();
        Ok(())
    }

    /// Drop every trace of a kb: patterns, counters, vectors, the
    /// in-process index, and the working memory of its sessions.
    #[instrument(skip(self))]
    pub async fn clear_all(&self, kb_id: &str, deadline: Deadline) -> Result<()> {
        self.bounded(deadline, "clear_all", async {
            self.retry_policy(deadline)
                .execute(|| self.store.clear_kb(kb_id))
                .await
                .map_err(as_corpus_unavailable)?;
            self.cache.clear_kb(kb_id).await?;
            Ok::<_, Error>(())
        })
        .await?;
        self.corpus.clear_kb(kb_id);
        self.vectors.drop_collection(kb_id, deadline).await?;
        self.repair_queue.lock().remove(kb_id);

        for session in self.sessions.sessions_for_kb(kb_id) {
            let mut wm = session.stm.lock().await;
            wm.clear();
        }
        info!(kb_id, "cleared knowledge base");
        Ok(())
    }

    /// Fetch a stored pattern by either identifier form
    pub async fn get_pattern(
        &self,
        kb_id: &str,
        name: &str,
        deadline: Deadline,
    ) -> Result<PatternRecord> {
        let bare = hashing::parse_pattern_name(name)?;
        self.ensure_kb_ready(kb_id, deadline).await?;
        let record = self
            .bounded(deadline, "get_pattern", async {
                self.retry_policy(deadline)
                    .execute(|| self.store.get(kb_id, &bare))
                    .await
                    .map_err(as_corpus_unavailable)
            })
            .await?;
        record.ok_or_else(|| Error::NotFound {
            kind: "pattern",
            key: hashing::format_pattern_name(&bare),
        })
    }
}

/// Backend failures surfaced through learn/predict read as corpus
/// unavailability; everything else keeps its own kind.
fn as_corpus_unavailable(error: Error) -> Error {
    match error {
        Error::Storage(message) => Error::CorpusUnavailable { message },
        Error::Io(e) => Error::CorpusUnavailable {
            message: e.to_string(),
        },
        other => other,
    }
}

fn build_prediction(
    record: PatternRecord,
    outcome: MatchOutcome,
    seg: Segmentation,
    block: metrics::MetricBlock,
) -> Prediction {
    let emotives = record
        .emotive_windows
        .iter()
        .map(|(key, window)| {
            let mean = window.iter().sum::<f64>() / window.len() as f64;
            (key.clone(), mean)
        })
        .collect();
    let metadata = record
        .metadata_sets
        .iter()
        .map(|(key, values)| (key.clone(), values.iter().cloned().collect()))
        .collect();

    Prediction {
        name: hashing::format_pattern_name(&record.name),
        frequency: record.frequency,
        events: record.events,
        past: seg.past,
        present: seg.present,
        future: seg.future,
        matches: outcome.matches,
        missing: seg.missing,
        extras: seg.extras,
        emotives,
        metadata,
        similarity: outcome.similarity,
        evidence: block.evidence,
        confidence: block.confidence,
        snr: block.snr,
        fragmentation: outcome.fragmentation,
        normalized_entropy: block.normalized_entropy,
        global_normalized_entropy: block.global_normalized_entropy,
        itfdf_similarity: block.itfdf_similarity,
        potential: block.potential,
        confluence: block.confluence,
        tfidf_score: block.tfidf_score,
    }
}
