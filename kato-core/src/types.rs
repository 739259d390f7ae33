//! Common types used across the pattern engine
//!
//! The wire shapes here follow the external JSON contract: lowercase
//! snake_case field names, absent observation fields defaulting to
//! empty, and sorted arrays wherever ordering is observable.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::constants::defaults;
use crate::error::{Error, Result};

/// Isolation namespace spanning pattern store, metadata cache, and
/// vector index. Opaque to the engine.
pub type KbId = String;

/// Bare 40-hex sha1 pattern identifier (storage form).
///
/// The external form is produced by
/// [`format_pattern_name`](crate::hashing::format_pattern_name).
pub type PatternName = String;

/// One time-step observation after canonicalization: unique,
/// lexicographically sorted symbols.
pub type Event = Vec<String>;

/// Raw per-step input supplied by a client.
///
/// Vectors are embedded opaque fixed-dimension values; the engine
/// never interprets their geometry beyond hashing and nearest-neighbor
/// lookups.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Symbolic strings observed at this step
    #[serde(default)]
    pub strings: Vec<String>,
    /// Dense vectors observed at this step
    #[serde(default)]
    pub vectors: Vec<Vec<f32>>,
    /// Scalar affective/utility context, per name
    #[serde(default)]
    pub emotives: BTreeMap<String, f64>,
    /// Arbitrary categorical context, per key
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Observation {
    /// Observation carrying only symbolic strings
    pub fn from_strings<I, S>(strings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            strings: strings.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// True when the observation would produce an empty event
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty() && self.vectors.is_empty()
    }
}

/// Persisted pattern row, partitioned by `kb_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRecord {
    /// Isolation namespace
    pub kb_id: KbId,
    /// Bare sha1 hex of the canonical event serialization
    pub name: PatternName,
    /// Source of truth for reconstruction; each event unique+sorted
    pub events: Vec<Event>,
    /// Total symbol count across all events
    pub length: usize,
    /// Times this exact hash has been learned; always >= 1
    pub frequency: u64,
    /// Per-emotive bounded FIFO of per-learning averages, newest last
    pub emotive_windows: BTreeMap<String, VecDeque<f64>>,
    /// Per-key set of string-coerced metadata values; never evicted
    pub metadata_sets: BTreeMap<String, BTreeSet<String>>,
}

impl PatternRecord {
    /// Build a fresh record for a first-time learning
    pub fn new(
        kb_id: KbId,
        name: PatternName,
        events: Vec<Event>,
        emotives: BTreeMap<String, f64>,
        metadata: BTreeMap<String, BTreeSet<String>>,
    ) -> Self {
        let length = events.iter().map(Vec::len).sum();
        let emotive_windows = emotives
            .into_iter()
            .map(|(k, v)| (k, VecDeque::from(vec![v])))
            .collect();
        Self {
            kb_id,
            name,
            events,
            length,
            frequency: 1,
            emotive_windows,
            metadata_sets: metadata,
        }
    }

    /// Sorted unique symbols across all events
    pub fn unique_symbols(&self) -> BTreeSet<String> {
        self.events.iter().flatten().cloned().collect()
    }

    /// Fold a re-learning of the same hash into this record: bump
    /// frequency, push the learning's emotive averages into each
    /// window trimming to `persistence` from the tail, and set-union
    /// the metadata values. `events` never change.
    pub fn apply_relearn(&mut self, incoming: &PatternRecord, persistence: usize) {
        self.frequency += 1;
        for (key, window) in &incoming.emotive_windows {
            let target = self.emotive_windows.entry(key.clone()).or_default();
            for value in window {
                target.push_back(*value);
            }
            while target.len() > persistence {
                target.pop_front();
            }
        }
        for (key, values) in &incoming.metadata_sets {
            self.metadata_sets
                .entry(key.clone())
                .or_default()
                .extend(values.iter().cloned());
        }
    }
}

/// Result of a pattern store `put`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutOutcome {
    /// True when the row did not exist before this put
    pub created: bool,
    /// Frequency after the put
    pub frequency: u64,
}

/// Result of a `learn` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearnOutcome {
    /// External-form pattern identifier (`PTRN|<40-hex>`)
    pub pattern_name: String,
    /// True when this learning inserted a new hash
    pub created: bool,
}

/// Result of an `observe` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObserveOutcome {
    /// Events currently held in the session's working memory
    pub stm_length: usize,
    /// Monotonic per-session observation counter after this call
    pub observation_index: u64,
    /// Set when this observation tripped the auto-learn threshold
    pub auto_learned: Option<LearnOutcome>,
}

/// Snapshot of a session's working memory returned by `get_stm`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StmSnapshot {
    /// Unlearned events in observation order
    pub events: Vec<Event>,
    /// Per-observation emotive maps accumulated since the last learn
    pub emotives: Vec<BTreeMap<String, f64>>,
    /// Per-observation metadata maps accumulated since the last learn
    pub metadata: Vec<BTreeMap<String, serde_json::Value>>,
    /// Monotonic observation counter for the session
    pub observation_count: u64,
}

/// Per-kb symbol statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolStats {
    /// Total occurrences across all patterns, weighted by pattern frequency
    pub frequency: u64,
    /// Number of distinct patterns containing the symbol
    pub pattern_member_frequency: u64,
}

/// Per-kb global counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalStats {
    /// Sum of symbol occurrences across all patterns, frequency-weighted
    pub total_symbols_in_patterns_frequencies: u64,
    /// Count of distinct pattern hashes ever inserted
    pub total_unique_patterns: u64,
}

/// Explainable temporal prediction over one matched pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// External-form pattern identifier (`PTRN|<40-hex>`)
    pub name: String,
    /// Learn count of the matched pattern
    pub frequency: u64,
    /// Full event sequence of the matched pattern
    pub events: Vec<Event>,
    /// Events before the matched window
    pub past: Vec<Event>,
    /// Matched window, full events inclusive of unobserved symbols
    pub present: Vec<Event>,
    /// Events after the matched window
    pub future: Vec<Event>,
    /// Observed symbols aligned with the present window, sorted
    pub matches: Vec<String>,
    /// Present-window symbols absent from the observation, sorted
    pub missing: Vec<String>,
    /// Observed symbols absent from the present window, sorted
    pub extras: Vec<String>,
    /// Per-emotive arithmetic mean over the pattern's rolling window
    pub emotives: BTreeMap<String, f64>,
    /// Per-key sorted unique metadata values accumulated on the pattern
    pub metadata: BTreeMap<String, Vec<String>>,
    /// Approximate observation/present similarity that passed recall
    pub similarity: f64,
    /// |matches| / |unique present symbols|
    pub evidence: f64,
    /// |matches| / |present length|
    pub confidence: f64,
    /// |matches| / (|matches| + |extras|), 0 when both empty
    pub snr: f64,
    /// Non-contiguous matching runs minus one
    pub fragmentation: i64,
    /// Shannon entropy over present symbols, normalized
    pub normalized_entropy: f64,
    /// Same formula over kb-wide symbol probabilities
    pub global_normalized_entropy: f64,
    /// 1 - distance * (frequency / total ensemble frequencies)
    pub itfdf_similarity: f64,
    /// (evidence + confidence) * snr + itfdf + 1/(fragmentation + 1)
    pub potential: f64,
    /// p(e|h) * (1 - conditional probability of the present window)
    pub confluence: f64,
    /// Mean per-matched-symbol tf-idf
    pub tfidf_score: f64,
}

/// Working-memory retention mode applied after a successful learn
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StmMode {
    /// Clear the working memory entirely
    #[default]
    #[serde(rename = "CLEAR")]
    Clear,
    /// Retain a sliding window of the most recent events
    #[serde(rename = "ROLLING")]
    Rolling,
}

/// Metric used to rank surviving predictions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankMetric {
    #[default]
    Potential,
    Confidence,
    Evidence,
    ItfdfSimilarity,
    TfidfScore,
}

/// Resolved per-session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Auto-learn when the STM reaches this many events; 0 disables
    pub max_pattern_length: usize,
    /// Retention mode after learn
    pub stm_mode: StmMode,
    /// Emotive rolling-window size, >= 1
    pub persistence: usize,
    /// Minimum approximate similarity for recall, 0.0..=1.0
    pub recall_threshold: f64,
    /// Upper bound on returned predictions
    pub max_predictions: usize,
    /// Candidate cap after pre-screening, >= 1
    pub search_depth: usize,
    /// Stored events are always sorted; this flag only affects
    /// experimental input paths and never the stored pattern form
    pub sort: bool,
    /// Compute the full metric block on predictions
    pub process_predictions: bool,
    /// Ranking metric for predictions
    pub rank_sort_algo: RankMetric,
    /// Session idle lifetime
    pub session_ttl: Duration,
    /// Extend the TTL on every successful access
    pub session_auto_extend: bool,
    /// Cosine similarity above which a new vector collapses onto an
    /// existing synthetic symbol
    pub vector_similarity_threshold: f32,
    /// Neighbors fetched per vector during substitution
    pub vector_knn: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_pattern_length: defaults::DEFAULT_MAX_PATTERN_LENGTH,
            stm_mode: StmMode::Clear,
            persistence: defaults::DEFAULT_PERSISTENCE,
            recall_threshold: defaults::DEFAULT_RECALL_THRESHOLD,
            max_predictions: defaults::DEFAULT_MAX_PREDICTIONS,
            search_depth: defaults::DEFAULT_SEARCH_DEPTH,
            sort: true,
            process_predictions: true,
            rank_sort_algo: RankMetric::Potential,
            session_ttl: defaults::DEFAULT_SESSION_TTL,
            session_auto_extend: true,
            vector_similarity_threshold: defaults::DEFAULT_VECTOR_SIMILARITY_THRESHOLD,
            vector_knn: defaults::DEFAULT_VECTOR_KNN,
        }
    }
}

impl SessionConfig {
    /// Validate configured ranges
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.recall_threshold) {
            return Err(Error::invalid_input_with(
                "recall_threshold must be within 0.0..=1.0",
                [(
                    "recall_threshold".to_string(),
                    self.recall_threshold.to_string(),
                )],
            ));
        }
        if self.persistence == 0 {
            return Err(Error::invalid_input("persistence must be >= 1"));
        }
        if self.search_depth == 0 {
            return Err(Error::invalid_input("search_depth must be >= 1"));
        }
        Ok(())
    }
}

/// Per-session overrides applied on top of the engine defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pattern_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stm_mode: Option<StmMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistence: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recall_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_predictions: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_depth: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_predictions: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank_sort_algo: Option<RankMetric>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_ttl: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_auto_extend: Option<bool>,
}

impl SessionOptions {
    /// Resolve overrides against engine-level defaults
    pub fn resolve(&self, base: &SessionConfig) -> SessionConfig {
        let mut config = base.clone();
        if let Some(v) = self.max_pattern_length {
            config.max_pattern_length = v;
        }
        if let Some(v) = self.stm_mode {
            config.stm_mode = v;
        }
        if let Some(v) = self.persistence {
            config.persistence = v;
        }
        if let Some(v) = self.recall_threshold {
            config.recall_threshold = v;
        }
        if let Some(v) = self.max_predictions {
            config.max_predictions = v;
        }
        if let Some(v) = self.search_depth {
            config.search_depth = v;
        }
        if let Some(v) = self.sort {
            config.sort = v;
        }
        if let Some(v) = self.process_predictions {
            config.process_predictions = v;
        }
        if let Some(v) = self.rank_sort_algo {
            config.rank_sort_algo = v;
        }
        if let Some(v) = self.session_ttl {
            config.session_ttl = v;
        }
        if let Some(v) = self.session_auto_extend {
            config.session_auto_extend = v;
        }
        config
    }
}

/// Per-call prediction overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_predictions: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank_sort_algo: Option<RankMetric>,
}

/// Engine-wide configuration: session defaults plus backend knobs
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Defaults applied to sessions created without overrides
    pub session: SessionConfig,
    /// Fixed vector dimension; `None` detects at first upsert per kb
    pub vector_dimension: Option<usize>,
    /// Retry policy for retriable backend failures
    pub retry: crate::retry::RetryConfig,
    /// Per-backend-call timeout inside a public operation
    pub backend_call_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            vector_dimension: None,
            retry: crate::retry::RetryConfig::default(),
            backend_call_timeout: Some(defaults::DEFAULT_BACKEND_CALL_TIMEOUT),
        }
    }
}

/// Absolute time budget for one public operation
///
/// `Deadline::none()` means unbounded. The engine checks the deadline
/// before each suspension point and bounds backend calls by the
/// remaining budget.
#[derive(Debug, Clone, Copy, Default)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// No time budget
    pub fn none() -> Self {
        Self(None)
    }

    /// Budget expiring `timeout` from now
    pub fn after(timeout: Duration) -> Self {
        Self(Some(Instant::now() + timeout))
    }

    /// Budget expiring at an absolute instant
    pub fn at(instant: Instant) -> Self {
        Self(Some(instant))
    }

    /// Remaining budget; `None` when unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.0.map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// True once the budget is exhausted
    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|left| left.is_zero())
    }

    /// Fail with `DeadlineExceeded` once the budget is exhausted
    pub fn check(&self, operation: &'static str) -> Result<()> {
        if self.is_expired() {
            return Err(Error::DeadlineExceeded { operation });
        }
        Ok(())
    }
}
