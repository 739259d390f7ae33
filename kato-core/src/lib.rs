#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_docs_in_private_items)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::float_cmp)]

//! # KATO Core
//!
//! Deterministic memory-and-prediction engine. Ingests ordered
//! multi-modal observations (symbolic strings, dense vectors, scalar
//! emotives, categorical metadata), learns them as reusable patterns,
//! and returns explainable temporal predictions: what occurred
//! before, what is occurring now, what is likely next.
//!
//! ## Core Concepts
//!
//! - **Events**: one time-step's canonicalized symbol set (sorted,
//!   unique, byte-exact)
//! - **Patterns**: ordered event sequences identified by a sha1 over
//!   their canonical serialization; re-learning the same sequence
//!   increments frequency, never duplicates
//! - **Sessions**: isolated working memories bound to a kb namespace;
//!   operations on one session serialize, distinct sessions run in
//!   parallel
//! - **Predictions**: past/present/future segmentation of matched
//!   patterns with missing/extras derivation and a full metric block
//!
//! ## Module Organization
//!
//! ### Primary APIs
//! - [`engine`]: the `PatternEngine` control surface
//! - [`session`]: per-session working memory and the registry
//! - [`corpus`]: multi-stage candidate pre-screening
//! - [`storage`]: backend trait abstractions and in-memory backends
//!
//! ### Support Modules
//! - [`hashing`]: deterministic identifiers and canonicalization
//! - [`matcher`] / [`segmenter`] / [`metrics`]: the prediction pipeline
//! - [`vector`]: typed adapter over the pluggable vector index
//! - [`types`]: wire shapes and configuration
//!
//! ## Quick Start
//!
//! ```
//! use kato_core::engine::PatternEngine;
//! use kato_core::types::{Deadline, Observation, PredictOptions, SessionOptions};
//!
//! #[tokio::main]
//! async fn main() -> kato_core::Result<()> {
//!     let engine = PatternEngine::new();
//!     let session = engine.create_session("tenant-1", &SessionOptions::default())?;
//!
//!     // 1. Observe a sequence
//!     for step in ["wake", "coffee", "commute"] {
//!         engine
//!             .observe(&session, Observation::from_strings([step]), Deadline::none())
//!             .await?;
//!     }
//!
//!     // 2. Learn it as a pattern
//!     let outcome = engine.learn(&session, Deadline::none()).await?;
//!     println!("learned {}", outcome.pattern_name);
//!
//!     // 3. Observe a partial sequence and predict
//!     engine
//!         .observe(&session, Observation::from_strings(["coffee"]), Deadline::none())
//!         .await?;
//!     engine
//!         .observe(&session, Observation::from_strings(["commute"]), Deadline::none())
//!         .await?;
//!     let predictions = engine
//!         .predict(&session, &PredictOptions::default(), Deadline::none())
//!         .await?;
//!     for prediction in &predictions {
//!         println!("{} potential={:.3}", prediction.name, prediction.potential);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Determinism
//!
//! Identical input sequences produce bit-identical outputs: event
//! symbols are stored sorted, pattern names are pure functions of
//! their events, candidate iteration uses ordered containers, and
//! every ranking tie breaks by ascending pattern name. Wall clocks
//! never influence stored values.

pub mod constants;
pub mod corpus;
pub mod engine;
pub mod error;
pub mod hashing;
pub mod matcher;
pub mod metrics;
pub mod observation;
pub mod retry;
pub mod segmenter;
pub mod session;
pub mod storage;
pub mod tracing;
pub mod types;
pub mod vector;

// Re-export commonly used types
pub use engine::PatternEngine;
pub use error::{Error, Result};
pub use matcher::MatchOutcome;
pub use metrics::{MetricBlock, StatsView};
pub use segmenter::Segmentation;
pub use session::{SessionManager, WorkingMemory};
pub use storage::memory::{InMemoryMetadataCache, InMemoryPatternStore, InMemoryVectorIndex};
pub use storage::{MetadataCache, PatternStore, VectorIndex};
pub use types::{
    Deadline, EngineConfig, Event, GlobalStats, KbId, LearnOutcome, Observation, ObserveOutcome,
    PatternName, PatternRecord, PredictOptions, Prediction, PutOutcome, RankMetric, SessionConfig,
    SessionOptions, StmMode, StmSnapshot, SymbolStats,
};
pub use vector::VectorIndexClient;
