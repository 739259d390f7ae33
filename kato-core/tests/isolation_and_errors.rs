//! Session/kb isolation, concurrency, and failure propagation

use std::sync::Arc;
use std::time::Duration;

use kato_core::engine::PatternEngine;
use kato_core::storage::memory::{
    InMemoryMetadataCache, InMemoryPatternStore, InMemoryVectorIndex,
};
use kato_core::types::{Deadline, Observation, PredictOptions, SessionOptions};
use kato_core::{EngineConfig, MetadataCache};
use kato_test_utils::{
    learn_sequence, observation, BrokenPatternStore, FlakyPatternStore, ToggleFailCache,
};

#[tokio::test]
async fn empty_observation_is_rejected() {
    let engine = PatternEngine::new();
    let session = engine
        .create_session("kb", &SessionOptions::default())
        .unwrap();

    let err = engine
        .observe(&session, Observation::default(), Deadline::none())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalid_input");

    // Nothing was appended
    let stm = engine.get_stm(&session).await.unwrap();
    assert!(stm.events.is_empty());
    assert_eq!(stm.observation_count, 0);
}

#[tokio::test]
async fn learn_with_too_few_symbols_fails() {
    let engine = PatternEngine::new();
    let session = engine
        .create_session("kb", &SessionOptions::default())
        .unwrap();

    engine
        .observe(&session, observation(&["only"]), Deadline::none())
        .await
        .unwrap();
    let err = engine.learn(&session, Deadline::none()).await.unwrap_err();
    assert_eq!(err.code(), "too_few_symbols");
    // The failed learn leaves the working memory intact
    assert_eq!(engine.get_stm(&session).await.unwrap().events.len(), 1);
}

#[tokio::test]
async fn predict_with_fewer_than_two_symbols_is_empty() {
    let engine = PatternEngine::new();
    let session = engine
        .create_session("kb", &SessionOptions::default())
        .unwrap();

    learn_sequence(&engine, &session, &[&["a"], &["b"]])
        .await
        .unwrap();
    engine.clear_stm(&session).await.unwrap();
    engine
        .observe(&session, observation(&["a"]), Deadline::none())
        .await
        .unwrap();

    let predictions = engine
        .predict(&session, &PredictOptions::default(), Deadline::none())
        .await
        .unwrap();
    assert!(predictions.is_empty());
}

#[tokio::test]
async fn distinct_kbs_never_cross_pollinate() {
    let engine = PatternEngine::new();
    let session_a = engine
        .create_session("kb-a", &SessionOptions::default())
        .unwrap();
    let session_b = engine
        .create_session("kb-b", &SessionOptions::default())
        .unwrap();

    learn_sequence(&engine, &session_a, &[&["a"], &["b"], &["c"]])
        .await
        .unwrap();

    // The same symbols observed in another kb find nothing
    engine
        .observe(&session_b, observation(&["a"]), Deadline::none())
        .await
        .unwrap();
    engine
        .observe(&session_b, observation(&["b"]), Deadline::none())
        .await
        .unwrap();
    let predictions = engine
        .predict(&session_b, &PredictOptions::default(), Deadline::none())
        .await
        .unwrap();
    assert!(predictions.is_empty());

    let learned = learn_sequence(&engine, &session_a, &[&["a"], &["b"], &["c"]])
        .await
        .unwrap();
    let err = engine
        .get_pattern("kb-b", &learned.pattern_name, Deadline::none())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not_found");
}

#[tokio::test]
async fn observing_in_one_session_does_not_change_anothers_prediction() {
    let engine = PatternEngine::new();
    let session_a = engine
        .create_session("kb-a", &SessionOptions::default())
        .unwrap();
    let session_b = engine
        .create_session("kb-b", &SessionOptions::default())
        .unwrap();

    learn_sequence(&engine, &session_b, &[&["x"], &["y"], &["z"]])
        .await
        .unwrap();
    engine.clear_stm(&session_b).await.unwrap();
    engine
        .observe(&session_b, observation(&["x"]), Deadline::none())
        .await
        .unwrap();
    engine
        .observe(&session_b, observation(&["y"]), Deadline::none())
        .await
        .unwrap();

    let baseline = engine
        .predict(&session_b, &PredictOptions::default(), Deadline::none())
        .await
        .unwrap();

    engine
        .observe(&session_a, observation(&["x", "noise"]), Deadline::none())
        .await
        .unwrap();

    let after = engine
        .predict(&session_b, &PredictOptions::default(), Deadline::none())
        .await
        .unwrap();
    assert_eq!(baseline, after);
}

#[tokio::test]
async fn concurrent_sessions_learn_independently() {
    let engine = Arc::new(PatternEngine::new());

    let mut handles = Vec::new();
    for index in 0..8 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            let session = engine
                .create_session("kb", &SessionOptions::default())
                .unwrap();
            let first = format!("s{index}-first");
            let second = format!("s{index}-second");
            learn_sequence(&engine, &session, &[&[first.as_str()], &[second.as_str()]])
                .await
                .unwrap()
        }));
    }

    let mut names = Vec::new();
    for handle in handles {
        let outcome = handle.await.unwrap();
        assert!(outcome.created);
        names.push(outcome.pattern_name);
    }
    names.sort();
    names.dedup();
    assert_eq!(names.len(), 8);
}

#[tokio::test]
async fn broken_store_surfaces_corpus_unavailable() {
    let engine = PatternEngine::with_backends(
        EngineConfig::default(),
        Arc::new(BrokenPatternStore),
        Arc::new(InMemoryMetadataCache::new()),
        Arc::new(InMemoryVectorIndex::new()),
    );
    let session = engine
        .create_session("kb", &SessionOptions::default())
        .unwrap();

    engine
        .observe(&session, observation(&["a"]), Deadline::none())
        .await
        .unwrap();
    engine
        .observe(&session, observation(&["b"]), Deadline::none())
        .await
        .unwrap();

    let learn_err = engine.learn(&session, Deadline::none()).await.unwrap_err();
    assert_eq!(learn_err.code(), "corpus_unavailable");

    let predict_err = engine
        .predict(&session, &PredictOptions::default(), Deadline::none())
        .await
        .unwrap_err();
    assert_eq!(predict_err.code(), "corpus_unavailable");
}

#[tokio::test]
async fn transient_store_failures_are_retried() {
    let store = Arc::new(FlakyPatternStore::new(InMemoryPatternStore::new(), 1));
    let engine = PatternEngine::with_backends(
        EngineConfig {
            retry: kato_core::retry::RetryConfig::new()
                .with_base_delay(Duration::from_millis(1))
                .with_jitter(0.0),
            ..EngineConfig::default()
        },
        Arc::clone(&store) as Arc<dyn kato_core::PatternStore>,
        Arc::new(InMemoryMetadataCache::new()),
        Arc::new(InMemoryVectorIndex::new()),
    );
    let session = engine
        .create_session("kb", &SessionOptions::default())
        .unwrap();

    let outcome = learn_sequence(&engine, &session, &[&["a"], &["b"]])
        .await
        .unwrap();
    assert!(outcome.created);
    // First put failed, the retry succeeded
    assert!(store.calls() >= 2);
    assert_eq!(engine.retry_metrics().total(), 1);
    assert_eq!(engine.retry_metrics().success_count(), 1);
}

#[tokio::test]
async fn expired_deadline_fails_observe() {
    let engine = PatternEngine::new();
    let session = engine
        .create_session("kb", &SessionOptions::default())
        .unwrap();

    let err = engine
        .observe(
            &session,
            observation(&["a"]),
            Deadline::after(Duration::from_millis(0)),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "deadline_exceeded");
    assert!(engine.get_stm(&session).await.unwrap().events.is_empty());
}

#[tokio::test]
async fn cache_failure_after_durable_write_repairs_on_read() {
    let cache = Arc::new(ToggleFailCache::new(InMemoryMetadataCache::new()));
    let engine = PatternEngine::with_backends(
        EngineConfig::default(),
        Arc::new(InMemoryPatternStore::new()),
        Arc::clone(&cache) as Arc<dyn MetadataCache>,
        Arc::new(InMemoryVectorIndex::new()),
    );
    let session = engine
        .create_session("kb", &SessionOptions::default())
        .unwrap();

    cache.set_fail_writes(true);
    let outcome = learn_sequence(&engine, &session, &[&["a"], &["b"], &["c"]])
        .await
        .unwrap();
    assert!(outcome.created);
    // The learn succeeded but the counters are stale
    assert_eq!(
        cache.get_global_stats("kb").await.unwrap().total_unique_patterns,
        0
    );

    cache.set_fail_writes(false);
    engine.clear_stm(&session).await.unwrap();
    engine
        .observe(&session, observation(&["a"]), Deadline::none())
        .await
        .unwrap();
    engine
        .observe(&session, observation(&["b"]), Deadline::none())
        .await
        .unwrap();

    // The next read repairs the cache from the store, so metrics see
    // consistent statistics.
    let predictions = engine
        .predict(&session, &PredictOptions::default(), Deadline::none())
        .await
        .unwrap();
    assert_eq!(predictions.len(), 1);
    let globals = cache.get_global_stats("kb").await.unwrap();
    assert_eq!(globals.total_unique_patterns, 1);
    assert_eq!(globals.total_symbols_in_patterns_frequencies, 3);
}

#[tokio::test]
async fn unique_pattern_count_only_moves_on_first_insertion() {
    let cache = Arc::new(InMemoryMetadataCache::new());
    let engine = PatternEngine::with_backends(
        EngineConfig::default(),
        Arc::new(InMemoryPatternStore::new()),
        Arc::clone(&cache) as Arc<dyn MetadataCache>,
        Arc::new(InMemoryVectorIndex::new()),
    );
    let session = engine
        .create_session("kb", &SessionOptions::default())
        .unwrap();

    learn_sequence(&engine, &session, &[&["a"], &["b"]])
        .await
        .unwrap();
    learn_sequence(&engine, &session, &[&["a"], &["b"]])
        .await
        .unwrap();
    learn_sequence(&engine, &session, &[&["a"], &["c"]])
        .await
        .unwrap();

    let globals = cache.get_global_stats("kb").await.unwrap();
    assert_eq!(globals.total_unique_patterns, 2);
    // Symbol totals stay frequency-weighted: a=3, b=2, c=1
    assert_eq!(globals.total_symbols_in_patterns_frequencies, 6);
    let a = cache.get_symbol_stats("kb", "a").await.unwrap().unwrap();
    assert_eq!(a.frequency, 3);
    assert_eq!(a.pattern_member_frequency, 2);
}

#[tokio::test]
async fn clear_all_wipes_a_kb_and_its_sessions() {
    let engine = PatternEngine::new();
    let session = engine
        .create_session("kb", &SessionOptions::default())
        .unwrap();

    let learned = learn_sequence(&engine, &session, &[&["a"], &["b"]])
        .await
        .unwrap();
    engine
        .observe(&session, observation(&["pending"]), Deadline::none())
        .await
        .unwrap();

    engine.clear_all("kb", Deadline::none()).await.unwrap();

    assert!(engine.get_stm(&session).await.unwrap().events.is_empty());
    let err = engine
        .get_pattern("kb", &learned.pattern_name, Deadline::none())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not_found");

    // The kb starts fresh: the same sequence is a new insertion
    let relearned = learn_sequence(&engine, &session, &[&["a"], &["b"]])
        .await
        .unwrap();
    assert!(relearned.created);
}

#[tokio::test]
async fn deleted_sessions_are_gone() {
    let engine = PatternEngine::new();
    let session = engine
        .create_session("kb", &SessionOptions::default())
        .unwrap();
    engine.delete_session(&session).unwrap();

    let err = engine
        .observe(&session, observation(&["a"]), Deadline::none())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not_found");
}

#[tokio::test]
async fn disabled_predictions_return_empty() {
    let engine = PatternEngine::new();
    let session = engine
        .create_session(
            "kb",
            &SessionOptions {
                process_predictions: Some(false),
                ..SessionOptions::default()
            },
        )
        .unwrap();

    learn_sequence(&engine, &session, &[&["a"], &["b"]])
        .await
        .unwrap();
    engine
        .observe(&session, observation(&["a", "b"]), Deadline::none())
        .await
        .unwrap();
    let predictions = engine
        .predict(&session, &PredictOptions::default(), Deadline::none())
        .await
        .unwrap();
    assert!(predictions.is_empty());
}
