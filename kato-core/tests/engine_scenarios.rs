//! End-to-end engine scenarios over in-memory backends

use kato_core::engine::PatternEngine;
use kato_core::hashing::{hash_pattern, parse_pattern_name};
use kato_core::types::{
    Deadline, PredictOptions, SessionConfig, SessionOptions, StmMode,
};
use kato_core::EngineConfig;
use kato_test_utils::{learn_sequence, observation, observation_with_emotives};

fn events(spec: &[&[&str]]) -> Vec<Vec<String>> {
    spec.iter()
        .map(|e| e.iter().map(ToString::to_string).collect())
        .collect()
}

#[tokio::test]
async fn basic_sequential_match() -> anyhow::Result<()> {
    let engine = PatternEngine::new();
    let session = engine.create_session("kb", &SessionOptions::default())?;

    learn_sequence(&engine, &session, &[&["a"], &["b"], &["c"], &["d"]]).await?;
    engine.clear_stm(&session).await?;

    engine
        .observe(&session, observation(&["b"]), Deadline::none())
        .await?;
    engine
        .observe(&session, observation(&["c"]), Deadline::none())
        .await?;

    let predictions = engine
        .predict(&session, &PredictOptions::default(), Deadline::none())
        .await?;
    assert_eq!(predictions.len(), 1);

    let top = &predictions[0];
    assert_eq!(top.past, events(&[&["a"]]));
    assert_eq!(top.present, events(&[&["b"], &["c"]]));
    assert_eq!(top.future, events(&[&["d"]]));
    assert!(top.missing.is_empty());
    assert!(top.extras.is_empty());
    assert_eq!(top.matches, vec!["b", "c"]);
    assert_eq!(top.fragmentation, 0);
    Ok(())
}

#[tokio::test]
async fn partial_match_with_missing() -> anyhow::Result<()> {
    let engine = PatternEngine::new();
    let session = engine.create_session("kb", &SessionOptions::default())?;

    learn_sequence(&engine, &session, &[&["a", "b"], &["c", "d"], &["e", "f"]]).await?;
    engine.clear_stm(&session).await?;

    engine
        .observe(&session, observation(&["a"]), Deadline::none())
        .await?;
    engine
        .observe(&session, observation(&["c"]), Deadline::none())
        .await?;

    let predictions = engine
        .predict(&session, &PredictOptions::default(), Deadline::none())
        .await?;
    let top = &predictions[0];
    assert!(top.past.is_empty());
    assert_eq!(top.present, events(&[&["a", "b"], &["c", "d"]]));
    assert_eq!(top.future, events(&[&["e", "f"]]));
    assert_eq!(top.missing, vec!["b", "d"]);
    assert!(top.extras.is_empty());
    assert_eq!(top.matches, vec!["a", "c"]);
    Ok(())
}

#[tokio::test]
async fn extras_present() -> anyhow::Result<()> {
    let engine = PatternEngine::new();
    let session = engine.create_session("kb", &SessionOptions::default())?;

    learn_sequence(&engine, &session, &[&["cat"], &["dog"]]).await?;
    engine.clear_stm(&session).await?;

    engine
        .observe(&session, observation(&["cat", "bird"]), Deadline::none())
        .await?;
    engine
        .observe(&session, observation(&["dog", "fish"]), Deadline::none())
        .await?;

    let predictions = engine
        .predict(&session, &PredictOptions::default(), Deadline::none())
        .await?;
    let top = &predictions[0];
    assert!(top.past.is_empty());
    assert_eq!(top.present, events(&[&["cat"], &["dog"]]));
    assert!(top.future.is_empty());
    assert!(top.missing.is_empty());
    assert_eq!(top.extras, vec!["bird", "fish"]);
    assert_eq!(top.matches, vec!["cat", "dog"]);
    // Half of the observed symbols are noise
    assert!((top.snr - 0.5).abs() < 1e-12);
    Ok(())
}

#[tokio::test]
async fn relearn_increments_frequency() -> anyhow::Result<()> {
    let engine = PatternEngine::new();
    let session = engine.create_session("kb", &SessionOptions::default())?;

    let first = learn_sequence(&engine, &session, &[&["x"], &["y"]]).await?;
    assert!(first.created);
    let second = learn_sequence(&engine, &session, &[&["x"], &["y"]]).await?;
    assert!(!second.created);
    assert_eq!(first.pattern_name, second.pattern_name);

    let record = engine
        .get_pattern("kb", &first.pattern_name, Deadline::none())
        .await?;
    assert_eq!(record.frequency, 2);
    Ok(())
}

#[tokio::test]
async fn rolling_window_emotives_with_persistence_three() -> anyhow::Result<()> {
    let engine = PatternEngine::new();
    let session = engine.create_session(
        "kb",
        &SessionOptions {
            persistence: Some(3),
            ..SessionOptions::default()
        },
    )?;

    let mut name = String::new();
    for joy in [0.8, 0.6, 0.4, 0.2] {
        engine
            .observe(
                &session,
                observation_with_emotives(&["x"], &[("joy", joy)]),
                Deadline::none(),
            )
            .await?;
        engine
            .observe(&session, observation(&["y"]), Deadline::none())
            .await?;
        let outcome = engine.learn(&session, Deadline::none()).await?;
        name = outcome.pattern_name;
    }

    let record = engine.get_pattern("kb", &name, Deadline::none()).await?;
    assert_eq!(record.frequency, 4);
    let window: Vec<f64> = record.emotive_windows["joy"].iter().copied().collect();
    assert_eq!(window, vec![0.6, 0.4, 0.2]);
    Ok(())
}

#[tokio::test]
async fn byte_identical_vectors_share_a_symbol_across_sessions() -> anyhow::Result<()> {
    let engine = PatternEngine::new();
    let first = engine.create_session("kb", &SessionOptions::default())?;
    let second = engine.create_session("kb", &SessionOptions::default())?;

    let v1 = vec![0.25_f32, -1.5, 3.0];
    engine
        .observe(
            &first,
            kato_test_utils::observation_with_vectors(&["a"], &[&v1]),
            Deadline::none(),
        )
        .await?;
    engine
        .observe(
            &second,
            kato_test_utils::observation_with_vectors(&["b"], &[&v1]),
            Deadline::none(),
        )
        .await?;

    let stm_first = engine.get_stm(&first).await?;
    let stm_second = engine.get_stm(&second).await?;
    let vctr_first = stm_first.events[0]
        .iter()
        .find(|s| s.starts_with("VCTR|"))
        .unwrap()
        .clone();
    let vctr_second = stm_second.events[0]
        .iter()
        .find(|s| s.starts_with("VCTR|"))
        .unwrap()
        .clone();
    assert_eq!(vctr_first, vctr_second);
    Ok(())
}

#[tokio::test]
async fn learn_then_get_pattern_round_trips_the_hash() -> anyhow::Result<()> {
    let engine = PatternEngine::new();
    let session = engine.create_session("kb", &SessionOptions::default())?;

    let outcome = learn_sequence(&engine, &session, &[&["m", "n"], &["o"]]).await?;
    let record = engine
        .get_pattern("kb", &outcome.pattern_name, Deadline::none())
        .await?;

    let rehashed = hash_pattern(&record.events)?;
    assert_eq!(rehashed, parse_pattern_name(&outcome.pattern_name)?);
    assert_eq!(record.length, 3);
    Ok(())
}

#[tokio::test]
async fn successive_learns_in_rolling_mode_are_idempotent() -> anyhow::Result<()> {
    let config = EngineConfig {
        session: SessionConfig {
            stm_mode: StmMode::Rolling,
            ..SessionConfig::default()
        },
        ..EngineConfig::default()
    };
    let engine = PatternEngine::with_config(config);
    let session = engine.create_session("kb", &SessionOptions::default())?;

    engine
        .observe(&session, observation(&["x"]), Deadline::none())
        .await?;
    engine
        .observe(&session, observation(&["y"]), Deadline::none())
        .await?;

    let first = engine.learn(&session, Deadline::none()).await?;
    let second = engine.learn(&session, Deadline::none()).await?;
    assert_eq!(first.pattern_name, second.pattern_name);

    let record = engine
        .get_pattern("kb", &first.pattern_name, Deadline::none())
        .await?;
    assert_eq!(record.frequency, 2);
    Ok(())
}

#[tokio::test]
async fn auto_learn_triggers_at_max_pattern_length() -> anyhow::Result<()> {
    let engine = PatternEngine::new();
    let session = engine.create_session(
        "kb",
        &SessionOptions {
            max_pattern_length: Some(3),
            ..SessionOptions::default()
        },
    )?;

    for symbol in ["a", "b"] {
        let outcome = engine
            .observe(&session, observation(&[symbol]), Deadline::none())
            .await?;
        assert!(outcome.auto_learned.is_none());
    }
    let third = engine
        .observe(&session, observation(&["c"]), Deadline::none())
        .await?;
    let learned = third.auto_learned.unwrap();
    assert!(learned.created);
    // CLEAR mode empties the working memory after the auto-learn
    assert_eq!(third.stm_length, 0);

    let record = engine
        .get_pattern("kb", &learned.pattern_name, Deadline::none())
        .await?;
    assert_eq!(record.events, events(&[&["a"], &["b"], &["c"]]));
    Ok(())
}

#[tokio::test]
async fn rolling_mode_retains_a_sliding_window() -> anyhow::Result<()> {
    let engine = PatternEngine::new();
    let session = engine.create_session(
        "kb",
        &SessionOptions {
            max_pattern_length: Some(3),
            stm_mode: Some(StmMode::Rolling),
            ..SessionOptions::default()
        },
    )?;

    for symbol in ["a", "b", "c"] {
        engine
            .observe(&session, observation(&[symbol]), Deadline::none())
            .await?;
    }

    let stm = engine.get_stm(&session).await?;
    assert_eq!(stm.events, events(&[&["b"], &["c"]]));
    assert_eq!(stm.observation_count, 3);
    Ok(())
}

#[tokio::test]
async fn predictions_rank_by_frequency_weighted_potential() -> anyhow::Result<()> {
    let engine = PatternEngine::new();
    let session = engine.create_session("kb", &SessionOptions::default())?;

    // One pattern learned twice, a sibling learned once; both share
    // the observed prefix.
    learn_sequence(&engine, &session, &[&["go"], &["left"]]).await?;
    learn_sequence(&engine, &session, &[&["go"], &["left"]]).await?;
    learn_sequence(&engine, &session, &[&["go"], &["right"]]).await?;
    engine.clear_stm(&session).await?;

    engine
        .observe(&session, observation(&["go"]), Deadline::none())
        .await?;
    engine
        .observe(&session, observation(&["left"]), Deadline::none())
        .await?;

    let predictions = engine
        .predict(&session, &PredictOptions::default(), Deadline::none())
        .await?;
    assert!(!predictions.is_empty());
    assert_eq!(predictions[0].frequency, 2);
    assert_eq!(predictions[0].matches, vec!["go", "left"]);
    Ok(())
}

#[tokio::test]
async fn prediction_wire_shape_is_snake_case() -> anyhow::Result<()> {
    let engine = PatternEngine::new();
    let session = engine.create_session("kb", &SessionOptions::default())?;

    learn_sequence(&engine, &session, &[&["a"], &["b"]]).await?;
    engine.clear_stm(&session).await?;
    engine
        .observe(&session, observation(&["a", "b"]), Deadline::none())
        .await?;

    let predictions = engine
        .predict(&session, &PredictOptions::default(), Deadline::none())
        .await?;
    let json = serde_json::to_value(&predictions[0])?;
    for field in [
        "name",
        "frequency",
        "events",
        "past",
        "present",
        "future",
        "matches",
        "missing",
        "extras",
        "emotives",
        "metadata",
        "similarity",
        "evidence",
        "confidence",
        "snr",
        "fragmentation",
        "normalized_entropy",
        "global_normalized_entropy",
        "itfdf_similarity",
        "potential",
        "confluence",
        "tfidf_score",
    ] {
        assert!(json.get(field).is_some(), "missing field {field}");
    }
    assert!(json["name"].as_str().unwrap().starts_with("PTRN|"));
    Ok(())
}
