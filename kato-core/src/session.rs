//! Per-session working memory and the session registry
//!
//! Each session is a logical actor: its working memory sits behind a
//! `tokio::sync::Mutex`, so operations on one session serialize while
//! distinct sessions run in parallel. The registry itself is a
//! read-mostly map; expired entries are reaped lazily on access and
//! whenever a session is created.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{Event, KbId, SessionConfig, StmSnapshot};

/// Unlearned events plus the per-observation accumulators
#[derive(Debug, Default)]
pub struct WorkingMemory {
    events: Vec<Event>,
    emotive_accumulator: Vec<BTreeMap<String, f64>>,
    metadata_accumulator: Vec<BTreeMap<String, serde_json::Value>>,
    observation_count: u64,
}

impl WorkingMemory {
    /// Events currently held
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Total symbol count across held events
    pub fn total_symbols(&self) -> usize {
        self.events.iter().map(Vec::len).sum()
    }

    /// Monotonic per-session observation counter
    pub fn observation_count(&self) -> u64 {
        self.observation_count
    }

    /// Append one canonicalized event with its observation context
    pub fn push(
        &mut self,
        event: Event,
        emotives: BTreeMap<String, f64>,
        metadata: BTreeMap<String, serde_json::Value>,
    ) -> u64 {
        self.events.push(event);
        self.emotive_accumulator.push(emotives);
        self.metadata_accumulator.push(metadata);
        self.observation_count += 1;
        self.observation_count
    }

    /// Arithmetic mean per emotive key over the accumulator entries
    /// that carry the key
    pub fn aggregate_emotives(&self) -> BTreeMap<String, f64> {
        let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
        for entry in &self.emotive_accumulator {
            for (key, value) in entry {
                let slot = sums.entry(key.clone()).or_insert((0.0, 0));
                slot.0 += value;
                slot.1 += 1;
            }
        }
        sums.into_iter()
            .map(|(key, (sum, count))| (key, sum / count as f64))
            .collect()
    }

    /// Set-union of string-coerced metadata values per key
    pub fn aggregate_metadata(&self) -> BTreeMap<String, BTreeSet<String>> {
        let mut sets: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for entry in &self.metadata_accumulator {
            for (key, value) in entry {
                sets.entry(key.clone())
                    .or_default()
                    .insert(coerce_metadata_value(value));
            }
        }
        sets
    }

    /// Snapshot for `get_stm`
    pub fn snapshot(&self) -> StmSnapshot {
        StmSnapshot {
            events: self.events.clone(),
            emotives: self.emotive_accumulator.clone(),
            metadata: self.metadata_accumulator.clone(),
            observation_count: self.observation_count,
        }
    }

    /// Drop events and accumulators; the observation counter survives
    pub fn clear(&mut self) {
        self.events.clear();
        self.emotive_accumulator.clear();
        self.metadata_accumulator.clear();
    }

    /// Retain the newest `keep` events and their accumulator entries
    pub fn roll(&mut self, keep: usize) {
        let len = self.events.len();
        if len > keep {
            self.events.drain(..len - keep);
            self.emotive_accumulator.drain(..len - keep);
            self.metadata_accumulator.drain(..len - keep);
        }
    }
}

/// JSON string values pass through; everything else keeps its JSON text
fn coerce_metadata_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One session: kb binding, resolved config, actor-serialized STM
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub kb_id: KbId,
    pub config: SessionConfig,
    pub stm: tokio::sync::Mutex<WorkingMemory>,
    expires_at: Mutex<Instant>,
}

impl Session {
    fn new(kb_id: KbId, config: SessionConfig) -> Self {
        let expires_at = Instant::now() + config.session_ttl;
        Self {
            id: Uuid::new_v4().to_string(),
            kb_id,
            config,
            stm: tokio::sync::Mutex::new(WorkingMemory::default()),
            expires_at: Mutex::new(expires_at),
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= *self.expires_at.lock()
    }

    /// Extend the TTL when auto-extend is enabled
    fn touch(&self) {
        if self.config.session_auto_extend {
            *self.expires_at.lock() = Instant::now() + self.config.session_ttl;
        }
    }
}

/// Registry of live sessions
#[derive(Default)]
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session bound to a kb; returns its opaque id
    pub fn create(&self, kb_id: KbId, config: SessionConfig) -> Result<String> {
        config.validate()?;
        self.reap_expired();
        let session = Arc::new(Session::new(kb_id, config));
        let id = session.id.clone();
        self.sessions.write().insert(id.clone(), session);
        debug!(session_id = %id, "created session");
        Ok(id)
    }

    /// Look up a live session, extending its TTL on access
    pub fn get(&self, session_id: &str) -> Result<Arc<Session>> {
        let session = self
            .sessions
            .read()
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                kind: "session",
                key: session_id.to_string(),
            })?;
        if session.is_expired() {
            self.sessions.write().remove(session_id);
            return Err(Error::SessionExpired {
                session_id: session_id.to_string(),
            });
        }
        session.touch();
        Ok(session)
    }

    /// Remove a session
    pub fn delete(&self, session_id: &str) -> Result<()> {
        self.sessions
            .write()
            .remove(session_id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound {
                kind: "session",
                key: session_id.to_string(),
            })
    }

    /// Live sessions bound to a kb
    pub fn sessions_for_kb(&self, kb_id: &str) -> Vec<Arc<Session>> {
        self.sessions
            .read()
            .values()
            .filter(|session| session.kb_id == kb_id && !session.is_expired())
            .cloned()
            .collect()
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// True when no sessions are registered
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    fn reap_expired(&self) {
        let mut sessions = self.sessions.write();
        sessions.retain(|_, session| !session.is_expired());
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn event(symbols: &[&str]) -> Event {
        symbols.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn push_tracks_counter_and_symbols() {
        let mut wm = WorkingMemory::default();
        assert_eq!(wm.push(event(&["a"]), BTreeMap::new(), BTreeMap::new()), 1);
        assert_eq!(
            wm.push(event(&["b", "c"]), BTreeMap::new(), BTreeMap::new()),
            2
        );
        assert_eq!(wm.total_symbols(), 3);
        assert_eq!(wm.events().len(), 2);
    }

    #[test]
    fn clear_preserves_the_observation_counter() {
        let mut wm = WorkingMemory::default();
        wm.push(event(&["a"]), BTreeMap::new(), BTreeMap::new());
        wm.clear();
        assert_eq!(wm.events().len(), 0);
        assert_eq!(wm.observation_count(), 1);
    }

    #[test]
    fn roll_keeps_the_newest_tail() {
        let mut wm = WorkingMemory::default();
        for name in ["a", "b", "c", "d"] {
            wm.push(
                event(&[name]),
                BTreeMap::from([(name.to_string(), 1.0)]),
                BTreeMap::new(),
            );
        }
        wm.roll(2);
        assert_eq!(wm.events(), &[event(&["c"]), event(&["d"])]);
        // Accumulators stay aligned with the kept events
        let emotives = wm.aggregate_emotives();
        assert!(emotives.contains_key("c"));
        assert!(!emotives.contains_key("a"));
    }

    #[test]
    fn emotive_means_skip_missing_keys() {
        let mut wm = WorkingMemory::default();
        wm.push(
            event(&["a"]),
            BTreeMap::from([("joy".to_string(), 0.8)]),
            BTreeMap::new(),
        );
        wm.push(event(&["b"]), BTreeMap::new(), BTreeMap::new());
        wm.push(
            event(&["c"]),
            BTreeMap::from([("joy".to_string(), 0.4), ("fear".to_string(), 1.0)]),
            BTreeMap::new(),
        );

        let aggregated = wm.aggregate_emotives();
        assert!((aggregated["joy"] - 0.6).abs() < 1e-12);
        assert!((aggregated["fear"] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn metadata_union_coerces_to_strings() {
        let mut wm = WorkingMemory::default();
        wm.push(
            event(&["a"]),
            BTreeMap::new(),
            BTreeMap::from([("source".to_string(), serde_json::json!("camera"))]),
        );
        wm.push(
            event(&["b"]),
            BTreeMap::new(),
            BTreeMap::from([
                ("source".to_string(), serde_json::json!("camera")),
                ("count".to_string(), serde_json::json!(3)),
            ]),
        );

        let aggregated = wm.aggregate_metadata();
        assert_eq!(aggregated["source"], BTreeSet::from(["camera".to_string()]));
        assert_eq!(aggregated["count"], BTreeSet::from(["3".to_string()]));
    }

    #[test]
    fn registry_round_trip_and_delete() {
        let manager = SessionManager::new();
        let id = manager
            .create("kb".to_string(), SessionConfig::default())
            .unwrap();
        let session = manager.get(&id).unwrap();
        assert_eq!(session.kb_id, "kb");

        manager.delete(&id).unwrap();
        let err = manager.get(&id).unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[test]
    fn expired_sessions_surface_session_expired() {
        let manager = SessionManager::new();
        let config = SessionConfig {
            session_ttl: Duration::from_millis(0),
            session_auto_extend: false,
            ..SessionConfig::default()
        };
        let id = manager.create("kb".to_string(), config).unwrap();
        let err = manager.get(&id).unwrap_err();
        assert_eq!(err.code(), "session_expired");
        // The entry is reaped; a second access reports not_found
        assert_eq!(manager.get(&id).unwrap_err().code(), "not_found");
    }

    #[test]
    fn invalid_config_is_rejected_at_create() {
        let manager = SessionManager::new();
        let config = SessionConfig {
            recall_threshold: 2.0,
            ..SessionConfig::default()
        };
        assert!(manager.create("kb".to_string(), config).is_err());
    }

    #[test]
    fn sessions_for_kb_filters_by_namespace() {
        let manager = SessionManager::new();
        manager
            .create("kb1".to_string(), SessionConfig::default())
            .unwrap();
        manager
            .create("kb2".to_string(), SessionConfig::default())
            .unwrap();
        assert_eq!(manager.sessions_for_kb("kb1").len(), 1);
        assert_eq!(manager.len(), 2);
    }
}
