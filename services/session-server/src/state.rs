//! Shared application state: the durable store plus a registry of live
//! session actors (§4.6, §9's "Durable storage abstraction").
//!
//! Mirrors the teacher's `AppState` shape (a pool plus `Arc<RwLock<HashMap<..>>>`
//! registries) but the registry here holds `EngineHandle`s instead of
//! broadcast senders, and eviction on hibernation is handled by a watcher
//! task rather than left to the caller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use sequencer_protocol::{Session, SessionState};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::engine::{self, EngineHandle};
use crate::store::{SessionStore, StoreError};

fn now_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

pub type EngineRegistry = Arc<RwLock<HashMap<Uuid, EngineHandle>>>;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SessionStore>,
    engines: EngineRegistry,
}

impl AppState {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store, engines: Arc::new(RwLock::new(HashMap::new())) }
    }

    /// Creates and persists a brand-new session, returning its record
    /// without spawning an engine for it — the first `attach` does that.
    pub fn create_session(&self, name: Option<String>) -> Result<Session, StoreError> {
        let id = Uuid::new_v4();
        let now = now_millis();
        let session = Session {
            id: id.to_string(),
            created_at: now,
            updated_at: now,
            last_accessed_at: now,
            name,
            remixed_from: None,
            remixed_from_name: None,
            remix_count: 0,
            immutable: false,
            state: SessionState::default(),
        };
        self.store.save(&session)?;
        Ok(session)
    }

    /// Deep-copies `source_id` into a brand-new session carrying lineage
    /// fields back to its origin (§4.5's remix operation).
    pub fn remix_session(&self, source_id: Uuid) -> Result<Option<Session>, StoreError> {
        let Some(source) = self.load_record(source_id)? else { return Ok(None) };
        let id = Uuid::new_v4();
        let now = now_millis();
        let remix = Session {
            id: id.to_string(),
            created_at: now,
            updated_at: now,
            last_accessed_at: now,
            name: source.name.clone(),
            remixed_from: Some(source.id.clone()),
            remixed_from_name: source.name.clone(),
            remix_count: 0,
            immutable: false,
            state: source.state.clone(),
        };
        self.store.save(&remix)?;

        if let Some(mut updated_source) = self.load_record(source_id)? {
            updated_source.remix_count += 1;
            self.store.save(&updated_source)?;
        }
        Ok(Some(remix))
    }

    /// Loads a session record directly from the store, bypassing any live
    /// engine (used by read-only HTTP endpoints and remix/publish setup).
    pub fn load_record(&self, id: Uuid) -> Result<Option<Session>, StoreError> {
        self.store.load(id)
    }

    /// Returns the handle for a live engine, spawning one from durable
    /// storage if none is running. `Ok(None)` means the session does not
    /// exist at all.
    pub async fn get_or_spawn_engine(&self, id: Uuid) -> Result<Option<EngineHandle>, StoreError> {
        if let Some(handle) = self.engines.read().await.get(&id) {
            return Ok(Some(handle.clone()));
        }

        let mut engines = self.engines.write().await;
        if let Some(handle) = engines.get(&id) {
            return Ok(Some(handle.clone()));
        }

        let Some(mut session) = self.store.load(id)? else { return Ok(None) };
        sequencer_model::validate::migrate_state(&mut session.state);
        sequencer_model::validate::repair_state_invariants(&mut session.state);
        let (handle, join) = engine::spawn(session, self.store.clone());
        engines.insert(id, handle.clone());
        drop(engines);

        let engines = self.engines.clone();
        tokio::spawn(async move {
            let _ = join.await;
            engines.write().await.remove(&id);
        });

        Ok(Some(handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MockStore, SessionStore};

    #[test]
    fn create_session_persists_a_default_state() {
        let state = AppState::new(Arc::new(MockStore::new()));
        let session = state.create_session(Some("jam".to_owned())).unwrap();
        let id: Uuid = session.id.parse().unwrap();
        let loaded = state.load_record(id).unwrap().unwrap();
        assert_eq!(loaded.name, Some("jam".to_owned()));
        assert!(!loaded.immutable);
    }

    #[test]
    fn remix_session_copies_state_and_bumps_source_remix_count() {
        let state = AppState::new(Arc::new(MockStore::new()));
        let source = state.create_session(Some("original".to_owned())).unwrap();
        let source_id: Uuid = source.id.parse().unwrap();

        let remix = state.remix_session(source_id).unwrap().unwrap();
        assert_eq!(remix.remixed_from, Some(source.id.clone()));
        assert_ne!(remix.id, source.id);

        let updated_source = state.load_record(source_id).unwrap().unwrap();
        assert_eq!(updated_source.remix_count, 1);
    }

    #[test]
    fn remix_session_of_unknown_id_returns_none() {
        let state = AppState::new(Arc::new(MockStore::new()));
        assert!(state.remix_session(Uuid::new_v4()).unwrap().is_none());
    }

    #[tokio::test]
    async fn get_or_spawn_engine_returns_none_for_unknown_session() {
        let state = AppState::new(Arc::new(MockStore::new()));
        assert!(state.get_or_spawn_engine(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_or_spawn_engine_reuses_the_same_handle_on_repeated_calls() {
        let state = AppState::new(Arc::new(MockStore::new()));
        let session = state.create_session(None).unwrap();
        let id: Uuid = session.id.parse().unwrap();

        let first = state.get_or_spawn_engine(id).await.unwrap().unwrap();
        let snapshot = first.snapshot().await.unwrap();
        assert_eq!(snapshot.id, session.id);

        let second = state.get_or_spawn_engine(id).await.unwrap().unwrap();
        // Same underlying actor: a snapshot taken through either handle matches.
        assert_eq!(second.snapshot().await.unwrap().id, session.id);
    }

    #[tokio::test]
    async fn get_or_spawn_engine_repairs_state_written_by_an_older_build() {
        let store = Arc::new(MockStore::new());
        let state = AppState::new(store.clone());
        let session = state.create_session(None).unwrap();
        let id: Uuid = session.id.parse().unwrap();

        // Simulate a hibernated session whose state predates a validator:
        // an out-of-range tempo and a duplicate track id written straight
        // to the store, bypassing the engine entirely.
        let mut stale = session.clone();
        stale.state.tempo = 999;
        stale.state.tracks = vec![
            sequencer_protocol::Track::new("t1", "kick", "s1"),
            sequencer_protocol::Track::new("t1", "dup", "s1"),
        ];
        store.save(&stale).unwrap();

        let handle = state.get_or_spawn_engine(id).await.unwrap().unwrap();
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.state.tempo, sequencer_protocol::limits::MAX_TEMPO);
        assert_eq!(snapshot.state.tracks.len(), 1, "duplicate track id must be repaired away on revive");
    }
}
