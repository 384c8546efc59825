//! Durable session storage (§4.6, §9's "Durable storage abstraction").
//!
//! Modeled as an opaque `Store` with `load`/`save`/`delete`, exactly as
//! the design notes specify. `SqliteStore` opens a fresh connection per
//! call — the same connection-per-call shape used elsewhere in the stack
//! for embedded SQLite, traded for not holding a connection across the
//! `.await` points in the engine's dispatch loop. `MockStore` backs tests.

use sequencer_protocol::Session;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("session id {0:?} is not a valid UUID")]
    InvalidId(String),
}

pub trait SessionStore: Send + Sync {
    fn load(&self, id: Uuid) -> Result<Option<Session>, StoreError>;
    fn save(&self, session: &Session) -> Result<(), StoreError>;
    fn delete(&self, id: Uuid) -> Result<(), StoreError>;
}

pub struct SqliteStore {
    path: String,
    /// Shared-cache in-memory databases are destroyed once their last
    /// connection closes. `open`/`in_memory` intentionally use the
    /// connection-per-call pattern below for everything else, so this
    /// holds one extra connection alive for the lifetime of the store
    /// purely to keep an in-memory database's shared cache populated.
    _keep_alive: Option<Mutex<rusqlite::Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl Into<String>) -> Result<Self, StoreError> {
        let path = path.into();
        let keep_alive = if path.contains("mode=memory") {
            Some(Mutex::new(rusqlite::Connection::open(&path)?))
        } else {
            None
        };
        let store = Self { path, _keep_alive: keep_alive };
        store.with_connection(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 CREATE TABLE IF NOT EXISTS sessions (
                     id TEXT PRIMARY KEY,
                     body TEXT NOT NULL,
                     updated_at INTEGER NOT NULL
                 );",
            )?;
            Ok(())
        })?;
        Ok(store)
    }

    /// In-memory database backed by the same schema, for tests that want
    /// real SQLite semantics without a file on disk. Uses a uniquely-named
    /// shared-cache memory database so the connection-per-call pattern
    /// above still sees the same database across calls.
    pub fn in_memory() -> Result<Self, StoreError> {
        let name = format!("file:sequencer-{}?mode=memory&cache=shared", Uuid::new_v4());
        Self::open(name)
    }

    fn with_connection<T>(
        &self,
        f: impl FnOnce(&rusqlite::Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = rusqlite::Connection::open(&self.path)?;
        f(&conn)
    }
}

impl SessionStore for SqliteStore {
    fn load(&self, id: Uuid) -> Result<Option<Session>, StoreError> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare("SELECT body FROM sessions WHERE id = ?1")?;
            let mut rows = stmt.query(rusqlite::params![id.to_string()])?;
            match rows.next()? {
                Some(row) => {
                    let body: String = row.get(0)?;
                    Ok(Some(serde_json::from_str(&body)?))
                }
                None => Ok(None),
            }
        })
    }

    fn save(&self, session: &Session) -> Result<(), StoreError> {
        let body = serde_json::to_string(session)?;
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, body, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
                rusqlite::params![session.id, body, session.updated_at],
            )?;
            Ok(())
        })
    }

    fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        self.with_connection(|conn| {
            conn.execute("DELETE FROM sessions WHERE id = ?1", rusqlite::params![id.to_string()])?;
            Ok(())
        })
    }
}

/// In-memory store for unit/integration tests (§9: "Tests inject a mock
/// store").
#[derive(Default)]
pub struct MockStore {
    sessions: Mutex<HashMap<Uuid, Session>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MockStore {
    fn load(&self, id: Uuid) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.lock().unwrap().get(&id).cloned())
    }

    fn save(&self, session: &Session) -> Result<(), StoreError> {
        let id: Uuid = session
            .id
            .parse()
            .map_err(|_| StoreError::InvalidId(session.id.clone()))?;
        self.sessions.lock().unwrap().insert(id, session.clone());
        Ok(())
    }

    fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        self.sessions.lock().unwrap().remove(&id);
        Ok(())
    }
}
