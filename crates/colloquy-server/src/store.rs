use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use colloquy_kernel::{Identity, Session, SessionRecord};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session backend failed: {0}")]
    Backend(String),
    #[error("session record could not be decoded: {0}")]
    Decode(String),
    #[error("session record is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },
}

/// A fetch that failed at the backend. `session` is a fresh session the caller
/// may continue with.
#[derive(Debug, Error)]
#[error("session fetch degraded: {source}")]
pub struct DegradedFetch {
    pub session: Session,
    pub source: StoreError,
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub ttl: Duration,
    pub key_prefix: String,
    pub max_length: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            key_prefix: "colloquy.session.".to_string(),
            max_length: 65_536,
        }
    }
}

impl From<&colloquy_config::Store> for StoreSettings {
    fn from(cfg: &colloquy_config::Store) -> Self {
        Self {
            ttl: Duration::from_secs(cfg.ttl_secs),
            key_prefix: cfg.key_prefix.clone(),
            max_length: cfg.max_length,
        }
    }
}

#[derive(Clone)]
pub struct SessionStore {
    backend: Arc<Mutex<StoreBackend>>,
    settings: Arc<StoreSettings>,
}

impl SessionStore {
    pub fn from_config(cfg: &colloquy_config::Store) -> Result<Self, String> {
        let backend = if cfg.kind == "sqlite" {
            let sqlite_path = cfg
                .sqlite_path
                .as_deref()
                .ok_or_else(|| "store.sqlite_path is required for sqlite store".to_string())?;
            StoreBackend::Sqlite(SqliteStore::new(sqlite_path)?)
        } else {
            StoreBackend::Memory(MemoryStore::default())
        };
        Ok(Self::with_backend(backend, cfg.into()))
    }

    pub fn memory(settings: StoreSettings) -> Self {
        Self::with_backend(StoreBackend::Memory(MemoryStore::default()), settings)
    }

    pub fn sqlite(path: &str, settings: StoreSettings) -> Result<Self, String> {
        Ok(Self::with_backend(
            StoreBackend::Sqlite(SqliteStore::new(path)?),
            settings,
        ))
    }

    fn with_backend(backend: StoreBackend, settings: StoreSettings) -> Self {
        Self {
            backend: Arc::new(Mutex::new(backend)),
            settings: Arc::new(settings),
        }
    }

    pub async fn fetch(&self, identity: &Identity) -> Result<Session, DegradedFetch> {
        self.fetch_at(identity, now_ms()).await
    }

    pub async fn save(&self, session: &Session) -> Result<(), StoreError> {
        self.save_at(session, now_ms()).await
    }

    pub async fn drop_session(&self, identity: &Identity) -> Result<(), StoreError> {
        let key = self.key(&colloquy_kernel::session_id(identity));
        let mut backend = self.backend.lock().await;
        backend.remove(&key).map_err(StoreError::Backend)
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        let backend = self.backend.lock().await;
        backend.ping().map_err(StoreError::Backend)
    }

    async fn fetch_at(&self, identity: &Identity, now: i64) -> Result<Session, DegradedFetch> {
        let fresh = Session::fresh(identity.clone());
        let key = self.key(&fresh.id);
        let payload = {
            let backend = self.backend.lock().await;
            backend.get(&key, now)
        };
        let payload = match payload {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                debug!(session_id = %fresh.id, "session miss");
                return Ok(fresh);
            }
            Err(err) => {
                return Err(DegradedFetch {
                    session: fresh,
                    source: StoreError::Backend(err),
                })
            }
        };
        match serde_json::from_str::<SessionRecord>(&payload) {
            Ok(record) => Ok(Session::from_record(identity.clone(), record)),
            Err(err) => Err(DegradedFetch {
                session: fresh,
                source: StoreError::Decode(err.to_string()),
            }),
        }
    }

    async fn save_at(&self, session: &Session, now: i64) -> Result<(), StoreError> {
        let payload = serde_json::to_string(&session.record())
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        let limit = self.settings.max_length;
        if limit > 0 && payload.len() > limit {
            return Err(StoreError::TooLarge {
                size: payload.len(),
                limit,
            });
        }
        let ttl_ms = i64::try_from(self.settings.ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = now.saturating_add(ttl_ms);
        let key = self.key(&session.id);
        let mut backend = self.backend.lock().await;
        backend
            .put(&key, &payload, expires_at, now)
            .map_err(StoreError::Backend)
    }

    fn key(&self, session_id: &str) -> String {
        format!("{}{}", self.settings.key_prefix, session_id)
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

struct MemoryEntry {
    payload: String,
    expires_at: i64,
}

#[derive(Default)]
struct MemoryStore {
    entries: HashMap<String, MemoryEntry>,
}

enum StoreBackend {
    Memory(MemoryStore),
    Sqlite(SqliteStore),
}

struct SqliteStore {
    conn: Connection,
}

impl StoreBackend {
    fn get(&self, key: &str, now: i64) -> Result<Option<String>, String> {
        match self {
            StoreBackend::Memory(store) => Ok(store
                .entries
                .get(key)
                .filter(|entry| entry.expires_at > now)
                .map(|entry| entry.payload.clone())),
            StoreBackend::Sqlite(store) => store.get(key, now),
        }
    }

    fn put(&mut self, key: &str, payload: &str, expires_at: i64, now: i64) -> Result<(), String> {
        match self {
            StoreBackend::Memory(store) => {
                store.entries.retain(|_, entry| entry.expires_at > now);
                store.entries.insert(
                    key.to_string(),
                    MemoryEntry {
                        payload: payload.to_string(),
                        expires_at,
                    },
                );
                Ok(())
            }
            StoreBackend::Sqlite(store) => store.put(key, payload, expires_at, now),
        }
    }

    fn remove(&mut self, key: &str) -> Result<(), String> {
        match self {
            StoreBackend::Memory(store) => {
                store.entries.remove(key);
                Ok(())
            }
            StoreBackend::Sqlite(store) => store.remove(key),
        }
    }

    fn ping(&self) -> Result<(), String> {
        match self {
            StoreBackend::Memory(_) => Ok(()),
            StoreBackend::Sqlite(store) => store.ping(),
        }
    }
}

impl SqliteStore {
    fn new(path: &str) -> Result<Self, String> {
        let conn = Connection::open(path).map_err(|e| e.to_string())?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS sessions (
                session_key TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS sessions_expires_at ON sessions(expires_at);
            ",
        )
        .map_err(|e| e.to_string())?;
        Ok(Self { conn })
    }

    fn get(&self, key: &str, now: i64) -> Result<Option<String>, String> {
        self.conn
            .query_row(
                "SELECT payload FROM sessions WHERE session_key = ?1 AND expires_at > ?2",
                params![key, now],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| e.to_string())
    }

    fn put(&mut self, key: &str, payload: &str, expires_at: i64, now: i64) -> Result<(), String> {
        let tx = self.conn.transaction().map_err(|e| e.to_string())?;
        tx.execute("DELETE FROM sessions WHERE expires_at <= ?1", params![now])
            .map_err(|e| e.to_string())?;
        tx.execute(
            "INSERT OR REPLACE INTO sessions(session_key, payload, expires_at) VALUES (?1, ?2, ?3)",
            params![key, payload, expires_at],
        )
        .map_err(|e| e.to_string())?;
        tx.commit().map_err(|e| e.to_string())
    }

    fn remove(&mut self, key: &str) -> Result<(), String> {
        self.conn
            .execute("DELETE FROM sessions WHERE session_key = ?1", params![key])
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    fn ping(&self) -> Result<(), String> {
        self.conn
            .query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get::<_, i64>(0))
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}
