//! Payload stores: surrogate key → [`ComponentId`] with use tracking.
//!
//! Every operation takes the current instant from the caller, so eviction
//! decisions follow the injected clock rather than the system time.
//!
//! - [`SqliteStore`]: durable, one row per entry; survives restarts.
//! - [`MemoryStore`]: process-local map for tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;
use uuid::Uuid;

use super::codec;
use super::{ComponentId, ComponentIdError, Lifespan};

const SCHEMA_VERSION: i64 = 1;

/// Pluggable backing for minted component IDs.
///
/// Implementations serialise writers internally and are shared as
/// `Arc<dyn PayloadStore>` between dispatch workers and the sweeper.
pub trait PayloadStore: Send + Sync {
    /// Persist `id` under a fresh key. Identical payloads get distinct keys.
    fn put(&self, id: &ComponentId, now: DateTime<Utc>) -> Result<Uuid, ComponentIdError>;

    /// Look up `key` and mark it used at `now`.
    ///
    /// A `Regular` entry that has gone unused for the TTL is treated as
    /// already evicted: it is removed and `None` is returned.
    fn get(&self, key: &Uuid, now: DateTime<Utc>) -> Result<Option<ComponentId>, ComponentIdError>;

    /// Evict every `Regular` entry unused for at least the TTL and return
    /// what was removed. `Permanent` entries are never touched.
    fn sweep(&self, now: DateTime<Utc>) -> Result<Vec<(Uuid, ComponentId)>, ComponentIdError>;

    /// Remove `key` regardless of lifespan. Returns `true` if it existed.
    fn purge(&self, key: &Uuid) -> Result<bool, ComponentIdError>;

    fn len(&self) -> Result<usize, ComponentIdError>;

    fn is_empty(&self) -> Result<bool, ComponentIdError> {
        Ok(self.len()? == 0)
    }
}

fn is_stale(lifespan: Lifespan, last_used_at: DateTime<Utc>, now: DateTime<Utc>, ttl: TimeDelta) -> bool {
    lifespan == Lifespan::Regular && now.signed_duration_since(last_used_at) >= ttl
}

fn storage_err(op: &str, e: impl std::fmt::Display) -> ComponentIdError {
    ComponentIdError::StorageUnavailable(format!("store: {op}: {e}"))
}

// ── MemoryStore ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct MemoryEntry {
    id: ComponentId,
    created_at: DateTime<Utc>,
    last_used_at: DateTime<Utc>,
}

/// In-memory payload store. Contents are lost when the process exits.
#[derive(Debug)]
pub struct MemoryStore {
    regular_ttl: TimeDelta,
    entries: Mutex<HashMap<Uuid, MemoryEntry>>,
}

impl MemoryStore {
    pub fn new(regular_ttl: TimeDelta) -> Self {
        Self {
            regular_ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<Uuid, MemoryEntry>>, ComponentIdError> {
        self.entries
            .lock()
            .map_err(|_| ComponentIdError::StorageUnavailable("memory store lock poisoned".into()))
    }
}

impl PayloadStore for MemoryStore {
    fn put(&self, id: &ComponentId, now: DateTime<Utc>) -> Result<Uuid, ComponentIdError> {
        let mut entries = self.lock()?;
        let key = loop {
            let candidate = Uuid::new_v4();
            if !entries.contains_key(&candidate) {
                break candidate;
            }
        };
        entries.insert(
            key,
            MemoryEntry {
                id: id.clone(),
                created_at: now,
                last_used_at: now,
            },
        );
        Ok(key)
    }

    fn get(&self, key: &Uuid, now: DateTime<Utc>) -> Result<Option<ComponentId>, ComponentIdError> {
        let mut entries = self.lock()?;
        let Some(entry) = entries.get_mut(key) else {
            return Ok(None);
        };
        if is_stale(entry.id.lifespan, entry.last_used_at, now, self.regular_ttl) {
            entries.remove(key);
            return Ok(None);
        }
        entry.last_used_at = entry.last_used_at.max(now);
        Ok(Some(entry.id.clone()))
    }

    fn sweep(&self, now: DateTime<Utc>) -> Result<Vec<(Uuid, ComponentId)>, ComponentIdError> {
        let mut entries = self.lock()?;
        let stale: Vec<Uuid> = entries
            .iter()
            .filter(|(_, e)| is_stale(e.id.lifespan, e.last_used_at, now, self.regular_ttl))
            .map(|(k, _)| *k)
            .collect();
        Ok(stale
            .into_iter()
            .filter_map(|k| entries.remove(&k).map(|e| (k, e.id)))
            .collect())
    }

    fn purge(&self, key: &Uuid) -> Result<bool, ComponentIdError> {
        Ok(self.lock()?.remove(key).is_some())
    }

    fn len(&self) -> Result<usize, ComponentIdError> {
        Ok(self.lock()?.len())
    }
}

impl MemoryStore {
    /// Creation instant of `key`, if present.
    pub fn created_at(&self, key: &Uuid) -> Result<Option<DateTime<Utc>>, ComponentIdError> {
        Ok(self.lock()?.get(key).map(|e| e.created_at))
    }
}

// ── SqliteStore ───────────────────────────────────────────────────────────────

/// Durable payload store backed by a single SQLite table.
///
/// ```text
/// component_ids(key PRIMARY KEY, handler_prefix, args_blob, lifespan,
///               created_at, last_used_at)
/// ```
///
/// Instants are stored as Unix nanoseconds, so the SQLite and in-memory
/// stores agree on staleness at every instant. The connection sits behind a
/// mutex, so `put`, `sweep` and the read-modify-write in `get` are
/// serialised.
pub struct SqliteStore {
    regular_ttl: TimeDelta,
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("regular_ttl", &self.regular_ttl)
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path, regular_ttl: TimeDelta) -> Result<Self, ComponentIdError> {
        let conn = Connection::open(path)
            .map_err(|e| storage_err(&format!("open {}", path.display()), e))?;
        Self::with_connection(conn, regular_ttl)
    }

    /// Private in-memory database; same SQL paths as the durable store.
    pub fn open_in_memory(regular_ttl: TimeDelta) -> Result<Self, ComponentIdError> {
        let conn = Connection::open_in_memory().map_err(|e| storage_err("open in-memory", e))?;
        Self::with_connection(conn, regular_ttl)
    }

    fn with_connection(conn: Connection, regular_ttl: TimeDelta) -> Result<Self, ComponentIdError> {
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| storage_err("set busy timeout", e))?;
        init_schema(&conn)?;
        Ok(Self {
            regular_ttl,
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, ComponentIdError> {
        self.conn
            .lock()
            .map_err(|_| ComponentIdError::StorageUnavailable("sqlite store lock poisoned".into()))
    }
}

fn init_schema(conn: &Connection) -> Result<(), ComponentIdError> {
    let version: i64 = conn
        .query_row("PRAGMA user_version;", [], |row| row.get(0))
        .map_err(|e| storage_err("read schema version", e))?;

    match version {
        0 => conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS component_ids (
                    key TEXT PRIMARY KEY,
                    handler_prefix TEXT NOT NULL,
                    args_blob TEXT NOT NULL,
                    lifespan TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    last_used_at INTEGER NOT NULL
                );

                CREATE INDEX IF NOT EXISTS component_ids_sweep
                    ON component_ids (lifespan, last_used_at);

                PRAGMA user_version = 1;
                ",
            )
            .map_err(|e| storage_err("initialize schema", e)),
        SCHEMA_VERSION => Ok(()),
        other => Err(ComponentIdError::StorageUnavailable(format!(
            "store: unsupported schema version {other}"
        ))),
    }
}

fn to_nanos(at: DateTime<Utc>) -> Result<i64, ComponentIdError> {
    at.timestamp_nanos_opt()
        .ok_or_else(|| ComponentIdError::StorageUnavailable(format!("store: instant {at} out of range")))
}

fn row_to_id(prefix: String, blob: &str, lifespan: &str) -> Result<ComponentId, ComponentIdError> {
    let lifespan = Lifespan::parse(lifespan).ok_or_else(|| {
        ComponentIdError::StorageUnavailable(format!("store: corrupt lifespan {lifespan:?}"))
    })?;
    let args = codec::decode_args(blob)
        .map_err(|e| ComponentIdError::StorageUnavailable(format!("store: corrupt args: {e}")))?;
    Ok(ComponentId::new(prefix, args, lifespan))
}

impl PayloadStore for SqliteStore {
    fn put(&self, id: &ComponentId, now: DateTime<Utc>) -> Result<Uuid, ComponentIdError> {
        let key = Uuid::new_v4();
        let now_ns = to_nanos(now)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO component_ids (key, handler_prefix, args_blob, lifespan, created_at, last_used_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                codec::encode_token(&key),
                id.handler_prefix,
                codec::encode_args(&id.args),
                id.lifespan.as_str(),
                now_ns,
                now_ns,
            ],
        )
        .map_err(|e| storage_err("insert", e))?;
        debug!(%key, prefix = %id.handler_prefix, lifespan = id.lifespan.as_str(), "component id stored");
        Ok(key)
    }

    fn get(&self, key: &Uuid, now: DateTime<Utc>) -> Result<Option<ComponentId>, ComponentIdError> {
        let key_text = codec::encode_token(key);
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(|e| storage_err("begin get tx", e))?;

        let row = tx
            .query_row(
                "SELECT handler_prefix, args_blob, lifespan, last_used_at FROM component_ids WHERE key = ?1",
                params![key_text],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| storage_err("select", e))?;

        let Some((prefix, blob, lifespan, last_used_ns)) = row else {
            return Ok(None);
        };
        let id = row_to_id(prefix, &blob, &lifespan)?;
        let last_used_at = DateTime::from_timestamp_nanos(last_used_ns);

        if is_stale(id.lifespan, last_used_at, now, self.regular_ttl) {
            tx.execute("DELETE FROM component_ids WHERE key = ?1", params![key_text])
                .map_err(|e| storage_err("delete stale", e))?;
            tx.commit().map_err(|e| storage_err("commit get tx", e))?;
            return Ok(None);
        }

        tx.execute(
            "UPDATE component_ids SET last_used_at = MAX(last_used_at, ?2) WHERE key = ?1",
            params![key_text, to_nanos(now)?],
        )
        .map_err(|e| storage_err("touch", e))?;
        tx.commit().map_err(|e| storage_err("commit get tx", e))?;
        Ok(Some(id))
    }

    fn sweep(&self, now: DateTime<Utc>) -> Result<Vec<(Uuid, ComponentId)>, ComponentIdError> {
        // With no representable cutoff nothing can have been idle for a full TTL.
        let Some(cutoff_ns) = now
            .checked_sub_signed(self.regular_ttl)
            .and_then(|cutoff| cutoff.timestamp_nanos_opt())
        else {
            return Ok(Vec::new());
        };
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(|e| storage_err("begin sweep tx", e))?;

        let stale = {
            let mut stmt = tx
                .prepare(
                    "SELECT key, handler_prefix, args_blob, lifespan FROM component_ids
                     WHERE lifespan = ?1 AND last_used_at <= ?2",
                )
                .map_err(|e| storage_err("prepare sweep", e))?;
            let rows = stmt
                .query_map(params![Lifespan::Regular.as_str(), cutoff_ns], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })
                .map_err(|e| storage_err("query sweep", e))?;

            let mut stale = Vec::new();
            for row in rows {
                let (key, prefix, blob, lifespan) = row.map_err(|e| storage_err("map sweep row", e))?;
                let key = codec::decode_token(&key)
                    .map_err(|e| ComponentIdError::StorageUnavailable(format!("store: corrupt key: {e}")))?;
                stale.push((key, row_to_id(prefix, &blob, &lifespan)?));
            }
            stale
        };

        tx.execute(
            "DELETE FROM component_ids WHERE lifespan = ?1 AND last_used_at <= ?2",
            params![Lifespan::Regular.as_str(), cutoff_ns],
        )
        .map_err(|e| storage_err("delete sweep", e))?;
        tx.commit().map_err(|e| storage_err("commit sweep tx", e))?;
        Ok(stale)
    }

    fn purge(&self, key: &Uuid) -> Result<bool, ComponentIdError> {
        let conn = self.lock()?;
        let removed = conn
            .execute(
                "DELETE FROM component_ids WHERE key = ?1",
                params![codec::encode_token(key)],
            )
            .map_err(|e| storage_err("purge", e))?;
        Ok(removed > 0)
    }

    fn len(&self) -> Result<usize, ComponentIdError> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM component_ids", [], |row| row.get(0))
            .map_err(|e| storage_err("count", e))?;
        Ok(count as usize)
    }
}
