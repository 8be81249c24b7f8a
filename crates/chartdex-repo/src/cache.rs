//! Index cache store
//!
//! One entry per repository, holding the normalized index and the version
//! token of the source it was fetched from. Two backends:
//! - `MemoryIndexStore`: process-local map
//! - `SqliteIndexStore`: persistent, WAL mode, survives restarts

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::config::RepositoryRef;
use crate::error::{RepoError, Result};
use crate::index::NormalizedIndex;

/// A cached, fully parsed index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexCacheEntry {
    pub key: RepositoryRef,
    pub payload: NormalizedIndex,
    /// Version token of the repository object this index was fetched for
    pub source_version: String,
    pub fetched_at: DateTime<Utc>,
}

impl IndexCacheEntry {
    pub fn new(key: RepositoryRef, payload: NormalizedIndex, source_version: impl Into<String>) -> Self {
        Self {
            key,
            payload,
            source_version: source_version.into(),
            fetched_at: Utc::now(),
        }
    }
}

/// Key/value store for parsed indexes
///
/// `put` replaces any previous value atomically; readers see either the old
/// or the new entry, never a mix.
#[async_trait]
pub trait IndexStore: Send + Sync {
    async fn get(&self, key: &RepositoryRef) -> Result<Option<IndexCacheEntry>>;

    async fn put(&self, entry: IndexCacheEntry) -> Result<()>;

    /// Returns whether an entry was removed
    async fn delete(&self, key: &RepositoryRef) -> Result<bool>;

    /// Remove several keys in one atomic step, returning how many existed
    async fn delete_many(&self, keys: &[RepositoryRef]) -> Result<usize>;

    /// All keys currently present, sorted
    async fn keys(&self) -> Result<Vec<RepositoryRef>>;

    /// Version token of the cached entry, without its payload
    async fn source_version(&self, key: &RepositoryRef) -> Result<Option<String>> {
        Ok(self.get(key).await?.map(|entry| entry.source_version))
    }

    async fn contains(&self, key: &RepositoryRef) -> Result<bool> {
        Ok(self.source_version(key).await?.is_some())
    }
}

/// In-memory index store
#[derive(Clone, Default)]
pub struct MemoryIndexStore {
    entries: Arc<RwLock<HashMap<RepositoryRef, IndexCacheEntry>>>,
}

impl MemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> RepoError {
        RepoError::CacheError {
            message: "cache lock poisoned".to_string(),
        }
    }
}

#[async_trait]
impl IndexStore for MemoryIndexStore {
    async fn get(&self, key: &RepositoryRef) -> Result<Option<IndexCacheEntry>> {
        let entries = self.entries.read().map_err(|_| Self::poisoned())?;
        Ok(entries.get(key).cloned())
    }

    async fn source_version(&self, key: &RepositoryRef) -> Result<Option<String>> {
        let entries = self.entries.read().map_err(|_| Self::poisoned())?;
        Ok(entries.get(key).map(|entry| entry.source_version.clone()))
    }

    async fn put(&self, entry: IndexCacheEntry) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn delete(&self, key: &RepositoryRef) -> Result<bool> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        Ok(entries.remove(key).is_some())
    }

    async fn delete_many(&self, keys: &[RepositoryRef]) -> Result<usize> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        Ok(keys.iter().filter(|k| entries.remove(k).is_some()).count())
    }

    async fn keys(&self) -> Result<Vec<RepositoryRef>> {
        let entries = self.entries.read().map_err(|_| Self::poisoned())?;
        let mut keys: Vec<_> = entries.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

/// SQLite-backed index store
///
/// Every operation opens its own connection on the blocking pool, so readers
/// never wait behind a writer's lock (WAL) and the async workers never wait
/// on disk I/O.
pub struct SqliteIndexStore {
    target: SqliteTarget,
    /// Holds a shared in-memory database open between operations
    _keepalive: Option<Mutex<Connection>>,
}

#[derive(Debug, Clone)]
enum SqliteTarget {
    File(PathBuf),
    /// `file:` URI of a named shared-cache in-memory database
    Memory(String),
}

static NEXT_MEMORY_DB: AtomicU64 = AtomicU64::new(0);

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

impl SqliteTarget {
    fn connect(&self) -> Result<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = match self {
            SqliteTarget::File(path) => Connection::open_with_flags(path, flags)?,
            SqliteTarget::Memory(uri) => {
                Connection::open_with_flags(uri, flags | OpenFlags::SQLITE_OPEN_URI)?
            }
        };
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }
}

impl SqliteIndexStore {
    /// Open or create the store at a specific path
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let target = SqliteTarget::File(path.to_path_buf());
        if let Err(e) = target.connect().and_then(|conn| Self::init(&conn)) {
            // The cache is derived data, so a corrupt file is simply rebuilt
            tracing::warn!("Cache corrupted, recreating: {}", e);
            if path.exists() {
                std::fs::remove_file(path)?;
            }
            Self::init(&target.connect()?)?;
        }

        Ok(Self {
            target,
            _keepalive: None,
        })
    }

    /// Open in-memory store (for testing)
    pub fn open_memory() -> Result<Self> {
        let id = NEXT_MEMORY_DB.fetch_add(1, Ordering::Relaxed);
        let target = SqliteTarget::Memory(format!(
            "file:chartdex-index-{}-{}?mode=memory&cache=shared",
            std::process::id(),
            id
        ));
        let conn = target.connect()?;
        Self::init(&conn)?;
        Ok(Self {
            target,
            _keepalive: Some(Mutex::new(conn)),
        })
    }

    /// Default location under the user cache directory
    pub fn default_path() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir().ok_or_else(|| RepoError::CacheError {
            message: "Could not determine cache directory".to_string(),
        })?;
        Ok(cache_dir.join("chartdex").join("index.db"))
    }

    /// Open or create the store at the default location
    pub fn open() -> Result<Self> {
        Self::open_at(&Self::default_path()?)
    }

    fn init(conn: &Connection) -> Result<()> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS index_entries (
                namespace TEXT NOT NULL,
                name TEXT NOT NULL,
                source_version TEXT NOT NULL,
                fetched_at INTEGER NOT NULL,
                package_count INTEGER NOT NULL DEFAULT 0,
                payload TEXT NOT NULL,
                PRIMARY KEY (namespace, name)
            );
            "#,
        )?;
        Ok(())
    }

    /// Run `op` against a fresh connection on the blocking pool
    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let target = self.target.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = target.connect()?;
            op(&mut conn)
        })
        .await
        .map_err(|e| RepoError::CacheError {
            message: format!("cache task failed: {}", e),
        })?
    }
}

#[async_trait]
impl IndexStore for SqliteIndexStore {
    async fn get(&self, key: &RepositoryRef) -> Result<Option<IndexCacheEntry>> {
        let key = key.clone();
        self.run(move |conn| {
            let row = conn
                .query_row(
                    "SELECT source_version, fetched_at, payload FROM index_entries
                     WHERE namespace = ?1 AND name = ?2",
                    params![key.namespace, key.name],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    },
                )
                .optional()?;

            row.map(|(source_version, fetched_at, payload)| {
                Ok(IndexCacheEntry {
                    payload: serde_json::from_str(&payload)?,
                    source_version,
                    fetched_at: DateTime::from_timestamp_millis(fetched_at).unwrap_or_default(),
                    key: key.clone(),
                })
            })
            .transpose()
        })
        .await
    }

    async fn source_version(&self, key: &RepositoryRef) -> Result<Option<String>> {
        let key = key.clone();
        self.run(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT source_version FROM index_entries WHERE namespace = ?1 AND name = ?2",
                    params![key.namespace, key.name],
                    |row| row.get::<_, String>(0),
                )
                .optional()?)
        })
        .await
    }

    async fn put(&self, entry: IndexCacheEntry) -> Result<()> {
        let payload = serde_json::to_string(&entry.payload)?;
        self.run(move |conn| {
            conn.execute(
                r#"
                INSERT INTO index_entries (namespace, name, source_version, fetched_at, package_count, payload)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(namespace, name) DO UPDATE SET
                    source_version = excluded.source_version,
                    fetched_at = excluded.fetched_at,
                    package_count = excluded.package_count,
                    payload = excluded.payload
                "#,
                params![
                    entry.key.namespace,
                    entry.key.name,
                    entry.source_version,
                    entry.fetched_at.timestamp_millis(),
                    entry.payload.package_count() as i64,
                    payload,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &RepositoryRef) -> Result<bool> {
        let key = key.clone();
        self.run(move |conn| {
            let removed = conn.execute(
                "DELETE FROM index_entries WHERE namespace = ?1 AND name = ?2",
                params![key.namespace, key.name],
            )?;
            Ok(removed > 0)
        })
        .await
    }

    async fn delete_many(&self, keys: &[RepositoryRef]) -> Result<usize> {
        let keys = keys.to_vec();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let mut removed = 0;
            {
                let mut stmt =
                    tx.prepare("DELETE FROM index_entries WHERE namespace = ?1 AND name = ?2")?;
                for key in &keys {
                    removed += stmt.execute(params![key.namespace, key.name])?;
                }
            }
            tx.commit()?;
            Ok(removed)
        })
        .await
    }

    async fn keys(&self) -> Result<Vec<RepositoryRef>> {
        self.run(|conn| {
            let mut stmt =
                conn.prepare("SELECT namespace, name FROM index_entries ORDER BY namespace, name")?;
            let keys = stmt
                .query_map([], |row| {
                    Ok(RepositoryRef::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(keys)
        })
        .await
    }
}
