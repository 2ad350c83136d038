//! Persistent cache storage on SQLite.

use std::path::Path;

use chrono::Utc;
use hashbrown::HashMap;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use crate::cache::{CacheBackend, CacheEntry};
use crate::ServiceWorkerError;

/// Database schema version for migrations
const SCHEMA_VERSION: i32 = 1;

const ENTRY_COLUMNS: &str = "e.url, e.method, e.status, e.headers, e.body, e.cached_at";

/// Cache storage that survives restarts.
pub struct SqliteCacheStorage {
    conn: Connection,
}

impl SqliteCacheStorage {
    /// Open (or create) the cache database at `path`.
    pub fn open(path: &Path) -> Result<Self, ServiceWorkerError> {
        let conn = Connection::open(path)?;
        info!(path = %path.display(), "Opened cache database");
        Self::from_connection(conn)
    }

    /// In-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self, ServiceWorkerError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, ServiceWorkerError> {
        conn.execute("PRAGMA foreign_keys = ON", [])?;

        let table_exists: bool = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
            [],
            |row| row.get::<_, i32>(0).map(|count| count > 0),
        )?;

        let version: i32 = if table_exists {
            conn.query_row(
                "SELECT version FROM schema_version ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or(0)
        } else {
            0
        };

        if version < SCHEMA_VERSION {
            migrate_database(&conn, version)?;
        }

        Ok(Self { conn })
    }

    fn cache_id(&self, name: &str) -> Result<Option<i64>, ServiceWorkerError> {
        Ok(self
            .conn
            .query_row("SELECT id FROM caches WHERE name = ?1", params![name], |row| {
                row.get(0)
            })
            .optional()?)
    }

    fn ensure_cache(conn: &Connection, name: &str) -> Result<i64, ServiceWorkerError> {
        conn.execute(
            "INSERT OR IGNORE INTO caches (name, created_at) VALUES (?1, ?2)",
            params![name, Utc::now().timestamp()],
        )?;
        Ok(conn.query_row("SELECT id FROM caches WHERE name = ?1", params![name], |row| {
            row.get(0)
        })?)
    }

    fn insert_entry(
        conn: &Connection,
        cache_id: i64,
        entry: &CacheEntry,
    ) -> Result<(), ServiceWorkerError> {
        let headers = serde_json::to_string(&entry.headers)
            .map_err(|e| ServiceWorkerError::CacheError(e.to_string()))?;
        conn.execute(
            "INSERT OR REPLACE INTO entries (cache_id, url, method, status, headers, body, cached_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                cache_id,
                entry.url,
                entry.method,
                entry.status,
                headers,
                entry.body,
                entry.cached_at as i64
            ],
        )?;
        Ok(())
    }
}

/// Run database migrations
fn migrate_database(conn: &Connection, from_version: i32) -> Result<(), ServiceWorkerError> {
    if from_version < 1 {
        create_schema_v1(conn)?;
    }
    Ok(())
}

/// Create initial schema (version 1)
fn create_schema_v1(conn: &Connection) -> Result<(), ServiceWorkerError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            version INTEGER NOT NULL,
            applied_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS caches (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS entries (
            cache_id INTEGER NOT NULL REFERENCES caches(id) ON DELETE CASCADE,
            url TEXT NOT NULL,
            method TEXT NOT NULL,
            status INTEGER NOT NULL,
            headers TEXT NOT NULL,
            body BLOB NOT NULL,
            cached_at INTEGER NOT NULL,
            PRIMARY KEY (cache_id, url)
        );

        CREATE INDEX IF NOT EXISTS idx_entries_url ON entries(url);
        "#,
    )?;

    conn.execute(
        "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
        params![SCHEMA_VERSION, Utc::now().timestamp()],
    )?;

    debug!(version = SCHEMA_VERSION, "Created cache schema");
    Ok(())
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<(CacheEntry, String)> {
    let headers: String = row.get(3)?;
    let cached_at: i64 = row.get(5)?;
    Ok((
        CacheEntry {
            url: row.get(0)?,
            method: row.get(1)?,
            status: row.get(2)?,
            headers: HashMap::new(),
            body: row.get(4)?,
            cached_at: cached_at.max(0) as u64,
        },
        headers,
    ))
}

fn decode_headers(
    raw: Option<(CacheEntry, String)>,
) -> Result<Option<CacheEntry>, ServiceWorkerError> {
    match raw {
        Some((mut entry, headers)) => {
            entry.headers = serde_json::from_str(&headers)
                .map_err(|e| ServiceWorkerError::CacheError(e.to_string()))?;
            Ok(Some(entry))
        }
        None => Ok(None),
    }
}

impl CacheBackend for SqliteCacheStorage {
    fn open(&mut self, name: &str) -> Result<(), ServiceWorkerError> {
        Self::ensure_cache(&self.conn, name).map(|_| ())
    }

    fn has(&self, name: &str) -> Result<bool, ServiceWorkerError> {
        Ok(self.cache_id(name)?.is_some())
    }

    fn delete_cache(&mut self, name: &str) -> Result<bool, ServiceWorkerError> {
        let removed = self
            .conn
            .execute("DELETE FROM caches WHERE name = ?1", params![name])?;
        Ok(removed > 0)
    }

    fn cache_names(&self) -> Result<Vec<String>, ServiceWorkerError> {
        let mut stmt = self.conn.prepare("SELECT name FROM caches ORDER BY id")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    fn put(&mut self, cache: &str, entry: CacheEntry) -> Result<(), ServiceWorkerError> {
        let cache_id = Self::ensure_cache(&self.conn, cache)?;
        Self::insert_entry(&self.conn, cache_id, &entry)
    }

    fn put_all(&mut self, cache: &str, entries: Vec<CacheEntry>) -> Result<(), ServiceWorkerError> {
        let tx = self.conn.transaction()?;
        let cache_id = Self::ensure_cache(&tx, cache)?;
        for entry in &entries {
            Self::insert_entry(&tx, cache_id, entry)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn match_in(&self, cache: &str, url: &str) -> Result<Option<CacheEntry>, ServiceWorkerError> {
        let raw = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM entries e JOIN caches c ON c.id = e.cache_id
                     WHERE c.name = ?1 AND e.url = ?2",
                    ENTRY_COLUMNS
                ),
                params![cache, url],
                entry_from_row,
            )
            .optional()?;
        decode_headers(raw)
    }

    fn match_any(&self, url: &str) -> Result<Option<CacheEntry>, ServiceWorkerError> {
        let raw = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM entries e JOIN caches c ON c.id = e.cache_id
                     WHERE e.url = ?1 ORDER BY c.id LIMIT 1",
                    ENTRY_COLUMNS
                ),
                params![url],
                entry_from_row,
            )
            .optional()?;
        decode_headers(raw)
    }

    fn keys(&self, cache: &str) -> Result<Vec<String>, ServiceWorkerError> {
        let mut stmt = self.conn.prepare(
            "SELECT e.url FROM entries e JOIN caches c ON c.id = e.cache_id
             WHERE c.name = ?1 ORDER BY e.url",
        )?;
        let keys = stmt
            .query_map(params![cache], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(keys)
    }
}
