//! SQLite-backed cache store.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Duration;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::{CacheEntry, CacheError, CacheStore};
use crate::clock::{Clock, SystemClock};
use crate::db;

pub struct SqliteCacheStore {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl SqliteCacheStore {
    pub fn new(path: &Path) -> Result<Self, CacheError> {
        let conn = db::open(path).map_err(|e| CacheError::Database(e.to_string()))?;
        Self::with_connection(conn, Arc::new(SystemClock))
    }

    pub fn in_memory() -> Result<Self, CacheError> {
        Self::in_memory_with_clock(Arc::new(SystemClock))
    }

    pub fn in_memory_with_clock(clock: Arc<dyn Clock>) -> Result<Self, CacheError> {
        let conn = db::open_in_memory().map_err(|e| CacheError::Database(e.to_string()))?;
        Self::with_connection(conn, clock)
    }

    fn with_connection(conn: Connection, clock: Arc<dyn Clock>) -> Result<Self, CacheError> {
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            clock,
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), CacheError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS cache (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                cache_key TEXT NOT NULL UNIQUE,
                cache_value TEXT NOT NULL,
                time_created TEXT NOT NULL,
                time_updated TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_cache_time_created ON cache(time_created);
            "#,
        )
        .map_err(|e| CacheError::Database(e.to_string()))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, CacheError> {
        self.conn
            .lock()
            .map_err(|_| CacheError::Database("cache connection lock poisoned".to_string()))
    }

    fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<CacheEntry> {
        let created: String = row.get(2)?;
        let updated: String = row.get(3)?;
        Ok(CacheEntry {
            key: row.get(0)?,
            value: row.get(1)?,
            time_created: db::parse_timestamp(2, &created)?,
            time_updated: db::parse_timestamp(3, &updated)?,
        })
    }

    fn select(conn: &Connection, key: &str) -> rusqlite::Result<Option<CacheEntry>> {
        conn.query_row(
            "SELECT cache_key, cache_value, time_created, time_updated FROM cache WHERE cache_key = ?",
            params![key],
            Self::row_to_entry,
        )
        .optional()
    }
}

impl CacheStore for SqliteCacheStore {
    fn set(&self, key: &str, value: &str) -> Result<CacheEntry, CacheError> {
        let conn = self.conn()?;
        let now = db::format_timestamp(&self.clock.now());

        conn.execute(
            "INSERT INTO cache (cache_key, cache_value, time_created, time_updated) VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(cache_key) DO UPDATE SET cache_value = excluded.cache_value, time_updated = excluded.time_updated",
            params![key, value, now],
        )
        .map_err(|e| CacheError::Database(e.to_string()))?;

        Self::select(&conn, key)
            .map_err(|e| CacheError::Database(e.to_string()))?
            .ok_or_else(|| CacheError::Database(format!("cache entry {} vanished after write", key)))
    }

    fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let conn = self.conn()?;
        Self::select(&conn, key).map_err(|e| CacheError::Database(e.to_string()))
    }

    fn size(&self) -> Result<u64, CacheError> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM cache", [], |row| row.get(0))
            .map_err(|e| CacheError::Database(e.to_string()))?;
        Ok(count as u64)
    }

    fn evict_expired(&self, max_age_days: u32, max_entries: u32) -> Result<u64, CacheError> {
        let conn = self.conn()?;
        let cutoff = self.clock.now() - Duration::days(i64::from(max_age_days));

        // The retained set is the newest `max_entries` rows inside the age
        // window. An empty retained set deletes everything.
        let deleted = conn
            .execute(
                "DELETE FROM cache WHERE id < (
                    SELECT COALESCE(
                        (SELECT MIN(id) FROM (
                            SELECT id FROM cache WHERE time_created > ?1 ORDER BY id DESC LIMIT ?2
                        )),
                        (SELECT COALESCE(MAX(id), 0) + 1 FROM cache)
                    )
                )",
                params![db::format_timestamp(&cutoff), i64::from(max_entries)],
            )
            .map_err(|e| CacheError::Database(e.to_string()))?;

        debug!(deleted, max_age_days, max_entries, "cache eviction pass finished");
        Ok(deleted as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::Utc;

    fn store_with_clock() -> (SqliteCacheStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = SqliteCacheStore::in_memory_with_clock(clock.clone()).unwrap();
        (store, clock)
    }

    #[test]
    fn test_set_and_get() {
        let (store, _) = store_with_clock();
        let entry = store.set("k", "v").unwrap();
        assert_eq!(entry.key, "k");
        assert_eq!(entry.value, "v");
        assert_eq!(entry.time_created, entry.time_updated);

        let fetched = store.get("k").unwrap().unwrap();
        assert_eq!(fetched, entry);
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_set_overwrites_and_refreshes_time_updated() {
        let (store, clock) = store_with_clock();
        let first = store.set("k", "v1").unwrap();
        clock.advance(Duration::minutes(5));
        let second = store.set("k", "v2").unwrap();

        assert_eq!(second.value, "v2");
        assert_eq!(second.time_created, first.time_created);
        assert!(second.time_updated > first.time_updated);
        assert_eq!(store.size().unwrap(), 1);
    }

    #[test]
    fn test_evict_empty_cache() {
        let (store, _) = store_with_clock();
        assert_eq!(store.evict_expired(30, 100).unwrap(), 0);
        assert_eq!(store.size().unwrap(), 0);
    }

    #[test]
    fn test_evict_bounds_entry_count() {
        let (store, _) = store_with_clock();
        for i in 0..150 {
            store.set(&format!("key-{}", i), "value").unwrap();
        }

        assert_eq!(store.evict_expired(30, 100).unwrap(), 50);
        assert_eq!(store.size().unwrap(), 100);
        // The oldest rows go first.
        assert!(store.get("key-49").unwrap().is_none());
        assert!(store.get("key-50").unwrap().is_some());
        assert!(store.get("key-149").unwrap().is_some());
    }

    #[test]
    fn test_evict_removes_aged_rows_under_count() {
        let (store, clock) = store_with_clock();
        for i in 0..10 {
            store.set(&format!("old-{}", i), "value").unwrap();
        }
        clock.advance(Duration::days(31));
        for i in 0..5 {
            store.set(&format!("new-{}", i), "value").unwrap();
        }

        assert_eq!(store.evict_expired(30, 100).unwrap(), 10);
        assert_eq!(store.size().unwrap(), 5);
        assert!(store.get("new-0").unwrap().is_some());
    }

    #[test]
    fn test_evict_removes_everything_when_all_aged() {
        let (store, clock) = store_with_clock();
        for i in 0..3 {
            store.set(&format!("k{}", i), "value").unwrap();
        }
        clock.advance(Duration::days(40));

        assert_eq!(store.evict_expired(30, 100).unwrap(), 3);
        assert_eq!(store.size().unwrap(), 0);
    }

    #[test]
    fn test_evict_leaves_fresh_rows_alone() {
        let (store, _) = store_with_clock();
        for i in 0..20 {
            store.set(&format!("k{}", i), "value").unwrap();
        }
        assert_eq!(store.evict_expired(30, 100).unwrap(), 0);
        assert_eq!(store.size().unwrap(), 20);
    }

    #[test]
    fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        {
            let store = SqliteCacheStore::new(&path).unwrap();
            store.set("persist", "yes").unwrap();
        }
        let store = SqliteCacheStore::new(&path).unwrap();
        assert_eq!(store.get("persist").unwrap().unwrap().value, "yes");
    }
}
