//! SQLite-backed semaphore history.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};

use super::{SemaphoreError, SemaphoreGroup, SemaphoreHistoryEntry, SemaphoreHistoryStore};
use crate::clock::{Clock, SystemClock};
use crate::db;

pub struct SqliteSemaphoreHistoryStore {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl SqliteSemaphoreHistoryStore {
    pub fn new(path: &Path) -> Result<Self, SemaphoreError> {
        let conn = db::open(path).map_err(|e| SemaphoreError::Database(e.to_string()))?;
        Self::with_connection(conn, Arc::new(SystemClock))
    }

    pub fn in_memory() -> Result<Self, SemaphoreError> {
        let conn = db::open_in_memory().map_err(|e| SemaphoreError::Database(e.to_string()))?;
        Self::with_connection(conn, Arc::new(SystemClock))
    }

    fn with_connection(conn: Connection, clock: Arc<dyn Clock>) -> Result<Self, SemaphoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS pipeline_semaphore_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pipeline_id TEXT NOT NULL,
                group_id TEXT NOT NULL,
                root TEXT NOT NULL,
                snapshot TEXT NOT NULL,
                time_created TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_semaphore_history_group
                ON pipeline_semaphore_history(pipeline_id, group_id, id);
            CREATE INDEX IF NOT EXISTS idx_semaphore_history_root
                ON pipeline_semaphore_history(pipeline_id, group_id, root);
            "#,
        )
        .map_err(|e| SemaphoreError::Database(e.to_string()))?;

        Ok(Self {
            conn: Mutex::new(conn),
            clock,
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, SemaphoreError> {
        self.conn.lock().map_err(|_| {
            SemaphoreError::Database("semaphore history connection lock poisoned".to_string())
        })
    }

    fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<SemaphoreHistoryEntry> {
        let snapshot: String = row.get(4)?;
        let created: String = row.get(5)?;
        Ok(SemaphoreHistoryEntry {
            id: row.get(0)?,
            pipeline_id: row.get(1)?,
            group_id: row.get(2)?,
            root: row.get(3)?,
            snapshot: serde_json::from_str(&snapshot).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
            })?,
            time_created: db::parse_timestamp(5, &created)?,
        })
    }

    fn select_latest(
        conn: &Connection,
        pipeline_id: &str,
        group_id: &str,
    ) -> rusqlite::Result<Option<SemaphoreHistoryEntry>> {
        conn.query_row(
            "SELECT id, pipeline_id, group_id, root, snapshot, time_created FROM pipeline_semaphore_history
             WHERE pipeline_id = ? AND group_id = ? ORDER BY id DESC LIMIT 1",
            params![pipeline_id, group_id],
            Self::row_to_entry,
        )
        .optional()
    }
}

impl SemaphoreHistoryStore for SqliteSemaphoreHistoryStore {
    fn record_if_changed(
        &self,
        pipeline_id: &str,
        group: &SemaphoreGroup,
    ) -> Result<bool, SemaphoreError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| SemaphoreError::Database(e.to_string()))?;

        let latest_root: Option<String> = tx
            .query_row(
                "SELECT root FROM pipeline_semaphore_history WHERE pipeline_id = ? AND group_id = ? ORDER BY id DESC LIMIT 1",
                params![pipeline_id, group.id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| SemaphoreError::Database(e.to_string()))?;

        if latest_root.as_deref() == Some(group.root.as_str()) {
            return Ok(false);
        }

        let snapshot =
            serde_json::to_string(group).map_err(|e| SemaphoreError::Database(e.to_string()))?;
        tx.execute(
            "INSERT INTO pipeline_semaphore_history (pipeline_id, group_id, root, snapshot, time_created) VALUES (?, ?, ?, ?, ?)",
            params![
                pipeline_id,
                group.id,
                group.root,
                snapshot,
                db::format_timestamp(&self.clock.now())
            ],
        )
        .map_err(|e| SemaphoreError::Database(e.to_string()))?;

        tx.commit()
            .map_err(|e| SemaphoreError::Database(e.to_string()))?;
        Ok(true)
    }

    fn get_by_root(
        &self,
        pipeline_id: &str,
        group_id: &str,
        root: &str,
    ) -> Result<Option<SemaphoreGroup>, SemaphoreError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, pipeline_id, group_id, root, snapshot, time_created FROM pipeline_semaphore_history
             WHERE pipeline_id = ? AND group_id = ? AND root = ? ORDER BY id DESC LIMIT 1",
            params![pipeline_id, group_id, root],
            Self::row_to_entry,
        )
        .optional()
        .map(|entry| entry.map(|e| e.snapshot))
        .map_err(|e| SemaphoreError::Database(e.to_string()))
    }

    fn latest(
        &self,
        pipeline_id: &str,
        group_id: &str,
    ) -> Result<Option<SemaphoreHistoryEntry>, SemaphoreError> {
        let conn = self.conn()?;
        Self::select_latest(&conn, pipeline_id, group_id)
            .map_err(|e| SemaphoreError::Database(e.to_string()))
    }

    fn group_ids(&self, pipeline_id: &str) -> Result<Vec<String>, SemaphoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT DISTINCT group_id FROM pipeline_semaphore_history WHERE pipeline_id = ? ORDER BY group_id",
            )
            .map_err(|e| SemaphoreError::Database(e.to_string()))?;
        let rows = stmt
            .query_map(params![pipeline_id], |row| row.get(0))
            .map_err(|e| SemaphoreError::Database(e.to_string()))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row.map_err(|e| SemaphoreError::Database(e.to_string()))?);
        }
        Ok(ids)
    }

    fn delete_group(&self, pipeline_id: &str, group_id: &str) -> Result<u64, SemaphoreError> {
        let conn = self.conn()?;
        let deleted = conn
            .execute(
                "DELETE FROM pipeline_semaphore_history WHERE pipeline_id = ? AND group_id = ?",
                params![pipeline_id, group_id],
            )
            .map_err(|e| SemaphoreError::Database(e.to_string()))?;
        Ok(deleted as u64)
    }

    fn delete_for_pipeline(&self, pipeline_id: &str) -> Result<u64, SemaphoreError> {
        let conn = self.conn()?;
        let deleted = conn
            .execute(
                "DELETE FROM pipeline_semaphore_history WHERE pipeline_id = ?",
                params![pipeline_id],
            )
            .map_err(|e| SemaphoreError::Database(e.to_string()))?;
        Ok(deleted as u64)
    }
}
