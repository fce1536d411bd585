//! SQLite-backed offline check-in queue.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::{OfflineCheckin, OfflineCheckinError, OfflineCheckinStore};
use crate::db;

pub struct SqliteOfflineCheckinStore {
    conn: Mutex<Connection>,
}

impl SqliteOfflineCheckinStore {
    pub fn new(path: &Path) -> Result<Self, OfflineCheckinError> {
        let conn = db::open(path).map_err(|e| OfflineCheckinError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, OfflineCheckinError> {
        let conn =
            db::open_in_memory().map_err(|e| OfflineCheckinError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), OfflineCheckinError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS pipeline_offline_checkins (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pipeline_id TEXT NOT NULL,
                ticket_id TEXT NOT NULL,
                checker_email TEXT NOT NULL,
                checkin_timestamp TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                failure_reason TEXT,
                last_attempt_at TEXT,
                UNIQUE (pipeline_id, ticket_id)
            );
            "#,
        )
        .map_err(|e| OfflineCheckinError::Database(e.to_string()))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, OfflineCheckinError> {
        self.conn.lock().map_err(|_| {
            OfflineCheckinError::Database("offline queue connection lock poisoned".to_string())
        })
    }

    fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<OfflineCheckin> {
        let ts: String = row.get(3)?;
        let last_attempt: Option<String> = row.get(6)?;
        Ok(OfflineCheckin {
            pipeline_id: row.get(0)?,
            ticket_id: row.get(1)?,
            checker_email: row.get(2)?,
            checkin_timestamp: db::parse_timestamp(3, &ts)?,
            attempts: row.get(4)?,
            failure_reason: row.get(5)?,
            last_attempt_at: last_attempt
                .map(|v| db::parse_timestamp(6, &v))
                .transpose()?,
        })
    }
}

impl OfflineCheckinStore for SqliteOfflineCheckinStore {
    fn enqueue(
        &self,
        pipeline_id: &str,
        ticket_id: &str,
        checker_email: &str,
        checkin_timestamp: DateTime<Utc>,
    ) -> Result<bool, OfflineCheckinError> {
        let conn = self.conn()?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO pipeline_offline_checkins (pipeline_id, ticket_id, checker_email, checkin_timestamp) VALUES (?, ?, ?, ?)",
                params![
                    pipeline_id,
                    ticket_id,
                    checker_email,
                    db::format_timestamp(&checkin_timestamp)
                ],
            )
            .map_err(|e| OfflineCheckinError::Database(e.to_string()))?;
        Ok(inserted > 0)
    }

    fn list_for_pipeline(
        &self,
        pipeline_id: &str,
    ) -> Result<Vec<OfflineCheckin>, OfflineCheckinError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT pipeline_id, ticket_id, checker_email, checkin_timestamp, attempts, failure_reason, last_attempt_at
                 FROM pipeline_offline_checkins WHERE pipeline_id = ? ORDER BY id ASC",
            )
            .map_err(|e| OfflineCheckinError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![pipeline_id], Self::row_to_entry)
            .map_err(|e| OfflineCheckinError::Database(e.to_string()))?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.map_err(|e| OfflineCheckinError::Database(e.to_string()))?);
        }
        Ok(entries)
    }

    fn record_failure(
        &self,
        pipeline_id: &str,
        ticket_id: &str,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<(), OfflineCheckinError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE pipeline_offline_checkins SET attempts = attempts + 1, failure_reason = ?, last_attempt_at = ?
             WHERE pipeline_id = ? AND ticket_id = ?",
            params![reason, db::format_timestamp(&at), pipeline_id, ticket_id],
        )
        .map_err(|e| OfflineCheckinError::Database(e.to_string()))?;
        Ok(())
    }

    fn remove(&self, pipeline_id: &str, ticket_id: &str) -> Result<bool, OfflineCheckinError> {
        let conn = self.conn()?;
        let deleted = conn
            .execute(
                "DELETE FROM pipeline_offline_checkins WHERE pipeline_id = ? AND ticket_id = ?",
                params![pipeline_id, ticket_id],
            )
            .map_err(|e| OfflineCheckinError::Database(e.to_string()))?;
        Ok(deleted > 0)
    }

    fn delete_for_pipeline(&self, pipeline_id: &str) -> Result<u64, OfflineCheckinError> {
        let conn = self.conn()?;
        let deleted = conn
            .execute(
                "DELETE FROM pipeline_offline_checkins WHERE pipeline_id = ?",
                params![pipeline_id],
            )
            .map_err(|e| OfflineCheckinError::Database(e.to_string()))?;
        Ok(deleted as u64)
    }
}
