//! SQLite-backed consumer ledger.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};

use super::{ConsumerError, ConsumerRecord, ConsumerStore, ConsumerUpdate};
use crate::clock::{Clock, SystemClock};
use crate::db;

/// Emails per `IN (...)` query; well below SQLite's parameter limit.
const EMAIL_BATCH: usize = 500;

pub struct SqliteConsumerStore {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl SqliteConsumerStore {
    pub fn new(path: &Path) -> Result<Self, ConsumerError> {
        let conn = db::open(path).map_err(|e| ConsumerError::Database(e.to_string()))?;
        Self::with_connection(conn, Arc::new(SystemClock))
    }

    pub fn in_memory() -> Result<Self, ConsumerError> {
        Self::in_memory_with_clock(Arc::new(SystemClock))
    }

    pub fn in_memory_with_clock(clock: Arc<dyn Clock>) -> Result<Self, ConsumerError> {
        let conn = db::open_in_memory().map_err(|e| ConsumerError::Database(e.to_string()))?;
        Self::with_connection(conn, clock)
    }

    fn with_connection(conn: Connection, clock: Arc<dyn Clock>) -> Result<Self, ConsumerError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS pipeline_consumers (
                pipeline_id TEXT NOT NULL,
                email TEXT NOT NULL,
                commitment TEXT NOT NULL,
                time_created TEXT NOT NULL,
                time_updated TEXT NOT NULL,
                PRIMARY KEY (pipeline_id, email)
            );
            "#,
        )
        .map_err(|e| ConsumerError::Database(e.to_string()))?;

        Ok(Self {
            conn: Mutex::new(conn),
            clock,
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, ConsumerError> {
        self.conn
            .lock()
            .map_err(|_| ConsumerError::Database("consumer connection lock poisoned".to_string()))
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<ConsumerRecord> {
        let created: String = row.get(3)?;
        let updated: String = row.get(4)?;
        Ok(ConsumerRecord {
            pipeline_id: row.get(0)?,
            email: row.get(1)?,
            commitment: row.get(2)?,
            time_created: db::parse_timestamp(3, &created)?,
            time_updated: db::parse_timestamp(4, &updated)?,
        })
    }
}

impl ConsumerStore for SqliteConsumerStore {
    fn get_or_create(
        &self,
        pipeline_id: &str,
        email: &str,
        commitment: &str,
    ) -> Result<ConsumerUpdate, ConsumerError> {
        let mut conn = self.conn()?;
        let now = db::truncate(self.clock.now());
        let tx = conn
            .transaction()
            .map_err(|e| ConsumerError::Database(e.to_string()))?;

        let existing = tx
            .query_row(
                "SELECT pipeline_id, email, commitment, time_created, time_updated FROM pipeline_consumers WHERE pipeline_id = ? AND email = ?",
                params![pipeline_id, email],
                Self::row_to_record,
            )
            .optional()
            .map_err(|e| ConsumerError::Database(e.to_string()))?;

        let update = match existing {
            None => {
                tx.execute(
                    "INSERT INTO pipeline_consumers (pipeline_id, email, commitment, time_created, time_updated) VALUES (?1, ?2, ?3, ?4, ?4)",
                    params![pipeline_id, email, commitment, db::format_timestamp(&now)],
                )
                .map_err(|e| ConsumerError::Database(e.to_string()))?;
                ConsumerUpdate {
                    record: ConsumerRecord {
                        pipeline_id: pipeline_id.to_string(),
                        email: email.to_string(),
                        commitment: commitment.to_string(),
                        time_created: now,
                        time_updated: now,
                    },
                    created: true,
                    commitment_changed: false,
                }
            }
            Some(record) if record.commitment == commitment => ConsumerUpdate {
                record,
                created: false,
                commitment_changed: false,
            },
            Some(mut record) => {
                tx.execute(
                    "UPDATE pipeline_consumers SET commitment = ?, time_updated = ? WHERE pipeline_id = ? AND email = ?",
                    params![commitment, db::format_timestamp(&now), pipeline_id, email],
                )
                .map_err(|e| ConsumerError::Database(e.to_string()))?;
                record.commitment = commitment.to_string();
                record.time_updated = now;
                ConsumerUpdate {
                    record,
                    created: false,
                    commitment_changed: true,
                }
            }
        };

        tx.commit()
            .map_err(|e| ConsumerError::Database(e.to_string()))?;
        Ok(update)
    }

    fn load_by_emails(
        &self,
        pipeline_id: &str,
        emails: &[String],
    ) -> Result<Vec<ConsumerRecord>, ConsumerError> {
        let conn = self.conn()?;
        let mut records = Vec::new();

        for batch in emails.chunks(EMAIL_BATCH) {
            let placeholders = vec!["?"; batch.len()].join(", ");
            let sql = format!(
                "SELECT pipeline_id, email, commitment, time_created, time_updated FROM pipeline_consumers WHERE pipeline_id = ? AND email IN ({}) ORDER BY email",
                placeholders
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| ConsumerError::Database(e.to_string()))?;

            let mut values: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(batch.len() + 1);
            values.push(&pipeline_id);
            for email in batch {
                values.push(email);
            }

            let rows = stmt
                .query_map(values.as_slice(), Self::row_to_record)
                .map_err(|e| ConsumerError::Database(e.to_string()))?;
            for row in rows {
                records.push(row.map_err(|e| ConsumerError::Database(e.to_string()))?);
            }
        }

        Ok(records)
    }

    fn delete_for_pipeline(&self, pipeline_id: &str) -> Result<u64, ConsumerError> {
        let conn = self.conn()?;
        let deleted = conn
            .execute(
                "DELETE FROM pipeline_consumers WHERE pipeline_id = ?",
                params![pipeline_id],
            )
            .map_err(|e| ConsumerError::Database(e.to_string()))?;
        Ok(deleted as u64)
    }
}
