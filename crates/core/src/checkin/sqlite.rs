//! SQLite-backed check-in ledger.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{CheckinError, CheckinRecord, CheckinStore};
use crate::db;

pub struct SqliteCheckinStore {
    conn: Mutex<Connection>,
}

impl SqliteCheckinStore {
    pub fn new(path: &Path) -> Result<Self, CheckinError> {
        let conn = db::open(path).map_err(|e| CheckinError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, CheckinError> {
        let conn = db::open_in_memory().map_err(|e| CheckinError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), CheckinError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS pipeline_checkins (
                pipeline_id TEXT NOT NULL,
                ticket_id TEXT NOT NULL,
                checkin_timestamp TEXT NOT NULL,
                checker_email TEXT NOT NULL,
                PRIMARY KEY (pipeline_id, ticket_id)
            );
            "#,
        )
        .map_err(|e| CheckinError::Database(e.to_string()))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, CheckinError> {
        self.conn
            .lock()
            .map_err(|_| CheckinError::Database("check-in connection lock poisoned".to_string()))
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<CheckinRecord> {
        let ts: String = row.get(2)?;
        Ok(CheckinRecord {
            pipeline_id: row.get(0)?,
            ticket_id: row.get(1)?,
            checkin_timestamp: db::parse_timestamp(2, &ts)?,
            checker_email: row.get(3)?,
        })
    }

    fn select(
        conn: &Connection,
        pipeline_id: &str,
        ticket_id: &str,
    ) -> rusqlite::Result<Option<CheckinRecord>> {
        conn.query_row(
            "SELECT pipeline_id, ticket_id, checkin_timestamp, checker_email FROM pipeline_checkins WHERE pipeline_id = ? AND ticket_id = ?",
            params![pipeline_id, ticket_id],
            Self::row_to_record,
        )
        .optional()
    }
}

impl CheckinStore for SqliteCheckinStore {
    fn check_in(
        &self,
        pipeline_id: &str,
        ticket_id: &str,
        timestamp: DateTime<Utc>,
        checker_email: &str,
    ) -> Result<CheckinRecord, CheckinError> {
        let conn = self.conn()?;
        let timestamp = db::truncate(timestamp);

        let inserted = conn.execute(
            "INSERT INTO pipeline_checkins (pipeline_id, ticket_id, checkin_timestamp, checker_email) VALUES (?, ?, ?, ?)",
            params![pipeline_id, ticket_id, db::format_timestamp(&timestamp), checker_email],
        );

        match inserted {
            Ok(_) => Ok(CheckinRecord {
                pipeline_id: pipeline_id.to_string(),
                ticket_id: ticket_id.to_string(),
                checkin_timestamp: timestamp,
                checker_email: checker_email.to_string(),
            }),
            Err(e) if db::is_constraint_violation(&e) => {
                let existing = Self::select(&conn, pipeline_id, ticket_id)
                    .map_err(|e| CheckinError::Database(e.to_string()))?
                    .ok_or_else(|| {
                        CheckinError::Database(format!(
                            "conflicting check-in for {} disappeared",
                            ticket_id
                        ))
                    })?;
                Err(CheckinError::AlreadyCheckedIn { existing })
            }
            Err(e) => Err(CheckinError::Database(e.to_string())),
        }
    }

    fn get(
        &self,
        pipeline_id: &str,
        ticket_id: &str,
    ) -> Result<Option<CheckinRecord>, CheckinError> {
        let conn = self.conn()?;
        Self::select(&conn, pipeline_id, ticket_id).map_err(|e| CheckinError::Database(e.to_string()))
    }

    fn list_for_pipeline(&self, pipeline_id: &str) -> Result<Vec<CheckinRecord>, CheckinError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT pipeline_id, ticket_id, checkin_timestamp, checker_email FROM pipeline_checkins WHERE pipeline_id = ? ORDER BY checkin_timestamp ASC",
            )
            .map_err(|e| CheckinError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![pipeline_id], Self::row_to_record)
            .map_err(|e| CheckinError::Database(e.to_string()))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(|e| CheckinError::Database(e.to_string()))?);
        }
        Ok(records)
    }

    fn delete_for_tickets(
        &self,
        pipeline_id: &str,
        ticket_ids: &[String],
    ) -> Result<u64, CheckinError> {
        if ticket_ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| CheckinError::Database(e.to_string()))?;

        let mut deleted = 0u64;
        {
            let mut stmt = tx
                .prepare("DELETE FROM pipeline_checkins WHERE pipeline_id = ? AND ticket_id = ?")
                .map_err(|e| CheckinError::Database(e.to_string()))?;
            for ticket_id in ticket_ids {
                deleted += stmt
                    .execute(params![pipeline_id, ticket_id])
                    .map_err(|e| CheckinError::Database(e.to_string()))?
                    as u64;
            }
        }

        tx.commit()
            .map_err(|e| CheckinError::Database(e.to_string()))?;
        Ok(deleted)
    }

    fn delete_for_pipeline(&self, pipeline_id: &str) -> Result<u64, CheckinError> {
        let conn = self.conn()?;
        let deleted = conn
            .execute(
                "DELETE FROM pipeline_checkins WHERE pipeline_id = ?",
                params![pipeline_id],
            )
            .map_err(|e| CheckinError::Database(e.to_string()))?;
        Ok(deleted as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, SubsecRound};

    fn now() -> DateTime<Utc> {
        Utc::now().trunc_subsecs(6)
    }

    #[test]
    fn test_first_check_in_succeeds() {
        let store = SqliteCheckinStore::in_memory().unwrap();
        let now = now();
        let record = store.check_in("p1", "t1", now, "checker@example.com").unwrap();
        assert_eq!(record.ticket_id, "t1");

        let fetched = store.get("p1", "t1").unwrap().unwrap();
        assert_eq!(fetched.checker_email, "checker@example.com");
    }

    #[test]
    fn test_second_check_in_reports_original() {
        let store = SqliteCheckinStore::in_memory().unwrap();
        let t0 = now();
        let t1 = t0 + Duration::minutes(10);
        store.check_in("p1", "t1", t0, "first@example.com").unwrap();

        for checker in ["first@example.com", "second@example.com"] {
            match store.check_in("p1", "t1", t1, checker) {
                Err(CheckinError::AlreadyCheckedIn { existing }) => {
                    assert_eq!(existing.checkin_timestamp, t0);
                    assert_eq!(existing.checker_email, "first@example.com");
                }
                other => panic!("expected AlreadyCheckedIn, got {:?}", other),
            }
        }

        let stored = store.get("p1", "t1").unwrap().unwrap();
        assert_eq!(stored.checkin_timestamp, t0);
    }

    #[test]
    fn test_same_ticket_id_in_other_pipeline() {
        let store = SqliteCheckinStore::in_memory().unwrap();
        store.check_in("p1", "t1", now(), "a@example.com").unwrap();
        assert!(store.check_in("p2", "t1", now(), "a@example.com").is_ok());
    }

    #[test]
    fn test_delete_for_tickets_allows_reuse() {
        let store = SqliteCheckinStore::in_memory().unwrap();
        store.check_in("p1", "t1", now(), "a@example.com").unwrap();
        store.check_in("p1", "t2", now(), "a@example.com").unwrap();

        let deleted = store
            .delete_for_tickets("p1", &["t1".to_string(), "missing".to_string()])
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get("p1", "t1").unwrap().is_none());
        assert!(store.check_in("p1", "t1", now(), "b@example.com").is_ok());
        assert_eq!(store.list_for_pipeline("p1").unwrap().len(), 2);
    }

    #[test]
    fn test_delete_for_pipeline() {
        let store = SqliteCheckinStore::in_memory().unwrap();
        store.check_in("p1", "t1", now(), "a@example.com").unwrap();
        store.check_in("p2", "t1", now(), "a@example.com").unwrap();

        assert_eq!(store.delete_for_pipeline("p1").unwrap(), 1);
        assert!(store.list_for_pipeline("p1").unwrap().is_empty());
        assert_eq!(store.list_for_pipeline("p2").unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_check_ins_have_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        let stores: Vec<_> = (0..4)
            .map(|_| std::sync::Arc::new(SqliteCheckinStore::new(&path).unwrap()))
            .collect();

        let handles: Vec<_> = stores
            .iter()
            .enumerate()
            .map(|(i, store)| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store
                        .check_in("p1", "t1", now(), &format!("c{}@example.com", i))
                        .is_ok()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(winners, 1);
    }
}
