use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{User, UserError, UserStore};
use crate::db;

pub struct SqliteUserStore {
    conn: Mutex<Connection>,
}

impl SqliteUserStore {
    pub fn new(path: &Path) -> Result<Self, UserError> {
        let conn = db::open(path).map_err(|e| UserError::Database(e.to_string()))?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, UserError> {
        let conn = db::open_in_memory().map_err(|e| UserError::Database(e.to_string()))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, UserError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                is_admin INTEGER NOT NULL DEFAULT 0,
                time_created TEXT NOT NULL
            );
            "#,
        )
        .map_err(|e| UserError::Database(e.to_string()))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, UserError> {
        self.conn
            .lock()
            .map_err(|_| UserError::Database("user connection lock poisoned".to_string()))
    }

    fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
        let ts: String = row.get(3)?;
        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            is_admin: row.get(2)?,
            time_created: db::parse_timestamp(3, &ts)?,
        })
    }

    fn select_by_email(conn: &Connection, email: &str) -> rusqlite::Result<Option<User>> {
        conn.query_row(
            "SELECT id, email, is_admin, time_created FROM users WHERE email = ?",
            params![email],
            Self::row_to_user,
        )
        .optional()
    }
}

impl UserStore for SqliteUserStore {
    fn get_or_create_by_email(&self, email: &str, is_admin: bool) -> Result<User, UserError> {
        let email = email.trim().to_lowercase();
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO users (id, email, is_admin, time_created) VALUES (?, ?, ?, ?)
             ON CONFLICT(email) DO UPDATE SET is_admin = excluded.is_admin",
            params![
                Uuid::new_v4().to_string(),
                email,
                is_admin,
                db::format_timestamp(&Utc::now())
            ],
        )
        .map_err(|e| UserError::Database(e.to_string()))?;

        Self::select_by_email(&conn, &email)
            .map_err(|e| UserError::Database(e.to_string()))?
            .ok_or_else(|| UserError::Database(format!("user {} vanished after upsert", email)))
    }

    fn get(&self, id: &str) -> Result<Option<User>, UserError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, email, is_admin, time_created FROM users WHERE id = ?",
            params![id],
            Self::row_to_user,
        )
        .optional()
        .map_err(|e| UserError::Database(e.to_string()))
    }

    fn get_by_email(&self, email: &str) -> Result<Option<User>, UserError> {
        let conn = self.conn()?;
        Self::select_by_email(&conn, &email.trim().to_lowercase())
            .map_err(|e| UserError::Database(e.to_string()))
    }
}
