//! SQLite-backed storage of pipeline definitions.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::definition::{DefinitionError, PipelineDefinition};
use crate::db;

pub trait DefinitionStore: Send + Sync {
    fn list(&self) -> Result<Vec<PipelineDefinition>, DefinitionError>;

    fn get(&self, id: &str) -> Result<Option<PipelineDefinition>, DefinitionError>;

    /// Insert a new definition. Fails with `Conflict` if the id exists.
    fn insert(&self, definition: &PipelineDefinition) -> Result<(), DefinitionError>;

    /// Replace a definition whose stored `time_updated` equals `expected`.
    /// Fails with `Conflict` otherwise.
    fn update(
        &self,
        definition: &PipelineDefinition,
        expected: DateTime<Utc>,
    ) -> Result<(), DefinitionError>;

    fn delete(&self, id: &str) -> Result<bool, DefinitionError>;
}

pub struct SqliteDefinitionStore {
    conn: Mutex<Connection>,
}

impl SqliteDefinitionStore {
    pub fn new(path: &Path) -> Result<Self, DefinitionError> {
        let conn = db::open(path).map_err(|e| DefinitionError::Database(e.to_string()))?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, DefinitionError> {
        let conn = db::open_in_memory().map_err(|e| DefinitionError::Database(e.to_string()))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, DefinitionError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS pipeline_definitions (
                id TEXT PRIMARY KEY,
                owner_user_id TEXT NOT NULL,
                editor_user_ids TEXT NOT NULL,
                kind TEXT NOT NULL,
                options TEXT NOT NULL,
                time_created TEXT NOT NULL,
                time_updated TEXT NOT NULL
            );
            "#,
        )
        .map_err(|e| DefinitionError::Database(e.to_string()))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DefinitionError> {
        self.conn.lock().map_err(|_| {
            DefinitionError::Database("definition connection lock poisoned".to_string())
        })
    }

    fn row_to_definition(row: &rusqlite::Row) -> rusqlite::Result<PipelineDefinition> {
        let editors: String = row.get(2)?;
        let kind: String = row.get(3)?;
        let options: String = row.get(4)?;
        let created: String = row.get(5)?;
        let updated: String = row.get(6)?;

        Ok(PipelineDefinition {
            id: row.get(0)?,
            owner_user_id: row.get(1)?,
            editor_user_ids: serde_json::from_str(&editors).map_err(|e| json_error(2, e))?,
            kind: kind.parse().map_err(|e: DefinitionError| {
                rusqlite::Error::FromSqlConversionFailure(
                    3,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?,
            options: serde_json::from_str(&options).map_err(|e| json_error(4, e))?,
            time_created: db::parse_timestamp(5, &created)?,
            time_updated: db::parse_timestamp(6, &updated)?,
        })
    }

    fn encode(
        definition: &PipelineDefinition,
    ) -> Result<(String, String), DefinitionError> {
        let editors = serde_json::to_string(&definition.editor_user_ids)
            .map_err(|e| DefinitionError::Database(e.to_string()))?;
        let options = serde_json::to_string(&definition.options)
            .map_err(|e| DefinitionError::Database(e.to_string()))?;
        Ok((editors, options))
    }
}

fn json_error(idx: usize, e: serde_json::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

const SELECT_COLUMNS: &str =
    "SELECT id, owner_user_id, editor_user_ids, kind, options, time_created, time_updated FROM pipeline_definitions";

impl DefinitionStore for SqliteDefinitionStore {
    fn list(&self) -> Result<Vec<PipelineDefinition>, DefinitionError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("{} ORDER BY time_created ASC, id ASC", SELECT_COLUMNS))
            .map_err(|e| DefinitionError::Database(e.to_string()))?;

        let rows = stmt
            .query_map([], Self::row_to_definition)
            .map_err(|e| DefinitionError::Database(e.to_string()))?;

        let mut definitions = Vec::new();
        for row in rows {
            definitions.push(row.map_err(|e| DefinitionError::Database(e.to_string()))?);
        }
        Ok(definitions)
    }

    fn get(&self, id: &str) -> Result<Option<PipelineDefinition>, DefinitionError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("{} WHERE id = ?", SELECT_COLUMNS),
            params![id],
            Self::row_to_definition,
        )
        .optional()
        .map_err(|e| DefinitionError::Database(e.to_string()))
    }

    fn insert(&self, definition: &PipelineDefinition) -> Result<(), DefinitionError> {
        let (editors, options) = Self::encode(definition)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO pipeline_definitions (id, owner_user_id, editor_user_ids, kind, options, time_created, time_updated) VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                definition.id,
                definition.owner_user_id,
                editors,
                definition.kind.as_str(),
                options,
                db::format_timestamp(&definition.time_created),
                db::format_timestamp(&definition.time_updated),
            ],
        )
        .map_err(|e| {
            if db::is_constraint_violation(&e) {
                DefinitionError::Conflict(definition.id.clone())
            } else {
                DefinitionError::Database(e.to_string())
            }
        })?;
        Ok(())
    }

    fn update(
        &self,
        definition: &PipelineDefinition,
        expected: DateTime<Utc>,
    ) -> Result<(), DefinitionError> {
        let (editors, options) = Self::encode(definition)?;
        let conn = self.conn()?;
        let updated = conn
            .execute(
                "UPDATE pipeline_definitions SET owner_user_id = ?, editor_user_ids = ?, kind = ?, options = ?, time_updated = ? WHERE id = ? AND time_updated = ?",
                params![
                    definition.owner_user_id,
                    editors,
                    definition.kind.as_str(),
                    options,
                    db::format_timestamp(&definition.time_updated),
                    definition.id,
                    db::format_timestamp(&expected),
                ],
            )
            .map_err(|e| DefinitionError::Database(e.to_string()))?;

        if updated == 0 {
            return Err(DefinitionError::Conflict(definition.id.clone()));
        }
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<bool, DefinitionError> {
        let conn = self.conn()?;
        let deleted = conn
            .execute("DELETE FROM pipeline_definitions WHERE id = ?", params![id])
            .map_err(|e| DefinitionError::Database(e.to_string()))?;
        Ok(deleted > 0)
    }
}
