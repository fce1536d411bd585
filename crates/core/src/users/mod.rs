//! Operator accounts, keyed by email.

mod sqlite;

pub use sqlite::SqliteUserStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub is_admin: bool,
    pub time_created: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum UserError {
    #[error("Database error: {0}")]
    Database(String),
}

pub trait UserStore: Send + Sync {
    /// Look up a user by email, creating it on first sight. The admin flag is
    /// refreshed on every call so that configuration changes take effect.
    fn get_or_create_by_email(&self, email: &str, is_admin: bool) -> Result<User, UserError>;

    fn get(&self, id: &str) -> Result<Option<User>, UserError>;

    fn get_by_email(&self, email: &str) -> Result<Option<User>, UserError>;
}
