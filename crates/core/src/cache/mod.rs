//! Bounded key/value cache used to memoize issued artifacts.

mod sqlite;

pub use sqlite::SqliteCacheStore;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Database error: {0}")]
    Database(String),
}

/// One cached value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: String,
    pub time_created: DateTime<Utc>,
    pub time_updated: DateTime<Utc>,
}

pub trait CacheStore: Send + Sync {
    /// Insert or overwrite `key`. Overwrites keep the entry's creation time.
    fn set(&self, key: &str, value: &str) -> Result<CacheEntry, CacheError>;

    fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    /// Number of entries currently stored.
    fn size(&self) -> Result<u64, CacheError>;

    /// Keep only the most recent `max_entries` entries created within the
    /// last `max_age_days`, and delete everything older than the oldest of
    /// those. Returns the number of deleted entries.
    fn evict_expired(&self, max_age_days: u32, max_entries: u32) -> Result<u64, CacheError>;
}
