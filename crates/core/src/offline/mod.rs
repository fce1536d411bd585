//! Queue of check-ins uploaded by scanners that were offline at scan time.
//!
//! Entries are reconciled on the next pipeline load. Failed attempts stay
//! queued with the last failure reason until they succeed or an operator
//! deletes them.

mod sqlite;

pub use sqlite::SqliteOfflineCheckinStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineCheckin {
    pub pipeline_id: String,
    pub ticket_id: String,
    pub checker_email: String,
    pub checkin_timestamp: DateTime<Utc>,
    pub attempts: u32,
    pub failure_reason: Option<String>,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum OfflineCheckinError {
    #[error("Database error: {0}")]
    Database(String),
}

pub trait OfflineCheckinStore: Send + Sync {
    /// Queue a check-in. Returns false if the ticket is already queued for
    /// this pipeline.
    fn enqueue(
        &self,
        pipeline_id: &str,
        ticket_id: &str,
        checker_email: &str,
        checkin_timestamp: DateTime<Utc>,
    ) -> Result<bool, OfflineCheckinError>;

    /// Queued entries in upload order.
    fn list_for_pipeline(&self, pipeline_id: &str)
        -> Result<Vec<OfflineCheckin>, OfflineCheckinError>;

    fn record_failure(
        &self,
        pipeline_id: &str,
        ticket_id: &str,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<(), OfflineCheckinError>;

    fn remove(&self, pipeline_id: &str, ticket_id: &str) -> Result<bool, OfflineCheckinError>;

    fn delete_for_pipeline(&self, pipeline_id: &str) -> Result<u64, OfflineCheckinError>;
}
