//! Durable record of ledger-backed check-ins.
//!
//! A (pipeline, ticket) pair can be checked in once. A second attempt fails
//! with [`CheckinError::AlreadyCheckedIn`] and leaves the original record
//! untouched.

mod sqlite;

pub use sqlite::SqliteCheckinStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckinRecord {
    pub pipeline_id: String,
    pub ticket_id: String,
    pub checkin_timestamp: DateTime<Utc>,
    pub checker_email: String,
}

#[derive(Debug, Error)]
pub enum CheckinError {
    #[error("ticket {} already checked in by {} at {}", .existing.ticket_id, .existing.checker_email, .existing.checkin_timestamp)]
    AlreadyCheckedIn { existing: CheckinRecord },

    #[error("Database error: {0}")]
    Database(String),
}

pub trait CheckinStore: Send + Sync {
    /// Record a check-in. Fails without mutating anything if the ticket is
    /// already checked in.
    fn check_in(
        &self,
        pipeline_id: &str,
        ticket_id: &str,
        timestamp: DateTime<Utc>,
        checker_email: &str,
    ) -> Result<CheckinRecord, CheckinError>;

    fn get(&self, pipeline_id: &str, ticket_id: &str)
        -> Result<Option<CheckinRecord>, CheckinError>;

    fn list_for_pipeline(&self, pipeline_id: &str) -> Result<Vec<CheckinRecord>, CheckinError>;

    /// Delete check-ins for the given tickets. Returns the number deleted.
    fn delete_for_tickets(
        &self,
        pipeline_id: &str,
        ticket_ids: &[String],
    ) -> Result<u64, CheckinError>;

    fn delete_for_pipeline(&self, pipeline_id: &str) -> Result<u64, CheckinError>;
}
