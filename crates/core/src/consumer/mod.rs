//! Mapping from (pipeline, verified email) to the holder's current identity
//! commitment. This is the sole input to semaphore group membership.

mod sqlite;

pub use sqlite::SqliteConsumerStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerRecord {
    pub pipeline_id: String,
    pub email: String,
    pub commitment: String,
    pub time_created: DateTime<Utc>,
    pub time_updated: DateTime<Utc>,
}

/// Outcome of [`ConsumerStore::get_or_create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerUpdate {
    pub record: ConsumerRecord,
    /// The record did not exist before this call.
    pub created: bool,
    /// The stored commitment was replaced.
    pub commitment_changed: bool,
}

impl ConsumerUpdate {
    /// Whether group membership may have changed.
    pub fn affects_membership(&self) -> bool {
        self.created || self.commitment_changed
    }
}

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("Database error: {0}")]
    Database(String),
}

pub trait ConsumerStore: Send + Sync {
    /// Insert the consumer on first sight; on later calls, replace the
    /// commitment and bump `time_updated` only if the commitment differs.
    fn get_or_create(
        &self,
        pipeline_id: &str,
        email: &str,
        commitment: &str,
    ) -> Result<ConsumerUpdate, ConsumerError>;

    fn load_by_emails(
        &self,
        pipeline_id: &str,
        emails: &[String],
    ) -> Result<Vec<ConsumerRecord>, ConsumerError>;

    fn delete_for_pipeline(&self, pipeline_id: &str) -> Result<u64, ConsumerError>;
}
