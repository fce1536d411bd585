//! Semaphore group membership and root history.
//!
//! Groups are recomputed from the consumer ledger after each load. Every
//! distinct root is appended to the history so that proofs made against an
//! older root can still be checked.

mod group;
mod provider;
mod sqlite;

pub use group::*;
pub use provider::*;
pub use sqlite::SqliteSemaphoreHistoryStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SemaphoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Consumer ledger error: {0}")]
    Consumers(#[from] crate::consumer::ConsumerError),
}

/// One recorded group snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemaphoreHistoryEntry {
    pub id: i64,
    pub pipeline_id: String,
    pub group_id: String,
    pub root: String,
    pub snapshot: SemaphoreGroup,
    pub time_created: DateTime<Utc>,
}

pub trait SemaphoreHistoryStore: Send + Sync {
    /// Append `group` unless its root equals the latest recorded root for
    /// that (pipeline, group). Returns whether an entry was appended.
    fn record_if_changed(
        &self,
        pipeline_id: &str,
        group: &SemaphoreGroup,
    ) -> Result<bool, SemaphoreError>;

    fn get_by_root(
        &self,
        pipeline_id: &str,
        group_id: &str,
        root: &str,
    ) -> Result<Option<SemaphoreGroup>, SemaphoreError>;

    fn latest(
        &self,
        pipeline_id: &str,
        group_id: &str,
    ) -> Result<Option<SemaphoreHistoryEntry>, SemaphoreError>;

    fn latest_root(&self, pipeline_id: &str, group_id: &str)
        -> Result<Option<String>, SemaphoreError> {
        Ok(self.latest(pipeline_id, group_id)?.map(|entry| entry.root))
    }

    /// Distinct group ids with recorded history for a pipeline.
    fn group_ids(&self, pipeline_id: &str) -> Result<Vec<String>, SemaphoreError>;

    fn delete_group(&self, pipeline_id: &str, group_id: &str) -> Result<u64, SemaphoreError>;

    fn delete_for_pipeline(&self, pipeline_id: &str) -> Result<u64, SemaphoreError>;
}
