//! Public facade over the scheduler, user accounts and stores.

mod issuance;
mod stores;

pub use issuance::{IssuanceService, PipelineStatusView};
pub use stores::ServiceStores;

use thiserror::Error;

use crate::pipeline::{DefinitionError, PipelineError};
use crate::scheduler::SchedulerError;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{0}")]
    InvalidDefinition(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<DefinitionError> for ServiceError {
    fn from(e: DefinitionError) -> Self {
        match e {
            DefinitionError::NotFound(id) => ServiceError::NotFound(format!("pipeline {}", id)),
            DefinitionError::Conflict(_) => ServiceError::Conflict(e.to_string()),
            DefinitionError::Database(msg) => ServiceError::Storage(msg),
            other => ServiceError::InvalidDefinition(other.to_string()),
        }
    }
}

impl From<SchedulerError> for ServiceError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::Definition(e) => e.into(),
            SchedulerError::NotFound(id) => ServiceError::NotFound(format!("pipeline {}", id)),
            SchedulerError::Storage(msg) => ServiceError::Storage(msg),
        }
    }
}
