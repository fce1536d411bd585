use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::config::PipelinesConfig;
use crate::pipeline::{DefinitionError, LoadSummary, PipelineDefinition, PipelineKind};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Delay between timer-driven loads of one pipeline.
    pub refresh_interval: Duration,
    /// Minimum delay between two alerts for the same failing pipeline.
    pub alert_throttle: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&PipelinesConfig::default())
    }
}

impl From<&PipelinesConfig> for SchedulerConfig {
    fn from(config: &PipelinesConfig) -> Self {
        Self {
            refresh_interval: Duration::from_millis(config.refresh_interval_ms),
            alert_throttle: Duration::from_secs(config.alert_throttle_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    Stopped,
    Starting,
    Running,
    Reloading,
    Stopping,
    Failed,
}

/// Operator view of one slot.
#[derive(Debug, Clone, Serialize)]
pub struct SlotStatus {
    pub definition_id: String,
    pub name: String,
    pub kind: PipelineKind,
    pub state: SlotState,
    pub load_incident_id: Option<String>,
    pub last_error: Option<String>,
    pub last_alert_at: Option<DateTime<Utc>>,
    pub last_load: Option<LoadSummary>,
}

/// A persisted definition and the restart it triggered. Awaiting `restart`
/// yields the slot state once the restart has settled.
#[derive(Debug)]
pub struct UpsertResult {
    pub definition: PipelineDefinition,
    pub restart: JoinHandle<SlotState>,
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error("pipeline not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),
}
