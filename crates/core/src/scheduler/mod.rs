//! Supervisor for the fleet of pipeline instances.
//!
//! Each stored definition gets a slot. A slot holds at most one running
//! instance and drives its loads on an independent timer, so one slow or
//! failing pipeline never holds up another.

mod runner;
mod types;

pub use runner::PipelineScheduler;
pub use types::{SchedulerConfig, SchedulerError, SlotState, SlotStatus, UpsertResult};
