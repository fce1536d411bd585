//! Pipeline definitions and running pipeline instances.
//!
//! A definition is validated and stored by the scheduler; an instance is built
//! from it with [`TicketPipeline::new`] and owns loading from the backend, the
//! feed, and check-ins.

mod backend;
mod definition;
mod definition_store;
mod issuance;
mod ticket_pipeline;
mod types;

pub use backend::*;
pub use definition::*;
pub use definition_store::{DefinitionStore, SqliteDefinitionStore};
pub use issuance::*;
pub use ticket_pipeline::{TicketPipeline, PAUSED_MESSAGE};
pub use types::*;

use std::sync::Arc;

use crate::checkin::CheckinStore;
use crate::clock::Clock;
use crate::consumer::ConsumerStore;
use crate::credential::CredentialVerifier;
use crate::offline::OfflineCheckinStore;
use crate::semaphore::SemaphoreHistoryStore;

/// Shared collaborators handed to every pipeline instance.
#[derive(Clone)]
pub struct PipelineDeps {
    pub checkins: Arc<dyn CheckinStore>,
    pub offline: Arc<dyn OfflineCheckinStore>,
    pub consumers: Arc<dyn ConsumerStore>,
    pub semaphore_history: Arc<dyn SemaphoreHistoryStore>,
    pub issuer: Arc<TicketIssuer>,
    pub verifier: Arc<CredentialVerifier>,
    pub backends: BackendRegistry,
    pub clock: Arc<dyn Clock>,
}
