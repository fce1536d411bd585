pub mod auth;
pub mod cache;
pub mod checkin;
pub mod clock;
pub mod config;
pub mod consumer;
pub mod credential;
mod db;
pub mod metrics;
pub mod offline;
pub mod pipeline;
pub mod scheduler;
pub mod semaphore;
pub mod service;
pub mod testing;
pub mod users;

pub use auth::{
    create_authenticator, ApiKeyAuthenticator, AuthError, AuthRequest, Authenticator, Identity,
    NoneAuthenticator,
};
pub use cache::{CacheError, CacheStore, SqliteCacheStore};
pub use checkin::{CheckinError, CheckinRecord, CheckinStore, SqliteCheckinStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    load_config, load_config_from_str, validate_config, AuthMethod, Config, ConfigError,
    SanitizedConfig,
};
pub use consumer::{ConsumerError, ConsumerRecord, ConsumerStore, SqliteConsumerStore};
pub use credential::{
    CredentialVerifier, SerializedCredential, VerificationError, VerifiedCredential,
};
pub use offline::{OfflineCheckin, OfflineCheckinError, OfflineCheckinStore, SqliteOfflineCheckinStore};
pub use pipeline::{
    BackendRegistry, CheckinFailure, CheckinRequest, CheckinResult, DefinitionDraft,
    LoadSummary, PipelineDefinition, PipelineDeps, PipelineError, PipelineInfo, PipelineKind,
    TicketBackend, TicketPipeline,
};
pub use scheduler::{PipelineScheduler, SchedulerConfig, SchedulerError, SlotState, SlotStatus};
pub use semaphore::{SemaphoreError, SemaphoreHistoryEntry, SemaphoreHistoryStore};
pub use service::{IssuanceService, PipelineStatusView, ServiceError, ServiceStores};
pub use users::{SqliteUserStore, User, UserError, UserStore};
