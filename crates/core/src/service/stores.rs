use std::path::Path;
use std::sync::Arc;

use super::ServiceError;
use crate::cache::{CacheStore, SqliteCacheStore};
use crate::checkin::{CheckinStore, SqliteCheckinStore};
use crate::clock::{Clock, SystemClock};
use crate::consumer::{ConsumerStore, SqliteConsumerStore};
use crate::offline::{OfflineCheckinStore, SqliteOfflineCheckinStore};
use crate::pipeline::{DefinitionStore, SqliteDefinitionStore};
use crate::semaphore::{SemaphoreHistoryStore, SqliteSemaphoreHistoryStore};
use crate::users::{SqliteUserStore, UserStore};

/// Every store the service needs, sharing one database.
#[derive(Clone)]
pub struct ServiceStores {
    pub definitions: Arc<dyn DefinitionStore>,
    pub users: Arc<dyn UserStore>,
    pub cache: Arc<dyn CacheStore>,
    pub checkins: Arc<dyn CheckinStore>,
    pub offline: Arc<dyn OfflineCheckinStore>,
    pub consumers: Arc<dyn ConsumerStore>,
    pub semaphore_history: Arc<dyn SemaphoreHistoryStore>,
}

fn storage(e: impl std::fmt::Display) -> ServiceError {
    ServiceError::Storage(e.to_string())
}

impl ServiceStores {
    /// Open every store on the database file at `path`.
    pub fn open(path: &Path) -> Result<Self, ServiceError> {
        Ok(Self {
            definitions: Arc::new(SqliteDefinitionStore::new(path).map_err(storage)?),
            users: Arc::new(SqliteUserStore::new(path).map_err(storage)?),
            cache: Arc::new(SqliteCacheStore::new(path).map_err(storage)?),
            checkins: Arc::new(SqliteCheckinStore::new(path).map_err(storage)?),
            offline: Arc::new(SqliteOfflineCheckinStore::new(path).map_err(storage)?),
            consumers: Arc::new(SqliteConsumerStore::new(path).map_err(storage)?),
            semaphore_history: Arc::new(SqliteSemaphoreHistoryStore::new(path).map_err(storage)?),
        })
    }

    pub fn in_memory() -> Result<Self, ServiceError> {
        Self::in_memory_with_clock(Arc::new(SystemClock))
    }

    /// In-memory stores whose timestamps come from `clock`.
    pub fn in_memory_with_clock(clock: Arc<dyn Clock>) -> Result<Self, ServiceError> {
        Ok(Self {
            definitions: Arc::new(SqliteDefinitionStore::in_memory().map_err(storage)?),
            users: Arc::new(SqliteUserStore::in_memory().map_err(storage)?),
            cache: Arc::new(
                SqliteCacheStore::in_memory_with_clock(Arc::clone(&clock)).map_err(storage)?,
            ),
            checkins: Arc::new(SqliteCheckinStore::in_memory().map_err(storage)?),
            offline: Arc::new(SqliteOfflineCheckinStore::in_memory().map_err(storage)?),
            consumers: Arc::new(
                SqliteConsumerStore::in_memory_with_clock(Arc::clone(&clock)).map_err(storage)?,
            ),
            semaphore_history: Arc::new(SqliteSemaphoreHistoryStore::in_memory().map_err(storage)?),
        })
    }
}
