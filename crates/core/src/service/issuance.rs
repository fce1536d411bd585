//! The issuance service: definitions CRUD for operators and the public feed,
//! check-in and semaphore surfaces.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::{ServiceError, ServiceStores};
use crate::cache::CacheStore;
use crate::clock::Clock;
use crate::config::{CacheConfig, Config};
use crate::credential::{CredentialVerifier, Ed25519Scheme, KeySigner};
use crate::db;
use crate::metrics::CACHE_EVICTIONS;
use crate::offline::OfflineCheckinStore;
use crate::pipeline::{
    BackendRegistry, CheckinFailure, CheckinRequest, CheckinResult, DefinitionDraft,
    LoadSummary, OfflineTicketsRequest, OfflineTicketsResponse, OfflineUploadRequest,
    PipelineDefinition, PipelineDeps, PipelineInfo, PollFeedRequest, PollFeedResponse,
    TicketIssuer, TicketPipeline,
};
use crate::scheduler::{PipelineScheduler, SchedulerConfig, SlotStatus, UpsertResult};
use crate::semaphore::SemaphoreGroup;
use crate::users::{User, UserStore};

/// Slot status plus instance diagnostics, if an instance is running.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatusView {
    pub status: SlotStatus,
    pub info: Option<PipelineInfo>,
}

pub struct IssuanceService {
    scheduler: PipelineScheduler,
    users: Arc<dyn UserStore>,
    cache: Arc<dyn CacheStore>,
    offline: Arc<dyn OfflineCheckinStore>,
    verifier: Arc<CredentialVerifier>,
    clock: Arc<dyn Clock>,
    admin_emails: HashSet<String>,
    cache_config: CacheConfig,
    shutdown_tx: broadcast::Sender<()>,
}

impl IssuanceService {
    pub fn new(
        config: &Config,
        stores: ServiceStores,
        backends: BackendRegistry,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ServiceError> {
        let signer = KeySigner::from_hex_seed(&config.issuance.signing_key)
            .map_err(|e| ServiceError::Config(format!("issuance.signing_key: {}", e)))?;

        let verifier = Arc::new(CredentialVerifier::new(
            Arc::new(Ed25519Scheme),
            config.issuance.email_issuer_public_key.to_lowercase(),
            Arc::clone(&clock),
            config.credentials.timestamp_resolution_secs,
            config.credentials.max_cached_verifications,
        ));
        let issuer = Arc::new(TicketIssuer::new(
            Arc::new(signer),
            Arc::clone(&stores.cache),
        ));

        let deps = PipelineDeps {
            checkins: Arc::clone(&stores.checkins),
            offline: Arc::clone(&stores.offline),
            consumers: Arc::clone(&stores.consumers),
            semaphore_history: Arc::clone(&stores.semaphore_history),
            issuer,
            verifier: Arc::clone(&verifier),
            backends,
            clock: Arc::clone(&clock),
        };
        let scheduler = PipelineScheduler::new(
            Arc::clone(&stores.definitions),
            deps,
            SchedulerConfig::from(&config.pipelines),
        );

        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            scheduler,
            users: stores.users,
            cache: stores.cache,
            offline: stores.offline,
            verifier,
            clock,
            admin_emails: config
                .issuance
                .admin_emails
                .iter()
                .map(|e| e.trim().to_lowercase())
                .collect(),
            cache_config: config.cache.clone(),
            shutdown_tx,
        })
    }

    pub fn scheduler(&self) -> &PipelineScheduler {
        &self.scheduler
    }

    pub async fn start(&self) -> Result<(), ServiceError> {
        self.scheduler.start().await?;
        Ok(())
    }

    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(());
        self.scheduler.stop().await;
    }

    pub fn is_admin(&self, email: &str) -> bool {
        self.admin_emails.contains(&email.trim().to_lowercase())
    }

    /// The acting operator, created on first sight.
    pub fn operator(&self, email: &str) -> Result<User, ServiceError> {
        if email.trim().is_empty() {
            return Err(ServiceError::Forbidden("operator email is required".into()));
        }
        self.users
            .get_or_create_by_email(email, self.is_admin(email))
            .map_err(|e| ServiceError::Storage(e.to_string()))
    }

    // =========================================================================
    // Definitions
    // =========================================================================

    pub fn list_definitions(
        &self,
        operator_email: &str,
    ) -> Result<Vec<PipelineDefinition>, ServiceError> {
        let user = self.operator(operator_email)?;
        Ok(self
            .scheduler
            .list_definitions()?
            .into_iter()
            .filter(|d| user.is_admin || d.can_access(&user.id))
            .collect())
    }

    pub fn get_definition(
        &self,
        operator_email: &str,
        id: &str,
    ) -> Result<PipelineDefinition, ServiceError> {
        let (_, definition) = self.authorize(operator_email, id)?;
        Ok(definition)
    }

    /// Create or edit a definition. The returned restart handle resolves
    /// once the pipeline has been restarted.
    pub async fn upsert_definition(
        &self,
        operator_email: &str,
        draft: DefinitionDraft,
    ) -> Result<UpsertResult, ServiceError> {
        let user = self.operator(operator_email)?;
        let now = db::truncate(self.clock.now());

        let existing = match &draft.id {
            Some(id) => self.scheduler.get_definition(id)?,
            None => None,
        };

        let (definition, expected) = match existing {
            Some(existing) => {
                if !user.is_admin && !existing.can_access(&user.id) {
                    return Err(ServiceError::Forbidden(format!(
                        "no access to pipeline {}",
                        existing.id
                    )));
                }
                let owner = draft
                    .owner_user_id
                    .clone()
                    .unwrap_or_else(|| existing.owner_user_id.clone());
                if owner != existing.owner_user_id {
                    if !user.is_admin {
                        return Err(ServiceError::Forbidden(
                            "only admins can change the owner of a pipeline".into(),
                        ));
                    }
                    self.require_user(&owner)?;
                }
                let expected = draft.time_updated.ok_or_else(|| {
                    ServiceError::Conflict(format!(
                        "time_updated is required to edit pipeline {}",
                        existing.id
                    ))
                })?;
                (
                    PipelineDefinition {
                        id: existing.id,
                        owner_user_id: owner,
                        editor_user_ids: draft.editor_user_ids,
                        kind: draft.kind,
                        options: draft.options,
                        time_created: existing.time_created,
                        time_updated: now,
                    },
                    Some(expected),
                )
            }
            None => {
                let owner = draft.owner_user_id.unwrap_or_else(|| user.id.clone());
                if owner != user.id {
                    if !user.is_admin {
                        return Err(ServiceError::Forbidden(
                            "only admins can create pipelines for other users".into(),
                        ));
                    }
                    self.require_user(&owner)?;
                }
                (
                    PipelineDefinition {
                        id: draft.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
                        owner_user_id: owner,
                        editor_user_ids: draft.editor_user_ids,
                        kind: draft.kind,
                        options: draft.options,
                        time_created: now,
                        time_updated: now,
                    },
                    None,
                )
            }
        };

        Ok(self
            .scheduler
            .upsert_definition(definition, expected)
            .await?)
    }

    pub async fn delete_definition(&self, operator_email: &str, id: &str) -> Result<(), ServiceError> {
        self.authorize(operator_email, id)?;
        self.scheduler.delete_definition(id).await?;
        Ok(())
    }

    pub async fn pipeline_info(
        &self,
        operator_email: &str,
        id: &str,
    ) -> Result<PipelineStatusView, ServiceError> {
        self.authorize(operator_email, id)?;
        let status = self
            .scheduler
            .slot_status(id)
            .await
            .ok_or_else(|| ServiceError::NotFound(format!("pipeline {}", id)))?;
        let info = match self.scheduler.get_instance(id).await {
            Some(instance) => Some(instance.info().await?),
            None => None,
        };
        Ok(PipelineStatusView { status, info })
    }

    /// Remove a queued offline check-in that cannot be reconciled.
    pub fn delete_offline_checkin(
        &self,
        operator_email: &str,
        pipeline_id: &str,
        ticket_id: &str,
    ) -> Result<(), ServiceError> {
        let (user, _) = self.authorize(operator_email, pipeline_id)?;
        let removed = self
            .offline
            .remove(pipeline_id, ticket_id)
            .map_err(|e| ServiceError::Storage(e.to_string()))?;
        if !removed {
            return Err(ServiceError::NotFound(format!(
                "offline check-in for ticket {}",
                ticket_id
            )));
        }
        info!(
            pipeline_id = %pipeline_id,
            ticket_id = %ticket_id,
            operator = %user.email,
            "Offline check-in deleted by operator"
        );
        Ok(())
    }

    pub async fn perform_load(
        &self,
        operator_email: &str,
        id: &str,
    ) -> Result<LoadSummary, ServiceError> {
        self.authorize(operator_email, id)?;
        Ok(self.scheduler.perform_load(id).await?)
    }

    // =========================================================================
    // Feeds and check-ins
    // =========================================================================

    pub async fn poll_feed(&self, request: &PollFeedRequest) -> Result<PollFeedResponse, ServiceError> {
        let instance = self
            .find_instance(|p| p.serves_feed(&request.feed_id))
            .await
            .ok_or_else(|| ServiceError::NotFound(format!("feed {}", request.feed_id)))?;
        Ok(instance.poll_feed(request).await?)
    }

    pub async fn check_in(&self, request: &CheckinRequest) -> CheckinResult {
        match self.find_instance(|p| p.has_event(&request.event_id)).await {
            Some(instance) => instance.check_in(request).await,
            None => {
                // Credential problems take precedence over an unknown event.
                if let Err(e) = self
                    .verifier
                    .verify_and_require_email(&request.credential)
                    .await
                {
                    return CheckinResult::failed(CheckinFailure::InvalidSignature {
                        reason: e.to_string(),
                    });
                }
                CheckinResult::failed(CheckinFailure::InvalidTicket {
                    reason: format!("no pipeline serves event {}", request.event_id),
                })
            }
        }
    }

    /// Queue offline check-ins on every pipeline serving one of the events.
    pub async fn upload_offline_checkins(
        &self,
        request: &OfflineUploadRequest,
    ) -> Result<usize, ServiceError> {
        self.verifier
            .verify_and_require_email(&request.credential)
            .await
            .map_err(|e| ServiceError::Pipeline(e.into()))?;

        let mut queued = 0;
        for instance in self.scheduler.get_all_instances().await {
            let relevant = request
                .ticket_ids_by_event
                .keys()
                .any(|event_id| instance.has_event(event_id));
            if relevant {
                queued += instance.upload_offline_checkins(request).await?;
            }
        }
        Ok(queued)
    }

    pub async fn offline_tickets(
        &self,
        request: &OfflineTicketsRequest,
    ) -> Result<OfflineTicketsResponse, ServiceError> {
        self.verifier
            .verify_and_require_email(&request.credential)
            .await
            .map_err(|e| ServiceError::Pipeline(e.into()))?;

        let mut tickets = Vec::new();
        for instance in self.scheduler.get_all_instances().await {
            tickets.extend(instance.offline_tickets(&request.credential).await?);
        }
        tickets.sort_by(|a, b| a.event_id.cmp(&b.event_id).then(a.id.cmp(&b.id)));
        Ok(OfflineTicketsResponse { tickets })
    }

    // =========================================================================
    // Semaphore groups
    // =========================================================================

    pub async fn semaphore_group(
        &self,
        pipeline_id: &str,
        group_id: &str,
    ) -> Result<SemaphoreGroup, ServiceError> {
        self.running_instance(pipeline_id)
            .await?
            .semaphore_group(group_id)?
            .ok_or_else(|| group_not_found(pipeline_id, group_id))
    }

    pub async fn semaphore_group_by_root(
        &self,
        pipeline_id: &str,
        group_id: &str,
        root: &str,
    ) -> Result<SemaphoreGroup, ServiceError> {
        self.running_instance(pipeline_id)
            .await?
            .semaphore_group_by_root(group_id, root)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("root {} of group {}", root, group_id))
            })
    }

    pub async fn semaphore_latest_root(
        &self,
        pipeline_id: &str,
        group_id: &str,
    ) -> Result<String, ServiceError> {
        self.running_instance(pipeline_id)
            .await?
            .semaphore_latest_root(group_id)?
            .ok_or_else(|| group_not_found(pipeline_id, group_id))
    }

    // =========================================================================
    // Cache
    // =========================================================================

    /// Run one eviction pass over the artifact cache.
    pub fn evict_cache(&self) -> Result<u64, ServiceError> {
        evict(self.cache.as_ref(), &self.cache_config)
    }

    /// Run [`Self::evict_cache`] on the configured interval until the
    /// service is stopped.
    pub fn spawn_cache_eviction(&self) -> JoinHandle<()> {
        let cache = Arc::clone(&self.cache);
        let config = self.cache_config.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let interval = Duration::from_secs(config.eviction_interval_secs.max(1));

        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "Cache eviction loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Cache eviction loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        if let Err(e) = evict(cache.as_ref(), &config) {
                            error!(error = %e, "Cache eviction failed");
                        }
                    }
                }
            }
        })
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn authorize(
        &self,
        operator_email: &str,
        id: &str,
    ) -> Result<(User, PipelineDefinition), ServiceError> {
        let user = self.operator(operator_email)?;
        let definition = self
            .scheduler
            .get_definition(id)?
            .ok_or_else(|| ServiceError::NotFound(format!("pipeline {}", id)))?;
        if !user.is_admin && !definition.can_access(&user.id) {
            return Err(ServiceError::Forbidden(format!("no access to pipeline {}", id)));
        }
        Ok((user, definition))
    }

    fn require_user(&self, user_id: &str) -> Result<(), ServiceError> {
        match self.users.get(user_id) {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(ServiceError::InvalidDefinition(format!(
                "owner {} does not exist",
                user_id
            ))),
            Err(e) => Err(ServiceError::Storage(e.to_string())),
        }
    }

    async fn find_instance(
        &self,
        predicate: impl Fn(&TicketPipeline) -> bool,
    ) -> Option<Arc<TicketPipeline>> {
        self.scheduler
            .get_all_instances()
            .await
            .into_iter()
            .find(|p| predicate(p))
    }

    async fn running_instance(&self, id: &str) -> Result<Arc<TicketPipeline>, ServiceError> {
        self.scheduler
            .get_instance(id)
            .await
            .ok_or_else(|| ServiceError::NotFound(format!("pipeline {}", id)))
    }
}

fn group_not_found(pipeline_id: &str, group_id: &str) -> ServiceError {
    ServiceError::NotFound(format!(
        "semaphore group {} of pipeline {}",
        group_id, pipeline_id
    ))
}

fn evict(cache: &dyn CacheStore, config: &CacheConfig) -> Result<u64, ServiceError> {
    let deleted = cache
        .evict_expired(config.max_age_days, config.max_entries)
        .map_err(|e| ServiceError::Storage(e.to_string()))?;
    CACHE_EVICTIONS.inc_by(deleted);
    if deleted > 0 {
        info!(deleted, "Evicted cache entries");
    } else {
        debug!("Cache eviction found nothing to delete");
    }
    Ok(deleted)
}
