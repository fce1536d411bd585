//! Pipeline scheduler implementation.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::Utc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::types::{SchedulerConfig, SchedulerError, SlotState, SlotStatus, UpsertResult};
use crate::pipeline::{
    DefinitionError, DefinitionStore, LoadSummary, LogLevel, PipelineDefinition, PipelineDeps,
    PipelineLog, TicketPipeline,
};

/// Runtime pairing of a definition with its instance. Never persisted.
struct PipelineSlot {
    definition: PipelineDefinition,
    instance: Option<Arc<TicketPipeline>>,
    state: SlotState,
    load_incident_id: Option<String>,
    last_alert_at: Option<chrono::DateTime<Utc>>,
    last_error: Option<String>,
    /// Set from the scheduler-wide counter whenever a restart is claimed; a
    /// restart only touches the slot while the generation is unchanged.
    generation: u64,
    timer: Option<broadcast::Sender<()>>,
}

impl PipelineSlot {
    fn new(definition: PipelineDefinition) -> Self {
        Self {
            definition,
            instance: None,
            state: SlotState::Stopped,
            load_incident_id: None,
            last_alert_at: None,
            last_error: None,
            generation: 0,
            timer: None,
        }
    }

    /// Detach the instance and its timer.
    fn take_instance(&mut self) -> Option<Arc<TicketPipeline>> {
        if let Some(timer) = self.timer.take() {
            let _ = timer.send(());
        }
        self.instance.take()
    }
}

struct SchedulerInner {
    definitions: Arc<dyn DefinitionStore>,
    deps: PipelineDeps,
    config: SchedulerConfig,
    slots: RwLock<HashMap<String, PipelineSlot>>,
    /// Serializes definition writes so id-uniqueness checks see every
    /// committed definition.
    write_lock: Mutex<()>,
    next_generation: AtomicU64,
    running: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
}

/// Owns every pipeline slot. Cheap to clone.
#[derive(Clone)]
pub struct PipelineScheduler {
    inner: Arc<SchedulerInner>,
}

impl PipelineScheduler {
    pub fn new(
        definitions: Arc<dyn DefinitionStore>,
        deps: PipelineDeps,
        config: SchedulerConfig,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            inner: Arc::new(SchedulerInner {
                definitions,
                deps,
                config,
                slots: RwLock::new(HashMap::new()),
                write_lock: Mutex::new(()),
                next_generation: AtomicU64::new(1),
                running: AtomicBool::new(false),
                shutdown_tx,
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Start an instance for every stored definition, each with an initial
    /// load. Definitions are started concurrently.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            warn!("Pipeline scheduler already running");
            return Ok(());
        }

        let claimed = {
            let _write = self.inner.write_lock.lock().await;
            let definitions = self.inner.definitions.list()?;
            let mut claimed = Vec::with_capacity(definitions.len());
            for definition in definitions {
                let generation = self.inner.claim_slot(&definition).await;
                claimed.push((definition, generation));
            }
            claimed
        };
        info!(pipelines = claimed.len(), "Starting pipeline scheduler");

        let restarts: Vec<_> = claimed
            .into_iter()
            .map(|(definition, generation)| {
                let inner = Arc::clone(&self.inner);
                async move { SchedulerInner::restart(inner, definition, generation).await }
            })
            .collect();
        let states = futures::future::join_all(restarts).await;

        let failed = states.iter().filter(|s| **s == SlotState::Failed).count();
        info!(
            started = states.len() - failed,
            failed, "Pipeline scheduler started"
        );
        Ok(())
    }

    /// Stop every timer and instance.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            warn!("Pipeline scheduler not running");
            return;
        }

        info!("Stopping pipeline scheduler");
        let _ = self.inner.shutdown_tx.send(());

        let mut slots = self.inner.slots.write().await;
        for slot in slots.values_mut() {
            slot.state = SlotState::Stopping;
            if let Some(instance) = slot.take_instance() {
                instance.stop();
            }
            slot.state = SlotState::Stopped;
        }
        info!("Pipeline scheduler stopped");
    }

    pub fn list_definitions(&self) -> Result<Vec<PipelineDefinition>, SchedulerError> {
        Ok(self.inner.definitions.list()?)
    }

    pub fn get_definition(&self, id: &str) -> Result<Option<PipelineDefinition>, SchedulerError> {
        Ok(self.inner.definitions.get(id)?)
    }

    /// Validate and persist a definition, then restart its slot in the
    /// background. `expected_time_updated` must be the stored `time_updated`
    /// when replacing an existing definition and `None` when creating one.
    pub async fn upsert_definition(
        &self,
        definition: PipelineDefinition,
        expected_time_updated: Option<chrono::DateTime<Utc>>,
    ) -> Result<UpsertResult, SchedulerError> {
        definition.options.validate()?;

        let (created, generation) = {
            let _write = self.inner.write_lock.lock().await;
            let all = self.inner.definitions.list()?;
            definition.check_ids_available(&all)?;

            let previous = all.into_iter().find(|d| d.id == definition.id);
            match (&previous, expected_time_updated) {
                (None, None) => self.inner.definitions.insert(&definition)?,
                (Some(previous), Some(expected)) => {
                    if crate::db::truncate(expected) != previous.time_updated {
                        return Err(DefinitionError::Conflict(definition.id.clone()).into());
                    }
                    self.inner.delete_removed_manual_checkins(previous, &definition)?;
                    self.inner.definitions.update(&definition, expected)?
                }
                (Some(_), None) | (None, Some(_)) => {
                    return Err(DefinitionError::Conflict(definition.id.clone()).into())
                }
            }
            (previous.is_none(), self.inner.claim_slot(&definition).await)
        };

        info!(
            pipeline_id = %definition.id,
            name = %definition.name(),
            created,
            "Pipeline definition saved"
        );

        let inner = Arc::clone(&self.inner);
        let restarted = definition.clone();
        let restart = tokio::spawn(async move {
            SchedulerInner::restart(inner, restarted, generation).await
        });

        Ok(UpsertResult {
            definition,
            restart,
        })
    }

    /// Remove a definition, its instance and every row it owns.
    pub async fn delete_definition(&self, id: &str) -> Result<(), SchedulerError> {
        {
            let _write = self.inner.write_lock.lock().await;
            if !self.inner.definitions.delete(id)? {
                return Err(SchedulerError::NotFound(id.to_string()));
            }
            // Removing the slot supersedes any restart claimed before the delete.
            if let Some(mut slot) = self.inner.slots.write().await.remove(id) {
                if let Some(instance) = slot.take_instance() {
                    instance.stop();
                }
            }
        }

        let deps = &self.inner.deps;
        let storage = |e: &dyn std::fmt::Display| SchedulerError::Storage(e.to_string());
        let checkins = deps.checkins.delete_for_pipeline(id).map_err(|e| storage(&e))?;
        let offline = deps.offline.delete_for_pipeline(id).map_err(|e| storage(&e))?;
        let consumers = deps.consumers.delete_for_pipeline(id).map_err(|e| storage(&e))?;
        let history = deps
            .semaphore_history
            .delete_for_pipeline(id)
            .map_err(|e| storage(&e))?;

        info!(
            pipeline_id = %id,
            checkins, offline, consumers, history,
            "Pipeline definition deleted"
        );
        Ok(())
    }

    /// Running instances.
    pub async fn get_all_instances(&self) -> Vec<Arc<TicketPipeline>> {
        self.inner
            .slots
            .read()
            .await
            .values()
            .filter_map(|slot| slot.instance.clone())
            .collect()
    }

    pub async fn get_instance(&self, id: &str) -> Option<Arc<TicketPipeline>> {
        self.inner
            .slots
            .read()
            .await
            .get(id)
            .and_then(|slot| slot.instance.clone())
    }

    pub async fn slot_status(&self, id: &str) -> Option<SlotStatus> {
        let slots = self.inner.slots.read().await;
        let slot = slots.get(id)?;
        let last_load = match &slot.instance {
            Some(instance) => instance.last_load().await,
            None => None,
        };
        Some(SlotStatus {
            definition_id: slot.definition.id.clone(),
            name: slot.definition.name().to_string(),
            kind: slot.definition.kind,
            state: slot.state,
            load_incident_id: slot.load_incident_id.clone(),
            last_error: slot.last_error.clone(),
            last_alert_at: slot.last_alert_at,
            last_load,
        })
    }

    /// Run one load now, waiting for an in-flight load to finish first.
    pub async fn perform_load(&self, id: &str) -> Result<LoadSummary, SchedulerError> {
        let (instance, last_error) = {
            let slots = self.inner.slots.read().await;
            let slot = slots
                .get(id)
                .ok_or_else(|| SchedulerError::NotFound(id.to_string()))?;
            (slot.instance.clone(), slot.last_error.clone())
        };

        let Some(instance) = instance else {
            return Ok(failed_to_start_summary(last_error));
        };

        self.inner.mark_reloading(&instance).await;
        let summary = instance.load().await;
        self.inner.record_load(&instance, &summary).await;
        Ok(summary)
    }
}

impl SchedulerInner {
    /// Record `definition` in its slot, creating the slot if needed, and
    /// return the generation a restart must hold. Called under `write_lock`.
    async fn claim_slot(&self, definition: &PipelineDefinition) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let mut slots = self.slots.write().await;
        let slot = slots
            .entry(definition.id.clone())
            .or_insert_with(|| PipelineSlot::new(definition.clone()));
        slot.generation = generation;
        slot.definition = definition.clone();
        generation
    }

    /// Replace the slot's instance with one built from `definition`. Does
    /// nothing if the slot was deleted or claimed again since `generation`.
    async fn restart(
        inner: Arc<Self>,
        definition: PipelineDefinition,
        generation: u64,
    ) -> SlotState {
        let id = definition.id.clone();

        let old = {
            let mut slots = inner.slots.write().await;
            let Some(slot) = slots
                .get_mut(&id)
                .filter(|slot| slot.generation == generation)
            else {
                debug!(pipeline_id = %id, generation, "Restart superseded before it started");
                return SlotState::Stopped;
            };
            let old = slot.take_instance();
            slot.state = if old.is_some() {
                SlotState::Stopping
            } else {
                SlotState::Starting
            };
            old
        };

        if let Some(old) = old {
            old.stop();
            debug!(pipeline_id = %id, "Stopped previous instance");
        }

        if !inner.running.load(Ordering::SeqCst) {
            inner
                .with_current_slot(&id, generation, |slot| slot.state = SlotState::Stopped)
                .await;
            return SlotState::Stopped;
        }

        inner
            .with_current_slot(&id, generation, |slot| slot.state = SlotState::Starting)
            .await;

        let built = TicketPipeline::new(definition, inner.deps.clone()).and_then(|instance| {
            instance.start()?;
            Ok(instance)
        });

        let instance = match built {
            Ok(instance) => Arc::new(instance),
            Err(e) => {
                error!(pipeline_id = %id, error = %e, "Pipeline failed to start");
                let now = inner.deps.clock.now();
                let alert_throttle = inner.config.alert_throttle;
                let recorded = inner
                    .with_current_slot(&id, generation, |slot| {
                        slot.state = SlotState::Failed;
                        slot.last_error = Some(format!("failed to start pipeline: {}", e));
                        open_incident(slot, now, alert_throttle);
                    })
                    .await;
                return if recorded {
                    SlotState::Failed
                } else {
                    SlotState::Stopped
                };
            }
        };

        let installed = inner
            .with_current_slot(&id, generation, |slot| {
                slot.instance = Some(Arc::clone(&instance));
                slot.state = SlotState::Running;
                slot.last_error = None;
            })
            .await;
        if !installed || !inner.running.load(Ordering::SeqCst) {
            debug!(pipeline_id = %id, "Restart superseded, discarding instance");
            instance.stop();
            return SlotState::Stopped;
        }

        inner.mark_reloading(&instance).await;
        let summary = instance.load().await;
        inner.record_load(&instance, &summary).await;

        let timer = Self::spawn_timer(Arc::downgrade(&inner), Arc::clone(&instance));
        let mut timer = Some(timer);
        let state = {
            let mut slots = inner.slots.write().await;
            match slots.get_mut(&id) {
                Some(slot)
                    if slot.generation == generation
                        && slot
                            .instance
                            .as_ref()
                            .is_some_and(|i| Arc::ptr_eq(i, &instance)) =>
                {
                    slot.timer = timer.take();
                    slot.state
                }
                _ => SlotState::Stopped,
            }
        };
        if let Some(orphan) = timer {
            let _ = orphan.send(());
        }

        info!(pipeline_id = %id, generation, "Pipeline running");
        state
    }

    /// Drop ledger rows of manual tickets removed from the definition. Runs
    /// before the new definition is stored, so a failure leaves both the
    /// definition and the ledger unchanged.
    fn delete_removed_manual_checkins(
        &self,
        previous: &PipelineDefinition,
        current: &PipelineDefinition,
    ) -> Result<(), SchedulerError> {
        let kept = current.options.manual_ticket_ids();
        let removed: Vec<String> = previous
            .options
            .manual_ticket_ids()
            .difference(&kept)
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if removed.is_empty() {
            return Ok(());
        }

        let deleted = self
            .deps
            .checkins
            .delete_for_tickets(&current.id, &removed)
            .map_err(|e| {
                error!(
                    pipeline_id = %current.id,
                    error = %e,
                    "Failed to delete check-ins of removed manual tickets"
                );
                SchedulerError::Storage(format!(
                    "failed to delete check-ins of removed manual tickets: {}",
                    e
                ))
            })?;
        info!(
            pipeline_id = %current.id,
            removed = removed.len(),
            deleted,
            "Deleted check-ins of removed manual tickets"
        );
        Ok(())
    }

    fn spawn_timer(inner: Weak<Self>, instance: Arc<TicketPipeline>) -> broadcast::Sender<()> {
        let (stop_tx, mut stop_rx) = broadcast::channel(1);
        let (interval, mut shutdown_rx) = match inner.upgrade() {
            Some(strong) => (
                strong.config.refresh_interval,
                strong.shutdown_tx.subscribe(),
            ),
            None => return stop_tx,
        };

        tokio::spawn(async move {
            debug!(pipeline_id = %instance.id(), "Load timer started");
            loop {
                tokio::select! {
                    _ = stop_rx.recv() => break,
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(interval) => {
                        if instance.is_stopped() {
                            break;
                        }
                        let Some(inner) = inner.upgrade() else {
                            break;
                        };
                        let instance = Arc::clone(&instance);
                        tokio::spawn(async move {
                            inner.mark_reloading(&instance).await;
                            if let Some(summary) = instance.try_load().await {
                                inner.record_load(&instance, &summary).await;
                            }
                        });
                    }
                }
            }
            debug!(pipeline_id = %instance.id(), "Load timer stopped");
        });

        stop_tx
    }

    async fn mark_reloading(&self, instance: &Arc<TicketPipeline>) {
        let mut slots = self.slots.write().await;
        if let Some(slot) = slots.get_mut(instance.id()) {
            if is_current(slot, instance) && slot.state == SlotState::Running {
                slot.state = SlotState::Reloading;
            }
        }
    }

    /// Fold a load outcome into the slot: open or resolve the incident and
    /// emit throttled alerts.
    async fn record_load(&self, instance: &Arc<TicketPipeline>, summary: &LoadSummary) {
        let now = self.deps.clock.now();
        let mut slots = self.slots.write().await;
        let Some(slot) = slots.get_mut(instance.id()) else {
            return;
        };
        if !is_current(slot, instance) {
            return;
        }

        if slot.state == SlotState::Reloading {
            slot.state = SlotState::Running;
        }

        if summary.success {
            slot.last_error = None;
            if let Some(incident) = slot.load_incident_id.take() {
                info!(pipeline_id = %instance.id(), incident = %incident, "Pipeline incident resolved");
            }
            slot.last_alert_at = None;
        } else {
            slot.last_error = summary.error_message.clone();
            open_incident(slot, now, self.config.alert_throttle);
        }
    }

    /// Apply `f` if the slot still belongs to `generation`.
    async fn with_current_slot(
        &self,
        id: &str,
        generation: u64,
        f: impl FnOnce(&mut PipelineSlot),
    ) -> bool {
        let mut slots = self.slots.write().await;
        match slots.get_mut(id) {
            Some(slot) if slot.generation == generation => {
                f(slot);
                true
            }
            _ => false,
        }
    }
}

fn is_current(slot: &PipelineSlot, instance: &Arc<TicketPipeline>) -> bool {
    slot.instance
        .as_ref()
        .is_some_and(|current| Arc::ptr_eq(current, instance))
}

fn open_incident(
    slot: &mut PipelineSlot,
    now: chrono::DateTime<Utc>,
    alert_throttle: std::time::Duration,
) {
    let incident = slot
        .load_incident_id
        .get_or_insert_with(|| Uuid::new_v4().to_string())
        .clone();

    let throttle =
        chrono::Duration::from_std(alert_throttle).unwrap_or_else(|_| chrono::Duration::days(36_500));
    let due = slot
        .last_alert_at
        .is_none_or(|last| now.signed_duration_since(last) >= throttle);
    if due {
        slot.last_alert_at = Some(now);
        error!(
            pipeline_id = %slot.definition.id,
            name = %slot.definition.name(),
            incident = %incident,
            error = slot.last_error.as_deref().unwrap_or_default(),
            "Pipeline incident"
        );
    }
}

fn failed_to_start_summary(last_error: Option<String>) -> LoadSummary {
    let now = Utc::now();
    let message = last_error.unwrap_or_else(|| "failed to start pipeline".to_string());
    LoadSummary {
        started_at: now,
        finished_at: now,
        success: false,
        atoms_loaded: 0,
        offline_tickets_checked_in: 0,
        offline_tickets_failed_to_check_in: 0,
        semaphore_groups_updated: 0,
        error_message: Some(message.clone()),
        log: vec![PipelineLog {
            level: LogLevel::Error,
            timestamp: now,
            message,
        }],
    }
}
