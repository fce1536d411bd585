//! A running pipeline instance.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::backend::{BackendTicket, TicketBackend};
use super::definition::{PipelineDefinition, PipelineKind};
use super::issuance::TicketData;
use super::types::{
    CheckinFailure, CheckinRequest, CheckinResult, FeedAction, FeedInfo, FeedPermission,
    LoadSummary, LogLevel, OfflineTicket, OfflineUploadRequest, PipelineError, PipelineInfo,
    PipelineLog, PipelineTicket, PollFeedRequest, PollFeedResponse,
};
use super::PipelineDeps;
use crate::checkin::{CheckinError, CheckinRecord};
use crate::clock::Clock;
use crate::credential::{SerializedCredential, VerifiedCredential};
use crate::metrics::{CHECKINS, OFFLINE_CHECKINS, PIPELINE_LOADS, PIPELINE_LOAD_DURATION};
use crate::offline::OfflineCheckin;
use crate::semaphore::{
    MemberCandidate, SemaphoreGroup, SemaphoreGroupInfo, SemaphoreGroupProvider,
};

pub const PAUSED_MESSAGE: &str = "this pipeline is paused - not loading";

#[derive(Debug, Clone)]
struct PendingCheckin {
    checker: String,
    timestamp: DateTime<Utc>,
}

/// Per-run diagnostic log returned in the load summary.
struct RunLog {
    clock: Arc<dyn Clock>,
    entries: Vec<PipelineLog>,
}

impl RunLog {
    fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Vec::new(),
        }
    }

    fn push(&mut self, level: LogLevel, message: impl Into<String>) {
        self.entries.push(PipelineLog {
            level,
            timestamp: self.clock.now(),
            message: message.into(),
        });
    }

    fn info(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Info, message);
    }

    fn warn(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Warn, message);
    }

    fn error(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Error, message);
    }
}

#[derive(Debug, Default)]
struct LoadCounts {
    atoms_loaded: usize,
    offline_checked_in: usize,
    offline_failed: usize,
    groups_updated: usize,
}

enum Reconciled {
    CheckedIn,
    AlreadyCheckedIn { checker: Option<String> },
}

/// One pipeline: imports tickets from its backend, serves the feed and
/// performs check-ins. Loads on one instance never overlap.
pub struct TicketPipeline {
    definition: PipelineDefinition,
    backend: Arc<dyn TicketBackend>,
    deps: PipelineDeps,
    semaphore: SemaphoreGroupProvider,
    tickets: RwLock<Vec<PipelineTicket>>,
    pending: Mutex<HashMap<String, PendingCheckin>>,
    load_lock: Mutex<()>,
    semaphore_lock: Mutex<()>,
    last_load: RwLock<Option<LoadSummary>>,
    stopped: AtomicBool,
}

impl TicketPipeline {
    pub fn new(definition: PipelineDefinition, deps: PipelineDeps) -> Result<Self, PipelineError> {
        definition
            .options
            .validate()
            .map_err(|e| PipelineError::InvalidDefinition(e.to_string()))?;
        let backend = deps.backends.create(&definition)?;
        let semaphore = SemaphoreGroupProvider::new(
            definition.id.clone(),
            definition.options.semaphore_groups.clone(),
            Arc::clone(&deps.consumers),
            Arc::clone(&deps.semaphore_history),
        );

        Ok(Self {
            definition,
            backend,
            deps,
            semaphore,
            tickets: RwLock::new(Vec::new()),
            pending: Mutex::new(HashMap::new()),
            load_lock: Mutex::new(()),
            semaphore_lock: Mutex::new(()),
            last_load: RwLock::new(None),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        &self.definition.id
    }

    pub fn kind(&self) -> PipelineKind {
        self.definition.kind
    }

    pub fn definition(&self) -> &PipelineDefinition {
        &self.definition
    }

    /// Prepare the instance before its first load.
    pub fn start(&self) -> Result<(), PipelineError> {
        let removed = self.semaphore.start()?;
        info!(
            pipeline_id = %self.id(),
            kind = %self.kind(),
            removed_history = removed,
            "pipeline instance started"
        );
        Ok(())
    }

    /// Stop serving. An in-flight load finishes but its results are discarded.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            info!(pipeline_id = %self.id(), "pipeline instance stopped");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Run one load, waiting for an in-flight load to finish first.
    pub async fn load(&self) -> LoadSummary {
        let _guard = self.load_lock.lock().await;
        self.run_load().await
    }

    /// Run one load unless another is in flight, in which case nothing is
    /// done and `None` is returned.
    pub async fn try_load(&self) -> Option<LoadSummary> {
        let Ok(_guard) = self.load_lock.try_lock() else {
            debug!(pipeline_id = %self.id(), "load already in flight, skipping");
            PIPELINE_LOADS.with_label_values(&["skipped"]).inc();
            return None;
        };
        Some(self.run_load().await)
    }

    pub async fn last_load(&self) -> Option<LoadSummary> {
        self.last_load.read().await.clone()
    }

    pub async fn tickets(&self) -> Vec<PipelineTicket> {
        self.tickets.read().await.clone()
    }

    async fn run_load(&self) -> LoadSummary {
        let timer = PIPELINE_LOAD_DURATION.start_timer();
        let started_at = self.deps.clock.now();
        let mut log = RunLog::new(Arc::clone(&self.deps.clock));

        info!(pipeline_id = %self.id(), "load started");
        let outcome = self.import_and_reconcile(started_at, &mut log).await;
        timer.observe_duration();

        let (success, counts, error_message) = match outcome {
            Ok(counts) => (true, counts, None),
            Err(e) => (false, LoadCounts::default(), Some(e.to_string())),
        };

        let summary = LoadSummary {
            started_at,
            finished_at: self.deps.clock.now(),
            success,
            atoms_loaded: counts.atoms_loaded,
            offline_tickets_checked_in: counts.offline_checked_in,
            offline_tickets_failed_to_check_in: counts.offline_failed,
            semaphore_groups_updated: counts.groups_updated,
            error_message,
            log: log.entries,
        };

        if summary.success {
            PIPELINE_LOADS.with_label_values(&["success"]).inc();
            info!(
                pipeline_id = %self.id(),
                atoms = summary.atoms_loaded,
                offline_checked_in = summary.offline_tickets_checked_in,
                offline_failed = summary.offline_tickets_failed_to_check_in,
                "load finished"
            );
        } else {
            PIPELINE_LOADS.with_label_values(&["failure"]).inc();
            warn!(
                pipeline_id = %self.id(),
                error = summary.error_message.as_deref().unwrap_or_default(),
                "load failed"
            );
        }

        if !self.is_stopped() {
            *self.last_load.write().await = Some(summary.clone());
        }
        summary
    }

    async fn import_and_reconcile(
        &self,
        started_at: DateTime<Utc>,
        log: &mut RunLog,
    ) -> Result<LoadCounts, PipelineError> {
        if self.is_stopped() {
            return Err(PipelineError::Stopped);
        }
        if self.definition.options.paused {
            log.info(PAUSED_MESSAGE);
            return Ok(LoadCounts::default());
        }

        log.info(format!("fetching tickets from {} backend", self.kind()));
        let fetched = match self.backend.fetch_tickets().await {
            Ok(fetched) => fetched,
            Err(e) => {
                log.error(format!("failed to load tickets: {}", e));
                error!(pipeline_id = %self.id(), error = %e, "backend fetch failed");
                return Err(e.into());
            }
        };

        if self.is_stopped() {
            log.warn("pipeline stopped during load, discarding results");
            return Err(PipelineError::Stopped);
        }

        let tickets = self.build_tickets(fetched, started_at, log)?;
        let atoms_loaded = tickets.len();
        self.release_observed_reservations(&tickets).await;
        *self.tickets.write().await = tickets;
        log.info(format!("loaded {} tickets", atoms_loaded));

        let (offline_checked_in, offline_failed) = self.reconcile_offline(log).await?;
        let groups_updated = self.recompute_semaphore_groups().await?;
        if groups_updated > 0 {
            log.info(format!("{} semaphore groups changed", groups_updated));
        }

        Ok(LoadCounts {
            atoms_loaded,
            offline_checked_in,
            offline_failed,
            groups_updated,
        })
    }

    fn build_tickets(
        &self,
        fetched: Vec<BackendTicket>,
        observed_at: DateTime<Utc>,
        log: &mut RunLog,
    ) -> Result<Vec<PipelineTicket>, PipelineError> {
        let options = &self.definition.options;
        let ledger: HashMap<String, CheckinRecord> = self
            .deps
            .checkins
            .list_for_pipeline(self.id())?
            .into_iter()
            .map(|record| (record.ticket_id.clone(), record))
            .collect();
        let remote = self.kind().checks_in_remotely();
        let manual_ids = options.manual_ticket_ids();

        let mut seen = HashSet::new();
        let mut skipped = 0usize;
        let mut tickets = Vec::with_capacity(fetched.len() + options.manual_tickets.len());

        for t in fetched {
            if manual_ids.contains(&t.id) || !seen.insert(t.id.clone()) {
                log.warn(format!("ignoring duplicate ticket ID {}", t.id));
                continue;
            }
            if options.product(&t.event_id, &t.product_id).is_none() {
                skipped += 1;
                continue;
            }
            let checkin_timestamp = t
                .checkin_timestamp
                .or_else(|| t.is_consumed.then_some(observed_at));
            let mut ticket = PipelineTicket {
                id: t.id,
                event_id: t.event_id,
                product_id: t.product_id,
                attendee_email: t.attendee_email.to_lowercase(),
                attendee_name: t.attendee_name,
                is_consumed: t.is_consumed,
                checker: t.checker,
                checkin_timestamp,
                is_manual: false,
                ledger_backed: !remote,
            };
            if ticket.ledger_backed {
                let record = ledger.get(&ticket.id);
                apply_ledger(&mut ticket, record);
            }
            tickets.push(ticket);
        }

        if skipped > 0 {
            log.warn(format!(
                "skipped {} tickets for unconfigured events or products",
                skipped
            ));
        }

        for manual in &options.manual_tickets {
            let mut ticket = PipelineTicket {
                id: manual.id.clone(),
                event_id: manual.event_id.clone(),
                product_id: manual.product_id.clone(),
                attendee_email: manual.attendee_email.to_lowercase(),
                attendee_name: manual.attendee_name.clone(),
                is_consumed: false,
                checker: None,
                checkin_timestamp: None,
                is_manual: true,
                ledger_backed: true,
            };
            let record = ledger.get(&manual.id);
            apply_ledger(&mut ticket, record);
            tickets.push(ticket);
        }

        Ok(tickets)
    }

    async fn reconcile_offline(&self, log: &mut RunLog) -> Result<(usize, usize), PipelineError> {
        let queued = self.deps.offline.list_for_pipeline(self.id())?;
        if queued.is_empty() {
            return Ok((0, 0));
        }
        log.info(format!("processing {} offline check-ins", queued.len()));

        let mut checked_in = 0;
        let mut failed = 0;
        for entry in queued {
            match self.reconcile_one(&entry).await {
                Ok(Reconciled::CheckedIn) => {
                    self.deps.offline.remove(self.id(), &entry.ticket_id)?;
                    OFFLINE_CHECKINS.with_label_values(&["checked_in"]).inc();
                    checked_in += 1;
                }
                Ok(Reconciled::AlreadyCheckedIn { checker }) => {
                    self.deps.offline.remove(self.id(), &entry.ticket_id)?;
                    OFFLINE_CHECKINS.with_label_values(&["already_checked_in"]).inc();
                    let message = format!(
                        "offline check-in for ticket ID {} by {} dropped: already checked in by {}",
                        entry.ticket_id,
                        entry.checker_email,
                        checker.as_deref().unwrap_or("the ticketing backend")
                    );
                    warn!(pipeline_id = %self.id(), "{}", message);
                    log.warn(message);
                }
                Err(reason) => {
                    self.deps.offline.record_failure(
                        self.id(),
                        &entry.ticket_id,
                        &reason,
                        self.deps.clock.now(),
                    )?;
                    OFFLINE_CHECKINS.with_label_values(&["failed"]).inc();
                    warn!(pipeline_id = %self.id(), ticket_id = %entry.ticket_id, "{}", reason);
                    log.warn(reason);
                    failed += 1;
                }
            }
        }

        Ok((checked_in, failed))
    }

    async fn reconcile_one(&self, entry: &OfflineCheckin) -> Result<Reconciled, String> {
        let Some(ticket) = self.ticket_by_id(&entry.ticket_id).await else {
            return Err(format!(
                "User {} uploaded offline check-in for ticket ID {} but this ticket does not exist.",
                entry.checker_email, entry.ticket_id
            ));
        };
        if !self.is_superuser_for(&entry.checker_email, &ticket.event_id).await {
            return Err(format!(
                "User {} uploaded offline check-in for ticket ID {} but is not authorized to check in tickets for this event.",
                entry.checker_email, entry.ticket_id
            ));
        }

        match self
            .apply_checkin(&ticket, &entry.checker_email, entry.checkin_timestamp)
            .await
        {
            Ok(()) => Ok(Reconciled::CheckedIn),
            Err(CheckinFailure::AlreadyCheckedIn { checker, .. }) => {
                Ok(Reconciled::AlreadyCheckedIn { checker })
            }
            Err(CheckinFailure::ServerError { message }) => Err(format!(
                "offline check-in for ticket ID {} failed: {}",
                entry.ticket_id, message
            )),
            Err(other) => Err(format!(
                "offline check-in for ticket ID {} failed: {}",
                entry.ticket_id,
                other.name()
            )),
        }
    }

    /// Perform the check-in transition for an authorized checker.
    async fn apply_checkin(
        &self,
        ticket: &PipelineTicket,
        checker: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), CheckinFailure> {
        if ticket.ledger_backed {
            return match self
                .deps
                .checkins
                .check_in(self.id(), &ticket.id, timestamp, checker)
            {
                Ok(record) => {
                    self.mark_consumed(&ticket.id, &record.checker_email, record.checkin_timestamp)
                        .await;
                    Ok(())
                }
                Err(CheckinError::AlreadyCheckedIn { existing }) => {
                    Err(CheckinFailure::AlreadyCheckedIn {
                        checkin_timestamp: existing.checkin_timestamp,
                        checker: Some(existing.checker_email),
                    })
                }
                Err(e) => Err(CheckinFailure::ServerError {
                    message: e.to_string(),
                }),
            };
        }

        if ticket.is_consumed {
            return Err(CheckinFailure::AlreadyCheckedIn {
                checkin_timestamp: ticket.checkin_timestamp.unwrap_or(timestamp),
                checker: ticket.checker.clone(),
            });
        }

        {
            let mut pending = self.pending.lock().await;
            if let Some(existing) = pending.get(&ticket.id) {
                return Err(CheckinFailure::AlreadyCheckedIn {
                    checkin_timestamp: existing.timestamp,
                    checker: Some(existing.checker.clone()),
                });
            }
            pending.insert(
                ticket.id.clone(),
                PendingCheckin {
                    checker: checker.to_string(),
                    timestamp,
                },
            );
        }

        match self.backend.push_checkin(&ticket.id, checker, timestamp).await {
            Ok(()) => {
                self.mark_consumed(&ticket.id, checker, timestamp).await;
                Ok(())
            }
            Err(e) => {
                self.pending.lock().await.remove(&ticket.id);
                error!(pipeline_id = %self.id(), ticket_id = %ticket.id, error = %e, "backend check-in failed");
                Err(CheckinFailure::ServerError {
                    message: e.to_string(),
                })
            }
        }
    }

    pub async fn check_in(&self, request: &CheckinRequest) -> CheckinResult {
        let result = self.check_in_inner(request).await;
        CHECKINS.with_label_values(&[result.outcome()]).inc();
        result
    }

    async fn check_in_inner(&self, request: &CheckinRequest) -> CheckinResult {
        if self.is_stopped() {
            return CheckinResult::failed(CheckinFailure::ServerError {
                message: PipelineError::Stopped.to_string(),
            });
        }

        let email = match self.verify_email(&request.credential).await {
            Ok((_, email)) => email,
            Err(e) => {
                return CheckinResult::failed(CheckinFailure::InvalidSignature {
                    reason: e.to_string(),
                })
            }
        };

        let Some(ticket) = self
            .ticket_in_event(&request.ticket_id, &request.event_id)
            .await
        else {
            return CheckinResult::failed(CheckinFailure::InvalidTicket {
                reason: format!(
                    "ticket {} not found in event {}",
                    request.ticket_id, request.event_id
                ),
            });
        };

        if !self.is_superuser_for(&email, &ticket.event_id).await {
            return CheckinResult::failed(CheckinFailure::NotSuperuser);
        }

        match self.apply_checkin(&ticket, &email, self.deps.clock.now()).await {
            Ok(()) => {
                info!(pipeline_id = %self.id(), ticket_id = %ticket.id, checker = %email, "ticket checked in");
                CheckinResult::ok()
            }
            Err(failure) => CheckinResult::failed(failure),
        }
    }

    pub async fn poll_feed(
        &self,
        request: &PollFeedRequest,
    ) -> Result<PollFeedResponse, PipelineError> {
        let feed = &self.definition.options.feed;
        if request.feed_id != feed.feed_id {
            return Err(PipelineError::UnknownFeed(request.feed_id.clone()));
        }
        if self.is_stopped() {
            return Err(PipelineError::Stopped);
        }
        let credential = request
            .credential
            .as_ref()
            .ok_or(PipelineError::CredentialRequired)?;
        let (verified, email) = self.verify_email(credential).await?;

        let update = self
            .deps
            .consumers
            .get_or_create(self.id(), &email, &verified.holder)?;
        if update.affects_membership() {
            if let Err(e) = self.recompute_semaphore_groups().await {
                warn!(pipeline_id = %self.id(), error = %e, "semaphore recompute after registration failed");
            }
        }

        let held: Vec<PipelineTicket> = self
            .tickets
            .read()
            .await
            .iter()
            .filter(|t| t.attendee_email == email)
            .cloned()
            .collect();

        let mut artifacts = Vec::with_capacity(held.len());
        for ticket in &held {
            artifacts.push(
                self.deps
                    .issuer
                    .issue(&self.ticket_data(ticket, &verified.holder))?,
            );
        }

        debug!(pipeline_id = %self.id(), tickets = artifacts.len(), "feed issued");
        Ok(PollFeedResponse {
            actions: vec![
                FeedAction::DeleteFolder {
                    folder: feed.folder.clone(),
                    recursive: true,
                },
                FeedAction::ReplaceInFolder {
                    folder: feed.folder.clone(),
                    artifacts,
                },
            ],
        })
    }

    /// Queue offline check-ins for events of this pipeline. Authorization is
    /// checked when the queue is reconciled. Returns the number queued.
    pub async fn upload_offline_checkins(
        &self,
        request: &OfflineUploadRequest,
    ) -> Result<usize, PipelineError> {
        let (_, email) = self.verify_email(&request.credential).await?;
        let now = self.deps.clock.now();

        let mut queued = 0;
        for (event_id, ticket_ids) in &request.ticket_ids_by_event {
            if self.definition.options.event(event_id).is_none() {
                continue;
            }
            for ticket_id in ticket_ids {
                if self.deps.offline.enqueue(self.id(), ticket_id, &email, now)? {
                    queued += 1;
                }
            }
        }

        if queued > 0 {
            info!(pipeline_id = %self.id(), checker = %email, queued, "offline check-ins queued");
        }
        Ok(queued)
    }

    /// Tickets the caller may check in offline.
    pub async fn offline_tickets(
        &self,
        credential: &SerializedCredential,
    ) -> Result<Vec<OfflineTicket>, PipelineError> {
        let (_, email) = self.verify_email(credential).await?;
        let tickets = self.tickets.read().await;
        let events = superuser_events(&self.definition, &tickets, &email);
        Ok(tickets
            .iter()
            .filter(|t| events.contains(t.event_id.as_str()))
            .map(OfflineTicket::from)
            .collect())
    }

    pub fn feed_info(&self) -> FeedInfo {
        let feed = &self.definition.options.feed;
        FeedInfo {
            feed_id: feed.feed_id.clone(),
            folder: feed.folder.clone(),
            name: feed.name.clone(),
            description: feed.description.clone(),
            permissions: ["DeleteFolder", "ReplaceInFolder"]
                .into_iter()
                .map(|action_type| FeedPermission {
                    folder: feed.folder.clone(),
                    action_type: action_type.to_string(),
                })
                .collect(),
        }
    }

    pub async fn info(&self) -> Result<PipelineInfo, PipelineError> {
        let tickets = self.tickets.read().await;
        Ok(PipelineInfo {
            id: self.id().to_string(),
            name: self.definition.name().to_string(),
            kind: self.kind(),
            paused: self.definition.options.paused,
            feed: self.feed_info(),
            ticket_count: tickets.len(),
            checked_in_count: tickets.iter().filter(|t| t.is_consumed).count(),
            last_load: self.last_load.read().await.clone(),
            queued_offline_checkins: self.deps.offline.list_for_pipeline(self.id())?,
            semaphore_groups: self.semaphore.supported_groups(),
        })
    }

    pub fn semaphore_groups(&self) -> Vec<SemaphoreGroupInfo> {
        self.semaphore.supported_groups()
    }

    pub fn semaphore_group(&self, group_id: &str) -> Result<Option<SemaphoreGroup>, PipelineError> {
        Ok(self.semaphore.latest_group(group_id)?)
    }

    pub fn semaphore_group_by_root(
        &self,
        group_id: &str,
        root: &str,
    ) -> Result<Option<SemaphoreGroup>, PipelineError> {
        Ok(self.semaphore.group_by_root(group_id, root)?)
    }

    pub fn semaphore_latest_root(&self, group_id: &str) -> Result<Option<String>, PipelineError> {
        Ok(self.semaphore.latest_root(group_id)?)
    }

    /// Whether this pipeline serves the given event.
    pub fn has_event(&self, event_id: &str) -> bool {
        self.definition.options.event(event_id).is_some()
    }

    pub fn serves_feed(&self, feed_id: &str) -> bool {
        self.definition.options.feed.feed_id == feed_id
    }

    async fn recompute_semaphore_groups(&self) -> Result<usize, PipelineError> {
        let _guard = self.semaphore_lock.lock().await;
        let candidates: Vec<MemberCandidate> = self
            .tickets
            .read()
            .await
            .iter()
            .map(|t| MemberCandidate {
                email: t.attendee_email.clone(),
                event_id: t.event_id.clone(),
                product_id: t.product_id.clone(),
            })
            .collect();
        let updates = self.semaphore.update(&candidates)?;
        Ok(updates.iter().filter(|u| u.changed).count())
    }

    async fn verify_email(
        &self,
        credential: &SerializedCredential,
    ) -> Result<(VerifiedCredential, String), PipelineError> {
        let verified = self.deps.verifier.verify_and_require_email(credential).await?;
        let email = verified.email.clone().unwrap_or_default();
        Ok((verified, email))
    }

    async fn ticket_by_id(&self, ticket_id: &str) -> Option<PipelineTicket> {
        self.tickets
            .read()
            .await
            .iter()
            .find(|t| t.id == ticket_id)
            .cloned()
    }

    async fn ticket_in_event(&self, ticket_id: &str, event_id: &str) -> Option<PipelineTicket> {
        self.ticket_by_id(ticket_id)
            .await
            .filter(|t| t.event_id == event_id)
    }

    async fn is_superuser_for(&self, email: &str, event_id: &str) -> bool {
        let tickets = self.tickets.read().await;
        superuser_events(&self.definition, &tickets, email).contains(event_id)
    }

    /// Drop reservations the backend data now reflects. A reservation for a
    /// ticket still reported unconsumed is kept: its push may not have landed
    /// before the fetch.
    async fn release_observed_reservations(&self, tickets: &[PipelineTicket]) {
        let unconsumed: HashSet<&str> = tickets
            .iter()
            .filter(|t| !t.ledger_backed && !t.is_consumed)
            .map(|t| t.id.as_str())
            .collect();
        self.pending
            .lock()
            .await
            .retain(|id, _| unconsumed.contains(id.as_str()));
    }

    async fn mark_consumed(&self, ticket_id: &str, checker: &str, timestamp: DateTime<Utc>) {
        if let Some(ticket) = self
            .tickets
            .write()
            .await
            .iter_mut()
            .find(|t| t.id == ticket_id)
        {
            ticket.mark_consumed(checker, timestamp);
        }
    }

    fn ticket_data(&self, ticket: &PipelineTicket, holder: &str) -> TicketData {
        let options = &self.definition.options;
        let event_name = options
            .event(&ticket.event_id)
            .map(|e| e.name.clone())
            .unwrap_or_else(|| ticket.event_id.clone());
        let product_name = options
            .product(&ticket.event_id, &ticket.product_id)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| ticket.product_id.clone());

        TicketData {
            ticket_id: ticket.id.clone(),
            event_id: ticket.event_id.clone(),
            event_name,
            product_id: ticket.product_id.clone(),
            product_name,
            attendee_name: ticket.attendee_name.clone(),
            attendee_email: ticket.attendee_email.clone(),
            holder: holder.to_string(),
            is_consumed: ticket.is_consumed,
            pipeline_id: self.id().to_string(),
        }
    }
}

fn apply_ledger(ticket: &mut PipelineTicket, record: Option<&CheckinRecord>) {
    if let Some(record) = record {
        ticket.mark_consumed(&record.checker_email, record.checkin_timestamp);
    }
}

/// Events in which `email` holds a superuser ticket.
fn superuser_events<'a>(
    definition: &PipelineDefinition,
    tickets: &'a [PipelineTicket],
    email: &str,
) -> BTreeSet<&'a str> {
    let email = email.to_lowercase();
    tickets
        .iter()
        .filter(|t| t.attendee_email == email)
        .filter(|t| {
            definition
                .options
                .is_superuser_product(&t.event_id, &t.product_id)
        })
        .map(|t| t.event_id.as_str())
        .collect()
}
