//! Mock ticketing backend for testing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::pipeline::{BackendError, BackendFactory, BackendTicket, TicketBackend};

/// A check-in pushed to the mock backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCheckin {
    pub ticket_id: String,
    pub checker_email: String,
    pub timestamp: DateTime<Utc>,
}

/// Mock implementation of the TicketBackend trait.
///
/// Provides controllable behavior for testing:
/// - Serve a configurable ticket list
/// - Simulate fetch and push failures
/// - Simulate slow fetches and pushes
/// - Record pushed check-ins, marking the ticket consumed like a real backend
///
/// Clones share state, so a test can keep a handle while the pipeline owns
/// another through [`MockTicketBackend::factory`].
#[derive(Debug, Clone, Default)]
pub struct MockTicketBackend {
    tickets: Arc<RwLock<Vec<BackendTicket>>>,
    fetch_error: Arc<RwLock<Option<BackendError>>>,
    push_error: Arc<RwLock<Option<BackendError>>>,
    fetch_delay_ms: Arc<RwLock<u64>>,
    push_delay_ms: Arc<RwLock<u64>>,
    pushed: Arc<RwLock<Vec<RecordedCheckin>>>,
    fetch_count: Arc<AtomicUsize>,
}

impl MockTicketBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tickets(tickets: Vec<BackendTicket>) -> Self {
        Self {
            tickets: Arc::new(RwLock::new(tickets)),
            ..Self::default()
        }
    }

    /// Factory handing out this backend for every definition.
    pub fn factory(&self) -> BackendFactory {
        let backend = self.clone();
        Arc::new(move |_| Ok(Arc::new(backend.clone()) as Arc<dyn TicketBackend>))
    }

    pub async fn set_tickets(&self, tickets: Vec<BackendTicket>) {
        *self.tickets.write().await = tickets;
    }

    /// Make every fetch fail until cleared with `None`.
    pub async fn set_fetch_error(&self, error: Option<BackendError>) {
        *self.fetch_error.write().await = error;
    }

    /// Make every push fail until cleared with `None`.
    pub async fn set_push_error(&self, error: Option<BackendError>) {
        *self.push_error.write().await = error;
    }

    pub async fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay_ms.write().await = delay.as_millis() as u64;
    }

    /// Delay every push before the backend records it.
    pub async fn set_push_delay(&self, delay: Duration) {
        *self.push_delay_ms.write().await = delay.as_millis() as u64;
    }

    pub async fn pushed_checkins(&self) -> Vec<RecordedCheckin> {
        self.pushed.read().await.clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TicketBackend for MockTicketBackend {
    async fn fetch_tickets(&self) -> Result<Vec<BackendTicket>, BackendError> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);

        let delay_ms = *self.fetch_delay_ms.read().await;
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        if let Some(err) = self.fetch_error.read().await.clone() {
            return Err(err);
        }
        Ok(self.tickets.read().await.clone())
    }

    async fn push_checkin(
        &self,
        ticket_id: &str,
        checker_email: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), BackendError> {
        let delay_ms = *self.push_delay_ms.read().await;
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        if let Some(err) = self.push_error.read().await.clone() {
            return Err(err);
        }

        let mut tickets = self.tickets.write().await;
        let Some(ticket) = tickets.iter_mut().find(|t| t.id == ticket_id) else {
            return Err(BackendError::Rejected(format!("unknown ticket {}", ticket_id)));
        };
        if ticket.is_consumed {
            return Err(BackendError::Rejected(format!(
                "ticket {} already consumed",
                ticket_id
            )));
        }
        ticket.is_consumed = true;
        ticket.checker = Some(checker_email.to_string());
        ticket.checkin_timestamp = Some(timestamp);

        self.pushed.write().await.push(RecordedCheckin {
            ticket_id: ticket_id.to_string(),
            checker_email: checker_email.to_string(),
            timestamp,
        });
        Ok(())
    }
}
