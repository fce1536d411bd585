//! Ticketing backend adapters.
//!
//! Backends speak their provider's wire protocol and hand the pipeline a flat
//! list of tickets. Adapters are looked up by [`PipelineKind`] in a
//! [`BackendRegistry`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::definition::{PipelineDefinition, PipelineKind};

/// A ticket as reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendTicket {
    pub id: String,
    pub event_id: String,
    pub product_id: String,
    pub attendee_email: String,
    pub attendee_name: String,
    #[serde(default)]
    pub is_consumed: bool,
    #[serde(default)]
    pub checker: Option<String>,
    #[serde(default)]
    pub checkin_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("backend rejected the request: {0}")]
    Rejected(String),

    #[error("operation not supported: {0}")]
    Unsupported(String),
}

#[async_trait]
pub trait TicketBackend: Send + Sync {
    /// Fetch every ticket the pipeline should serve.
    async fn fetch_tickets(&self) -> Result<Vec<BackendTicket>, BackendError>;

    /// Record a check-in on the backend of record.
    async fn push_checkin(
        &self,
        ticket_id: &str,
        checker_email: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), BackendError>;
}

pub type BackendFactory =
    Arc<dyn Fn(&PipelineDefinition) -> Result<Arc<dyn TicketBackend>, BackendError> + Send + Sync>;

/// Maps pipeline kinds to backend constructors.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    factories: HashMap<PipelineKind, BackendFactory>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the adapters that ship with the crate.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(
            PipelineKind::CsvTicket,
            Arc::new(|definition: &PipelineDefinition| {
                let backend = StaticTicketBackend::from_source(&definition.options.source)?;
                Ok(Arc::new(backend) as Arc<dyn TicketBackend>)
            }),
        );
        registry
    }

    pub fn register(&mut self, kind: PipelineKind, factory: BackendFactory) {
        self.factories.insert(kind, factory);
    }

    pub fn create(
        &self,
        definition: &PipelineDefinition,
    ) -> Result<Arc<dyn TicketBackend>, BackendError> {
        let factory = self.factories.get(&definition.kind).ok_or_else(|| {
            BackendError::Unsupported(format!(
                "no backend registered for {} pipelines",
                definition.kind
            ))
        })?;
        factory(definition)
    }
}

#[derive(Debug, Deserialize)]
struct StaticSource {
    #[serde(default)]
    tickets: Vec<BackendTicket>,
}

/// Serves a fixed ticket list from the definition's `source.tickets`.
/// Check-ins go through the check-in ledger, never through this backend.
#[derive(Debug, Clone)]
pub struct StaticTicketBackend {
    tickets: Vec<BackendTicket>,
}

impl StaticTicketBackend {
    pub fn new(tickets: Vec<BackendTicket>) -> Self {
        Self { tickets }
    }

    pub fn from_source(source: &serde_json::Value) -> Result<Self, BackendError> {
        if source.is_null() {
            return Ok(Self::new(Vec::new()));
        }
        let parsed: StaticSource = serde_json::from_value(source.clone())
            .map_err(|e| BackendError::UnexpectedResponse(format!("invalid ticket source: {}", e)))?;
        Ok(Self::new(parsed.tickets))
    }
}

#[async_trait]
impl TicketBackend for StaticTicketBackend {
    async fn fetch_tickets(&self) -> Result<Vec<BackendTicket>, BackendError> {
        Ok(self.tickets.clone())
    }

    async fn push_checkin(
        &self,
        ticket_id: &str,
        _checker_email: &str,
        _timestamp: DateTime<Utc>,
    ) -> Result<(), BackendError> {
        Err(BackendError::Unsupported(format!(
            "static tickets are checked in locally ({})",
            ticket_id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    #[tokio::test]
    async fn test_static_backend_reads_source() {
        let def = fixtures::definition("p", "owner");
        let backend = BackendRegistry::with_builtin().create(&def).unwrap();
        let tickets = backend.fetch_tickets().await.unwrap();
        assert_eq!(tickets.len(), 2);
        assert_eq!(tickets[0].id, "p-t1");
    }

    #[test]
    fn test_malformed_source_is_rejected() {
        let source = serde_json::json!({ "tickets": [{ "id": 5 }] });
        assert!(matches!(
            StaticTicketBackend::from_source(&source),
            Err(BackendError::UnexpectedResponse(_))
        ));
    }

    #[test]
    fn test_unregistered_kind_fails() {
        for kind in [PipelineKind::Pretix, PipelineKind::Csv, PipelineKind::Pod] {
            let mut def = fixtures::definition("p", "owner");
            def.kind = kind;
            let err = BackendRegistry::with_builtin().create(&def).err().unwrap();
            assert!(matches!(err, BackendError::Unsupported(_)));
        }
    }
}
