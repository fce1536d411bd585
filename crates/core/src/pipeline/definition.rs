//! Pipeline definitions and their write-time validation.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::semaphore::SemaphoreGroupConfig;

/// Closed set of pipeline kinds. Persisted with the definition and used to
/// pick the backend adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    Lemonade,
    Pretix,
    CsvTicket,
    Csv,
    Pod,
}

impl PipelineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineKind::Lemonade => "lemonade",
            PipelineKind::Pretix => "pretix",
            PipelineKind::CsvTicket => "csv_ticket",
            PipelineKind::Csv => "csv",
            PipelineKind::Pod => "pod",
        }
    }

    /// Whether check-ins are recorded remotely through the backend.
    /// Other kinds record them in the check-in ledger.
    pub fn checks_in_remotely(&self) -> bool {
        matches!(self, PipelineKind::Lemonade | PipelineKind::Pretix)
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineKind {
    type Err = DefinitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lemonade" => Ok(PipelineKind::Lemonade),
            "pretix" => Ok(PipelineKind::Pretix),
            "csv_ticket" => Ok(PipelineKind::CsvTicket),
            "csv" => Ok(PipelineKind::Csv),
            "pod" => Ok(PipelineKind::Pod),
            other => Err(DefinitionError::Invalid(format!(
                "unknown pipeline kind: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductConfig {
    pub id: String,
    pub name: String,
    /// Holders of this product may check in tickets of the event.
    #[serde(default)]
    pub is_superuser: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub products: Vec<ProductConfig>,
}

/// A ticket that exists only in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualTicket {
    pub id: String,
    pub event_id: String,
    pub product_id: String,
    pub attendee_email: String,
    pub attendee_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedOptions {
    pub feed_id: String,
    pub folder: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOptions {
    pub name: String,
    #[serde(default)]
    pub paused: bool,
    pub feed: FeedOptions,
    #[serde(default)]
    pub events: Vec<EventConfig>,
    #[serde(default)]
    pub manual_tickets: Vec<ManualTicket>,
    #[serde(default)]
    pub semaphore_groups: Vec<SemaphoreGroupConfig>,
    /// Backend-specific settings, opaque to the scheduler.
    #[serde(default)]
    pub source: serde_json::Value,
}

impl PipelineOptions {
    /// Identifiers that no other pipeline may use.
    pub fn reserved_ids(&self) -> Vec<&str> {
        let mut ids = vec![self.feed.feed_id.as_str()];
        for event in &self.events {
            ids.push(event.id.as_str());
            ids.extend(event.products.iter().map(|p| p.id.as_str()));
        }
        ids.extend(self.semaphore_groups.iter().map(|g| g.group_id.as_str()));
        ids
    }

    pub fn event(&self, event_id: &str) -> Option<&EventConfig> {
        self.events.iter().find(|e| e.id == event_id)
    }

    pub fn product(&self, event_id: &str, product_id: &str) -> Option<&ProductConfig> {
        self.event(event_id)
            .and_then(|e| e.products.iter().find(|p| p.id == product_id))
    }

    pub fn is_superuser_product(&self, event_id: &str, product_id: &str) -> bool {
        self.product(event_id, product_id)
            .is_some_and(|p| p.is_superuser)
    }

    pub fn manual_ticket_ids(&self) -> BTreeSet<String> {
        self.manual_tickets.iter().map(|t| t.id.clone()).collect()
    }

    /// Checks that only involve this definition.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if self.name.trim().is_empty() {
            return Err(DefinitionError::Invalid("pipeline name is required".into()));
        }
        if self.feed.folder.trim().is_empty() {
            return Err(DefinitionError::Invalid("feed folder is required".into()));
        }

        let mut seen = HashSet::new();
        let ids = self
            .reserved_ids()
            .into_iter()
            .chain(self.manual_tickets.iter().map(|t| t.id.as_str()));
        for id in ids {
            if id.trim().is_empty() {
                return Err(DefinitionError::Invalid("identifiers must not be empty".into()));
            }
            if !seen.insert(id) {
                return Err(DefinitionError::DuplicateId(id.to_string()));
            }
        }

        for ticket in &self.manual_tickets {
            if self.event(&ticket.event_id).is_none() {
                return Err(DefinitionError::Invalid(format!(
                    "manual ticket {} references unknown event {}",
                    ticket.id, ticket.event_id
                )));
            }
            if self.product(&ticket.event_id, &ticket.product_id).is_none() {
                return Err(DefinitionError::Invalid(format!(
                    "manual ticket {} references unknown product {}",
                    ticket.id, ticket.product_id
                )));
            }
        }

        for group in &self.semaphore_groups {
            for criterion in &group.member_criteria {
                if self.event(&criterion.event_id).is_none() {
                    return Err(DefinitionError::Invalid(format!(
                        "semaphore group {} references unknown event {}",
                        group.group_id, criterion.event_id
                    )));
                }
            }
        }

        Ok(())
    }
}

/// A stored pipeline definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub id: String,
    pub owner_user_id: String,
    #[serde(default)]
    pub editor_user_ids: BTreeSet<String>,
    pub kind: PipelineKind,
    pub options: PipelineOptions,
    pub time_created: DateTime<Utc>,
    pub time_updated: DateTime<Utc>,
}

impl PipelineDefinition {
    pub fn name(&self) -> &str {
        &self.options.name
    }

    pub fn can_access(&self, user_id: &str) -> bool {
        self.owner_user_id == user_id || self.editor_user_ids.contains(user_id)
    }

    /// Reject identifiers already reserved by any of `others`.
    pub fn check_ids_available<'a>(
        &self,
        others: impl IntoIterator<Item = &'a PipelineDefinition>,
    ) -> Result<(), DefinitionError> {
        let ours: HashSet<&str> = self.options.reserved_ids().into_iter().collect();
        for other in others {
            if other.id == self.id {
                continue;
            }
            if let Some(id) = other
                .options
                .reserved_ids()
                .into_iter()
                .find(|id| ours.contains(id))
            {
                return Err(DefinitionError::IdInUse {
                    id: id.to_string(),
                    pipeline_name: other.name().to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Definition as submitted by an operator. Missing ids are generated, a
/// missing owner defaults to the submitter, and `time_updated` must match
/// the stored value when updating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefinitionDraft {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub owner_user_id: Option<String>,
    #[serde(default)]
    pub editor_user_ids: BTreeSet<String>,
    pub kind: PipelineKind,
    pub options: PipelineOptions,
    #[serde(default)]
    pub time_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("ID {0} is used more than once in this pipeline")]
    DuplicateId(String),

    #[error("ID {id} is already in use by {pipeline_name} and cannot be used by this pipeline")]
    IdInUse { id: String, pipeline_name: String },

    #[error("invalid definition: {0}")]
    Invalid(String),

    #[error("pipeline not found: {0}")]
    NotFound(String),

    #[error("pipeline {0} was modified concurrently")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semaphore::MemberCriterion;
    use crate::testing::fixtures;

    #[test]
    fn test_valid_options_pass() {
        assert!(fixtures::pipeline_options("p").validate().is_ok());
    }

    #[test]
    fn test_duplicate_within_definition() {
        let mut options = fixtures::pipeline_options("p");
        options.events[0].products[0].id = options.feed.feed_id.clone();
        let err = options.validate().unwrap_err();
        assert!(matches!(err, DefinitionError::DuplicateId(id) if id == "p-feed"));
    }

    #[test]
    fn test_manual_ticket_id_collides_with_product() {
        let mut options = fixtures::pipeline_options("p");
        options.manual_tickets.push(ManualTicket {
            id: "p-ga".to_string(),
            event_id: "p-event".to_string(),
            product_id: "p-ga".to_string(),
            attendee_email: "x@example.com".to_string(),
            attendee_name: "X".to_string(),
        });
        assert!(matches!(
            options.validate(),
            Err(DefinitionError::DuplicateId(_))
        ));
    }

    #[test]
    fn test_manual_ticket_must_reference_configured_product() {
        let mut options = fixtures::pipeline_options("p");
        options.manual_tickets[0].product_id = "nope".to_string();
        assert!(matches!(options.validate(), Err(DefinitionError::Invalid(_))));
    }

    #[test]
    fn test_group_criteria_must_reference_event() {
        let mut options = fixtures::pipeline_options("p");
        options.semaphore_groups[0].member_criteria = vec![MemberCriterion {
            event_id: "elsewhere".to_string(),
            product_id: None,
        }];
        assert!(matches!(options.validate(), Err(DefinitionError::Invalid(_))));
    }

    #[test]
    fn test_ids_in_use_by_other_pipeline() {
        let first = fixtures::definition("p", fixtures::ADMIN_USER_ID);
        let mut second = fixtures::definition("q", fixtures::ADMIN_USER_ID);
        second.options.events[0].id = "p-event".to_string();

        let err = second.check_ids_available([&first]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "ID p-event is already in use by Pipeline p and cannot be used by this pipeline"
        );
    }

    #[test]
    fn test_own_previous_version_does_not_collide() {
        let first = fixtures::definition("p", fixtures::ADMIN_USER_ID);
        let edited = first.clone();
        assert!(edited.check_ids_available([&first]).is_ok());
    }

    #[test]
    fn test_access_rules() {
        let mut def = fixtures::definition("p", "owner");
        def.editor_user_ids.insert("editor".to_string());
        assert!(def.can_access("owner"));
        assert!(def.can_access("editor"));
        assert!(!def.can_access("stranger"));
    }

    #[test]
    fn test_kind_roundtrip_and_remote_flag() {
        for kind in [
            PipelineKind::Lemonade,
            PipelineKind::Pretix,
            PipelineKind::CsvTicket,
            PipelineKind::Csv,
            PipelineKind::Pod,
        ] {
            assert_eq!(kind.as_str().parse::<PipelineKind>().unwrap(), kind);
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, serde_json::json!(kind.as_str()));
        }
        assert!(PipelineKind::Pretix.checks_in_remotely());
        assert!(!PipelineKind::CsvTicket.checks_in_remotely());
        assert!(!PipelineKind::Pod.checks_in_remotely());
        assert!("podbox".parse::<PipelineKind>().is_err());
    }
}
