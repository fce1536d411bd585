//! Request, response and diagnostic types of a running pipeline.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::backend::BackendError;
use super::definition::PipelineKind;
use super::issuance::{IssuanceError, SignedTicket};
use crate::checkin::CheckinError;
use crate::consumer::ConsumerError;
use crate::credential::{SerializedCredential, VerificationError};
use crate::offline::{OfflineCheckin, OfflineCheckinError};
use crate::semaphore::{SemaphoreError, SemaphoreGroupInfo};

/// A ticket served by a pipeline, with its current check-in state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineTicket {
    pub id: String,
    pub event_id: String,
    pub product_id: String,
    pub attendee_email: String,
    pub attendee_name: String,
    pub is_consumed: bool,
    pub checker: Option<String>,
    pub checkin_timestamp: Option<DateTime<Utc>>,
    /// Defined in the pipeline configuration rather than the backend.
    pub is_manual: bool,
    /// Check-ins are recorded in the check-in ledger.
    pub ledger_backed: bool,
}

impl PipelineTicket {
    pub fn mark_consumed(&mut self, checker: &str, timestamp: DateTime<Utc>) {
        self.is_consumed = true;
        self.checker = Some(checker.to_string());
        self.checkin_timestamp = Some(timestamp);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineLog {
    pub level: LogLevel,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Outcome of one load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub atoms_loaded: usize,
    pub offline_tickets_checked_in: usize,
    pub offline_tickets_failed_to_check_in: usize,
    pub semaphore_groups_updated: usize,
    pub error_message: Option<String>,
    pub log: Vec<PipelineLog>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckinRequest {
    pub credential: SerializedCredential,
    pub ticket_id: String,
    pub event_id: String,
}

/// Why a check-in was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name")]
pub enum CheckinFailure {
    NotSuperuser,
    AlreadyCheckedIn {
        #[serde(rename = "checkinTimestamp")]
        checkin_timestamp: DateTime<Utc>,
        /// `None` when the backend reports the ticket consumed without
        /// naming who checked it in.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        checker: Option<String>,
    },
    InvalidSignature {
        reason: String,
    },
    InvalidTicket {
        reason: String,
    },
    ServerError {
        message: String,
    },
}

impl CheckinFailure {
    pub fn name(&self) -> &'static str {
        match self {
            CheckinFailure::NotSuperuser => "NotSuperuser",
            CheckinFailure::AlreadyCheckedIn { .. } => "AlreadyCheckedIn",
            CheckinFailure::InvalidSignature { .. } => "InvalidSignature",
            CheckinFailure::InvalidTicket { .. } => "InvalidTicket",
            CheckinFailure::ServerError { .. } => "ServerError",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckinResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CheckinFailure>,
}

impl CheckinResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: CheckinFailure) -> Self {
        Self {
            success: false,
            error: Some(error),
        }
    }

    pub fn outcome(&self) -> &'static str {
        self.error.as_ref().map_or("success", CheckinFailure::name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineUploadRequest {
    pub credential: SerializedCredential,
    pub ticket_ids_by_event: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineTicketsRequest {
    pub credential: SerializedCredential,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineTicket {
    pub id: String,
    pub event_id: String,
    pub product_id: String,
    pub attendee_email: String,
    pub attendee_name: String,
    pub is_consumed: bool,
    pub checker: Option<String>,
    pub checkin_timestamp: Option<DateTime<Utc>>,
}

impl From<&PipelineTicket> for OfflineTicket {
    fn from(ticket: &PipelineTicket) -> Self {
        Self {
            id: ticket.id.clone(),
            event_id: ticket.event_id.clone(),
            product_id: ticket.product_id.clone(),
            attendee_email: ticket.attendee_email.clone(),
            attendee_name: ticket.attendee_name.clone(),
            is_consumed: ticket.is_consumed,
            checker: ticket.checker.clone(),
            checkin_timestamp: ticket.checkin_timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineTicketsResponse {
    pub tickets: Vec<OfflineTicket>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollFeedRequest {
    pub feed_id: String,
    #[serde(default)]
    pub credential: Option<SerializedCredential>,
}

/// Declarative instruction for the client's folder state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FeedAction {
    DeleteFolder {
        folder: String,
        recursive: bool,
    },
    ReplaceInFolder {
        folder: String,
        artifacts: Vec<SignedTicket>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollFeedResponse {
    pub actions: Vec<FeedAction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPermission {
    pub folder: String,
    pub action_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedInfo {
    pub feed_id: String,
    pub folder: String,
    pub name: String,
    pub description: String,
    pub permissions: Vec<FeedPermission>,
}

/// Operator diagnostics for one pipeline instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineInfo {
    pub id: String,
    pub name: String,
    pub kind: PipelineKind,
    pub paused: bool,
    pub feed: FeedInfo,
    pub ticket_count: usize,
    pub checked_in_count: usize,
    pub last_load: Option<LoadSummary>,
    pub queued_offline_checkins: Vec<OfflineCheckin>,
    pub semaphore_groups: Vec<SemaphoreGroupInfo>,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("credential rejected: {0}")]
    Credential(#[from] VerificationError),

    #[error("a credential is required")]
    CredentialRequired,

    #[error("feed {0} is not served by this pipeline")]
    UnknownFeed(String),

    #[error("pipeline is stopped")]
    Stopped,

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("invalid definition: {0}")]
    InvalidDefinition(String),

    #[error("issuance error: {0}")]
    Issuance(#[from] IssuanceError),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<CheckinError> for PipelineError {
    fn from(e: CheckinError) -> Self {
        PipelineError::Storage(e.to_string())
    }
}

impl From<ConsumerError> for PipelineError {
    fn from(e: ConsumerError) -> Self {
        PipelineError::Storage(e.to_string())
    }
}

impl From<OfflineCheckinError> for PipelineError {
    fn from(e: OfflineCheckinError) -> Self {
        PipelineError::Storage(e.to_string())
    }
}

impl From<SemaphoreError> for PipelineError {
    fn from(e: SemaphoreError) -> Self {
        PipelineError::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_already_checked_in_wire_shape() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let result = CheckinResult::failed(CheckinFailure::AlreadyCheckedIn {
            checkin_timestamp: ts,
            checker: Some("c@example.com".to_string()),
        });
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["name"], "AlreadyCheckedIn");
        assert_eq!(json["error"]["checker"], "c@example.com");
        assert_eq!(json["error"]["checkinTimestamp"], "2024-05-01T10:00:00Z");
    }

    #[test]
    fn test_success_omits_error() {
        let json = serde_json::to_string(&CheckinResult::ok()).unwrap();
        assert_eq!(json, r#"{"success":true}"#);
        assert_eq!(CheckinResult::ok().outcome(), "success");
    }

    #[test]
    fn test_feed_action_tags() {
        let action = FeedAction::DeleteFolder {
            folder: "tickets".to_string(),
            recursive: true,
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["type"], "DeleteFolder");
        assert_eq!(json["recursive"], true);
    }

    #[test]
    fn test_offline_upload_uses_camel_case() {
        let req: OfflineUploadRequest = serde_json::from_str(
            r#"{"credential":"{}","ticketIdsByEvent":{"e1":["t1","t2"]}}"#,
        )
        .unwrap();
        assert_eq!(req.ticket_ids_by_event["e1"], vec!["t1", "t2"]);
    }
}
