//! Signing of issued tickets, memoized in the cache store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::warn;

use crate::cache::{CacheError, CacheStore};
use crate::credential::KeySigner;

/// The signed body of an issued ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketData {
    pub ticket_id: String,
    pub event_id: String,
    pub event_name: String,
    pub product_id: String,
    pub product_name: String,
    pub attendee_name: String,
    pub attendee_email: String,
    /// Identity commitment of the holder the ticket is issued to.
    pub holder: String,
    pub is_consumed: bool,
    pub pipeline_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTicket {
    pub data: TicketData,
    /// Hex public key of the issuer.
    pub issuer: String,
    pub signature: String,
    pub time_issued: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum IssuanceError {
    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
}

pub struct TicketIssuer {
    signer: Arc<KeySigner>,
    cache: Arc<dyn CacheStore>,
}

impl TicketIssuer {
    pub fn new(signer: Arc<KeySigner>, cache: Arc<dyn CacheStore>) -> Self {
        Self { signer, cache }
    }

    pub fn public_key(&self) -> String {
        self.signer.public_key_hex()
    }

    /// Sign `data`, reusing a previously issued artifact for identical data.
    pub fn issue(&self, data: &TicketData) -> Result<SignedTicket, IssuanceError> {
        let message =
            serde_json::to_vec(data).map_err(|e| IssuanceError::Serialization(e.to_string()))?;
        let key = format!("ticket-{}", hex::encode(Sha256::digest(&message)));

        if let Some(entry) = self.cache.get(&key)? {
            match serde_json::from_str::<SignedTicket>(&entry.value) {
                Ok(ticket) => return Ok(ticket),
                Err(e) => warn!(key = %key, error = %e, "discarding unreadable cached ticket"),
            }
        }

        let ticket = SignedTicket {
            data: data.clone(),
            issuer: self.signer.public_key_hex(),
            signature: self.signer.sign_hex(&message),
            time_issued: Utc::now(),
        };
        let value = serde_json::to_string(&ticket)
            .map_err(|e| IssuanceError::Serialization(e.to_string()))?;
        self.cache.set(&key, &value)?;
        Ok(ticket)
    }
}
