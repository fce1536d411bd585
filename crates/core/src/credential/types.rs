use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The claim inside an email assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailClaim {
    pub email: String,
    /// Hex public key the email is bound to.
    pub holder: String,
}

/// An email claim signed by an email issuer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAssertion {
    pub claim: EmailClaim,
    /// Hex public key of the issuer.
    pub issuer: String,
    /// Hex signature over the canonical JSON of `claim`.
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPayload {
    /// Milliseconds since the epoch, rounded down to the timestamp resolution.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<EmailAssertion>,
}

/// Holder-signed credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialEnvelope {
    /// Hex public key of the holder. This doubles as the holder's identity
    /// commitment for semaphore groups.
    pub holder: String,
    pub payload: CredentialPayload,
    /// Hex signature over the canonical JSON of `payload`.
    pub signature: String,
}

impl CredentialEnvelope {
    pub fn serialize(&self) -> Result<SerializedCredential, serde_json::Error> {
        serde_json::to_string(self).map(SerializedCredential)
    }
}

/// Canonical bytes a holder signs.
pub fn payload_message(payload: &CredentialPayload) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(payload)
}

/// Canonical bytes an email issuer signs.
pub fn claim_message(claim: &EmailClaim) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(claim)
}

/// A credential exactly as the client sent it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SerializedCredential(pub String);

impl SerializedCredential {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SerializedCredential {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Result of a successful verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifiedCredential {
    /// Holder public key / identity commitment.
    pub holder: String,
    /// Verified email, lowercased, when an assertion was present.
    pub email: Option<String>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("credential timestamp {timestamp} is outside the current window {window}")]
    Expired { timestamp: i64, window: i64 },

    #[error("email assertion holder does not match credential holder")]
    IdentityMismatch,

    #[error("credential has no email assertion")]
    MissingEmail,
}

impl VerificationError {
    /// Stable discriminator used in metrics and API responses.
    pub fn reason(&self) -> &'static str {
        match self {
            VerificationError::InvalidSignature(_) => "InvalidSignature",
            VerificationError::Expired { .. } => "Expired",
            VerificationError::IdentityMismatch => "IdentityMismatch",
            VerificationError::MissingEmail => "MissingEmail",
        }
    }
}
