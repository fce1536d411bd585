//! Shared-secret authentication for the operator API.

use std::collections::HashMap;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{AuthError, AuthRequest, Authenticator, Identity};

/// Accepts `Authorization: Bearer <key>` or `X-API-Key: <key>`.
///
/// Only the SHA-256 digest of the configured key is kept, and presented keys
/// are compared digest to digest so the comparison length never depends on
/// the input.
pub struct ApiKeyAuthenticator {
    key_digest: [u8; 32],
}

impl ApiKeyAuthenticator {
    pub fn new(api_key: String) -> Self {
        Self {
            key_digest: Sha256::digest(api_key.as_bytes()).into(),
        }
    }

    fn presented_key<'a>(&self, request: &'a AuthRequest) -> Option<&'a str> {
        if let Some(value) = request.headers.get("authorization") {
            let (scheme, key) = value.split_once(' ')?;
            return scheme.eq_ignore_ascii_case("bearer").then_some(key.trim());
        }
        request.headers.get("x-api-key").map(|k| k.trim())
    }

    fn matches(&self, key: &str) -> bool {
        let digest: [u8; 32] = Sha256::digest(key.as_bytes()).into();
        digest
            .iter()
            .zip(self.key_digest.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

#[async_trait]
impl Authenticator for ApiKeyAuthenticator {
    async fn authenticate(&self, request: &AuthRequest) -> Result<Identity, AuthError> {
        let key = self
            .presented_key(request)
            .ok_or(AuthError::NotAuthenticated)?;

        if !self.matches(key) {
            return Err(AuthError::InvalidCredentials("Invalid API key".to_string()));
        }

        Ok(Identity {
            user_id: "api_key_operator".to_string(),
            method: self.method_name().to_string(),
            claims: HashMap::new(),
        }
        .with_email(request.operator_email()))
    }

    fn method_name(&self) -> &'static str {
        "api_key"
    }
}
