use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;

/// Header naming the operator on whose behalf a request is made.
pub const OPERATOR_EMAIL_HEADER: &str = "x-user-email";

/// Request information for authentication
#[derive(Debug, Clone)]
pub struct AuthRequest {
    pub headers: HashMap<String, String>,
    pub source_ip: IpAddr,
}

impl AuthRequest {
    /// Operator email from the request headers, normalized to lowercase.
    pub fn operator_email(&self) -> Option<String> {
        self.headers
            .get(OPERATOR_EMAIL_HEADER)
            .map(|v| v.trim().to_lowercase())
            .filter(|v| !v.is_empty())
    }
}

/// Authenticated identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub method: String,
    pub claims: HashMap<String, serde_json::Value>,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self {
            user_id: "anonymous".to_string(),
            method: "none".to_string(),
            claims: HashMap::new(),
        }
    }

    /// Attach the operator email claim, if one was supplied.
    pub fn with_email(mut self, email: Option<String>) -> Self {
        if let Some(email) = email {
            self.claims
                .insert("email".to_string(), serde_json::Value::String(email));
        }
        self
    }

    pub fn email(&self) -> Option<&str> {
        self.claims.get("email").and_then(|v| v.as_str())
    }
}
