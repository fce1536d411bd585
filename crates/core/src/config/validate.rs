use ed25519_dalek::VerifyingKey;

use super::{types::Config, AuthMethod, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - API key is present when api_key auth is selected
/// - Issuance keys decode to Ed25519 key material
/// - Admin emails look like emails
/// - Intervals and bounds are non-zero
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.auth.method == AuthMethod::ApiKey
        && config.auth.api_key.as_ref().is_none_or(|k| k.is_empty())
    {
        return Err(ConfigError::ValidationError(
            "auth.api_key must be set when auth.method is api_key".to_string(),
        ));
    }

    decode_key("issuance.signing_key", &config.issuance.signing_key)?;
    let issuer = decode_key(
        "issuance.email_issuer_public_key",
        &config.issuance.email_issuer_public_key,
    )?;
    VerifyingKey::from_bytes(&issuer).map_err(|e| {
        ConfigError::ValidationError(format!(
            "issuance.email_issuer_public_key is not a valid Ed25519 key: {}",
            e
        ))
    })?;

    for email in &config.issuance.admin_emails {
        if !looks_like_email(email) {
            return Err(ConfigError::ValidationError(format!(
                "issuance.admin_emails contains an invalid email: {:?}",
                email
            )));
        }
    }

    if config.credentials.timestamp_resolution_secs == 0 {
        return Err(ConfigError::ValidationError(
            "credentials.timestamp_resolution_secs cannot be 0".to_string(),
        ));
    }
    if config.credentials.max_cached_verifications == 0 {
        return Err(ConfigError::ValidationError(
            "credentials.max_cached_verifications cannot be 0".to_string(),
        ));
    }
    if config.pipelines.refresh_interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "pipelines.refresh_interval_ms cannot be 0".to_string(),
        ));
    }
    if config.cache.max_entries == 0 || config.cache.eviction_interval_secs == 0 {
        return Err(ConfigError::ValidationError(
            "cache.max_entries and cache.eviction_interval_secs cannot be 0".to_string(),
        ));
    }

    Ok(())
}

fn decode_key(field: &str, value: &str) -> Result<[u8; 32], ConfigError> {
    let bytes = hex::decode(value)
        .map_err(|e| ConfigError::ValidationError(format!("{} is not valid hex: {}", field, e)))?;
    bytes.try_into().map_err(|_| {
        ConfigError::ValidationError(format!("{} must be 32 bytes (64 hex characters)", field))
    })
}

fn looks_like_email(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !value.contains(char::is_whitespace)
        }
        None => false,
    }
}
