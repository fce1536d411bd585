use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub auth: AuthConfig,
    pub issuance: IssuanceConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub pipelines: PipelinesConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Operator authentication configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    pub method: AuthMethod,
    /// Required when `method = "api_key"`.
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    None,
    ApiKey,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("gatehouse.db")
}

/// Keys and identities used to issue tickets and trust email assertions.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IssuanceConfig {
    /// Hex-encoded 32-byte Ed25519 seed used to sign issued tickets.
    pub signing_key: String,
    /// Hex-encoded public key of the service that signs email assertions.
    pub email_issuer_public_key: String,
    /// Users with these emails can see and edit every pipeline.
    #[serde(default)]
    pub admin_emails: Vec<String>,
}

/// Credential verification settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CredentialsConfig {
    /// Credential timestamps are rounded down to this resolution.
    #[serde(default = "default_timestamp_resolution_secs")]
    pub timestamp_resolution_secs: u64,
    /// Upper bound on memoized verifications kept in memory.
    #[serde(default = "default_max_cached_verifications")]
    pub max_cached_verifications: usize,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            timestamp_resolution_secs: default_timestamp_resolution_secs(),
            max_cached_verifications: default_max_cached_verifications(),
        }
    }
}

fn default_timestamp_resolution_secs() -> u64 {
    3600
}

fn default_max_cached_verifications() -> usize {
    10_000
}

/// Pipeline scheduling settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelinesConfig {
    /// Interval between scheduled loads of each pipeline.
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
    /// Minimum time between two failure alerts for the same pipeline.
    #[serde(default = "default_alert_throttle_secs")]
    pub alert_throttle_secs: u64,
}

impl Default for PipelinesConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: default_refresh_interval_ms(),
            alert_throttle_secs: default_alert_throttle_secs(),
        }
    }
}

fn default_refresh_interval_ms() -> u64 {
    60_000
}

fn default_alert_throttle_secs() -> u64 {
    600
}

/// Bounded cache eviction settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,
    #[serde(default = "default_max_entries")]
    pub max_entries: u32,
    #[serde(default = "default_eviction_interval_secs")]
    pub eviction_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_age_days: default_max_age_days(),
            max_entries: default_max_entries(),
            eviction_interval_secs: default_eviction_interval_secs(),
        }
    }
}

fn default_max_age_days() -> u32 {
    30
}

fn default_max_entries() -> u32 {
    10_000
}

fn default_eviction_interval_secs() -> u64 {
    3600
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub auth: SanitizedAuthConfig,
    pub issuance: SanitizedIssuanceConfig,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub credentials: CredentialsConfig,
    pub pipelines: PipelinesConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedAuthConfig {
    pub method: String,
    pub api_key_configured: bool,
}

/// Issuance config with the signing seed hidden
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedIssuanceConfig {
    pub signing_key_configured: bool,
    pub email_issuer_public_key: String,
    pub admin_count: usize,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            auth: SanitizedAuthConfig {
                method: match config.auth.method {
                    AuthMethod::None => "none".to_string(),
                    AuthMethod::ApiKey => "api_key".to_string(),
                },
                api_key_configured: config
                    .auth
                    .api_key
                    .as_ref()
                    .is_some_and(|k| !k.is_empty()),
            },
            issuance: SanitizedIssuanceConfig {
                signing_key_configured: !config.issuance.signing_key.is_empty(),
                email_issuer_public_key: config.issuance.email_issuer_public_key.clone(),
                admin_count: config.issuance.admin_emails.len(),
            },
            server: config.server.clone(),
            database: config.database.clone(),
            credentials: config.credentials.clone(),
            pipelines: config.pipelines.clone(),
            cache: config.cache.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ISSUANCE: &str = r#"
[issuance]
signing_key = "0101010101010101010101010101010101010101010101010101010101010101"
email_issuer_public_key = "8a88e3dd7409f195fd52db2d3cba5d72ca6709bf1d94121bf3748801b40f6f5c"
"#;

    #[test]
    fn test_deserialize_valid_config_with_none_auth() {
        let toml = format!(
            r#"
[auth]
method = "none"

[server]
host = "127.0.0.1"
port = 9000
{ISSUANCE}"#
        );
        let config: Config = toml::from_str(&toml).unwrap();
        assert_eq!(config.auth.method, AuthMethod::None);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host.to_string(), "127.0.0.1");
    }

    #[test]
    fn test_deserialize_applies_defaults() {
        let toml = format!("[auth]\nmethod = \"none\"\n{ISSUANCE}");
        let config: Config = toml::from_str(&toml).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.path.to_str().unwrap(), "gatehouse.db");
        assert_eq!(config.credentials.timestamp_resolution_secs, 3600);
        assert_eq!(config.pipelines.refresh_interval_ms, 60_000);
        assert_eq!(config.pipelines.alert_throttle_secs, 600);
        assert_eq!(config.cache.max_age_days, 30);
        assert!(config.issuance.admin_emails.is_empty());
    }

    #[test]
    fn test_deserialize_missing_issuance_fails() {
        let toml = r#"
[auth]
method = "none"
"#;
        let result: Result<Config, _> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_deserialize_api_key_auth() {
        let toml = format!(
            "[auth]\nmethod = \"api_key\"\napi_key = \"secret\"\n{ISSUANCE}"
        );
        let config: Config = toml::from_str(&toml).unwrap();
        assert_eq!(config.auth.method, AuthMethod::ApiKey);
        assert_eq!(config.auth.api_key.as_deref(), Some("secret"));
    }

    #[test]
    fn test_sanitized_config_hides_secrets() {
        let toml = format!(
            "[auth]\nmethod = \"api_key\"\napi_key = \"secret\"\n{ISSUANCE}admin_emails = [\"admin@example.com\"]\n"
        );
        let config: Config = toml::from_str(&toml).unwrap();
        let sanitized = SanitizedConfig::from(&config);
        assert_eq!(sanitized.auth.method, "api_key");
        assert!(sanitized.auth.api_key_configured);
        assert!(sanitized.issuance.signing_key_configured);
        assert_eq!(sanitized.issuance.admin_count, 1);

        let json = serde_json::to_string(&sanitized).unwrap();
        assert!(!json.contains("secret"));
        assert!(!json.contains("0101010101"));
    }
}
