//! Testing utilities: a mock ticketing backend, deterministic keys and
//! credential builders.
//!
//! # Example
//!
//! ```rust,ignore
//! use gatehouse_core::testing::{fixtures, MockTicketBackend};
//!
//! let backend = MockTicketBackend::with_tickets(vec![/* tickets */]);
//! let clock = Arc::new(ManualClock::new(Utc::now()));
//! let factory = fixtures::CredentialFactory::new(clock.clone(), 3600);
//! let credential = factory.credential(&fixtures::holder(1), Some(fixtures::CHECKER_EMAIL));
//! ```

mod mock_backend;

pub use mock_backend::{MockTicketBackend, RecordedCheckin};

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::sync::Arc;

    use chrono::{DateTime, SubsecRound, Utc};
    use serde_json::json;

    use crate::cache::SqliteCacheStore;
    use crate::checkin::SqliteCheckinStore;
    use crate::clock::Clock;
    use crate::config::{
        AuthConfig, AuthMethod, CacheConfig, Config, CredentialsConfig, DatabaseConfig,
        IssuanceConfig, PipelinesConfig, ServerConfig,
    };
    use crate::consumer::SqliteConsumerStore;
    use crate::credential::{
        claim_message, payload_message, round_timestamp, CredentialEnvelope, CredentialPayload,
        CredentialVerifier, Ed25519Scheme, EmailAssertion, EmailClaim, KeySigner,
        SerializedCredential,
    };
    use crate::offline::SqliteOfflineCheckinStore;
    use crate::pipeline::{
        BackendRegistry, BackendTicket, DefinitionDraft, EventConfig, FeedOptions, ManualTicket,
        PipelineDefinition, PipelineDeps, PipelineKind, PipelineOptions, ProductConfig,
        TicketIssuer,
    };
    use crate::semaphore::{SemaphoreGroupConfig, SqliteSemaphoreHistoryStore};

    pub const ADMIN_EMAIL: &str = "admin@example.com";
    pub const ADMIN_USER_ID: &str = "admin-user";
    pub const HOLDER_EMAIL: &str = "holder@example.com";
    pub const CHECKER_EMAIL: &str = "checker@example.com";

    /// Seed of the key that signs issued tickets.
    pub const ISSUER_SEED: [u8; 32] = [0x15; 32];
    /// Seed of the trusted email-assertion issuer.
    pub const EMAIL_ISSUER_SEED: [u8; 32] = [0xE1; 32];

    /// Deterministic holder identity.
    pub fn holder(seed: u8) -> KeySigner {
        KeySigner::from_seed([seed; 32])
    }

    pub fn email_issuer() -> KeySigner {
        KeySigner::from_seed(EMAIL_ISSUER_SEED)
    }

    pub fn issuer_signer() -> KeySigner {
        KeySigner::from_seed(ISSUER_SEED)
    }

    /// Builds credential envelopes for the clock's current window.
    pub struct CredentialFactory {
        clock: Arc<dyn Clock>,
        resolution_ms: i64,
        email_issuer: KeySigner,
    }

    impl CredentialFactory {
        pub fn new(clock: Arc<dyn Clock>, resolution_secs: u64) -> Self {
            Self {
                clock,
                resolution_ms: resolution_secs as i64 * 1000,
                email_issuer: email_issuer(),
            }
        }

        pub fn window(&self) -> i64 {
            round_timestamp(self.clock.now().timestamp_millis(), self.resolution_ms)
        }

        /// A valid envelope, with an email assertion if `email` is given.
        pub fn credential(&self, holder: &KeySigner, email: Option<&str>) -> SerializedCredential {
            let assertion = email.map(|email| {
                assertion(email, &holder.public_key_hex(), &self.email_issuer)
            });
            envelope(holder, assertion, self.window())
        }

        /// A valid envelope stamped with an arbitrary timestamp.
        pub fn credential_at(
            &self,
            holder: &KeySigner,
            email: Option<&str>,
            timestamp: i64,
        ) -> SerializedCredential {
            let assertion = email.map(|email| {
                assertion(email, &holder.public_key_hex(), &self.email_issuer)
            });
            envelope(holder, assertion, timestamp)
        }

        /// An envelope whose email assertion is bound to another holder.
        pub fn mismatched_credential(&self, holder: &KeySigner, email: &str) -> SerializedCredential {
            let other = self::holder(200);
            let assertion = assertion(email, &other.public_key_hex(), &self.email_issuer);
            envelope(holder, Some(assertion), self.window())
        }

        /// An envelope whose email assertion is signed by `issuer`.
        pub fn credential_with_issuer(
            &self,
            holder: &KeySigner,
            email: &str,
            issuer: &KeySigner,
        ) -> SerializedCredential {
            let assertion = assertion(email, &holder.public_key_hex(), issuer);
            envelope(holder, Some(assertion), self.window())
        }
    }

    fn assertion(email: &str, bound_holder: &str, issuer: &KeySigner) -> EmailAssertion {
        let claim = EmailClaim {
            email: email.to_string(),
            holder: bound_holder.to_string(),
        };
        let signature = issuer.sign_hex(&claim_message(&claim).unwrap());
        EmailAssertion {
            claim,
            issuer: issuer.public_key_hex(),
            signature,
        }
    }

    fn envelope(
        holder: &KeySigner,
        email: Option<EmailAssertion>,
        timestamp: i64,
    ) -> SerializedCredential {
        let payload = CredentialPayload { timestamp, email };
        let signature = holder.sign_hex(&payload_message(&payload).unwrap());
        CredentialEnvelope {
            holder: holder.public_key_hex(),
            payload,
            signature,
        }
        .serialize()
        .unwrap()
    }

    /// A valid configuration with in-memory friendly defaults.
    pub fn test_config() -> Config {
        Config {
            auth: AuthConfig {
                method: AuthMethod::None,
                api_key: None,
            },
            issuance: IssuanceConfig {
                signing_key: hex::encode(ISSUER_SEED),
                email_issuer_public_key: email_issuer().public_key_hex(),
                admin_emails: vec![ADMIN_EMAIL.to_string()],
            },
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            credentials: CredentialsConfig::default(),
            pipelines: PipelinesConfig {
                refresh_interval_ms: 3_600_000,
                alert_throttle_secs: 600,
            },
            cache: CacheConfig::default(),
        }
    }

    pub fn now() -> DateTime<Utc> {
        Utc::now().trunc_subsecs(6)
    }

    pub fn backend_ticket(id: &str, event_id: &str, product_id: &str, email: &str) -> BackendTicket {
        BackendTicket {
            id: id.to_string(),
            event_id: event_id.to_string(),
            product_id: product_id.to_string(),
            attendee_email: email.to_string(),
            attendee_name: format!("Attendee {}", id),
            is_consumed: false,
            checker: None,
            checkin_timestamp: None,
        }
    }

    /// Options with one event (`{p}-event`) offering a general product
    /// (`{p}-ga`) and a superuser product (`{p}-staff`), one manual ticket
    /// (`{p}-manual-1`) held by [`HOLDER_EMAIL`], and one catch-all group
    /// (`{p}-attendees`). `source` lists `{p}-t1` for [`HOLDER_EMAIL`] and
    /// `{p}-t2`, a staff ticket for [`CHECKER_EMAIL`].
    pub fn pipeline_options(prefix: &str) -> PipelineOptions {
        let event = format!("{}-event", prefix);
        let ga = format!("{}-ga", prefix);
        let staff = format!("{}-staff", prefix);

        PipelineOptions {
            name: format!("Pipeline {}", prefix),
            paused: false,
            feed: FeedOptions {
                feed_id: format!("{}-feed", prefix),
                folder: format!("{}/tickets", prefix),
                name: format!("{} tickets", prefix),
                description: String::new(),
            },
            events: vec![EventConfig {
                id: event.clone(),
                name: format!("Event {}", prefix),
                products: vec![
                    ProductConfig {
                        id: ga.clone(),
                        name: "General Admission".to_string(),
                        is_superuser: false,
                    },
                    ProductConfig {
                        id: staff.clone(),
                        name: "Staff".to_string(),
                        is_superuser: true,
                    },
                ],
            }],
            manual_tickets: vec![ManualTicket {
                id: format!("{}-manual-1", prefix),
                event_id: event.clone(),
                product_id: ga.clone(),
                attendee_email: HOLDER_EMAIL.to_string(),
                attendee_name: "Manual Holder".to_string(),
            }],
            semaphore_groups: vec![SemaphoreGroupConfig {
                group_id: format!("{}-attendees", prefix),
                name: "Attendees".to_string(),
                member_criteria: vec![],
            }],
            source: json!({
                "tickets": [
                    backend_ticket(&format!("{}-t1", prefix), &event, &ga, HOLDER_EMAIL),
                    backend_ticket(&format!("{}-t2", prefix), &event, &staff, CHECKER_EMAIL),
                ]
            }),
        }
    }

    pub fn definition(prefix: &str, owner: &str) -> PipelineDefinition {
        let now = now();
        PipelineDefinition {
            id: format!("pipeline-{}", prefix),
            owner_user_id: owner.to_string(),
            editor_user_ids: Default::default(),
            kind: PipelineKind::CsvTicket,
            options: pipeline_options(prefix),
            time_created: now,
            time_updated: now,
        }
    }

    /// A creation draft for `definition(prefix, ..)`.
    pub fn draft(prefix: &str, kind: PipelineKind) -> DefinitionDraft {
        DefinitionDraft {
            id: Some(format!("pipeline-{}", prefix)),
            owner_user_id: None,
            editor_user_ids: Default::default(),
            kind,
            options: pipeline_options(prefix),
            time_updated: None,
        }
    }

    /// In-memory collaborators for a pipeline instance.
    pub fn pipeline_deps(clock: Arc<dyn Clock>, backends: BackendRegistry) -> PipelineDeps {
        let cache = Arc::new(SqliteCacheStore::in_memory_with_clock(clock.clone()).unwrap());
        PipelineDeps {
            checkins: Arc::new(SqliteCheckinStore::in_memory().unwrap()),
            offline: Arc::new(SqliteOfflineCheckinStore::in_memory().unwrap()),
            consumers: Arc::new(SqliteConsumerStore::in_memory_with_clock(clock.clone()).unwrap()),
            semaphore_history: Arc::new(SqliteSemaphoreHistoryStore::in_memory().unwrap()),
            issuer: Arc::new(TicketIssuer::new(Arc::new(issuer_signer()), cache)),
            verifier: Arc::new(CredentialVerifier::new(
                Arc::new(Ed25519Scheme),
                email_issuer().public_key_hex(),
                clock.clone(),
                3600,
                1000,
            )),
            backends,
            clock,
        }
    }
}
