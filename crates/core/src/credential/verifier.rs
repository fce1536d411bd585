use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{
    claim_message, payload_message, CredentialEnvelope, SerializedCredential, SignatureScheme,
    VerificationError, VerifiedCredential,
};
use crate::clock::Clock;
use crate::metrics::{CREDENTIAL_SINGLE_FLIGHT_HITS, CREDENTIAL_VERIFICATIONS};

/// Shared handle on a verification. Clones of the same handle resolve to the
/// same result.
pub type VerificationFuture =
    Shared<BoxFuture<'static, Result<VerifiedCredential, VerificationError>>>;

struct Memoized {
    window: i64,
    /// Insertion order, used to pick an eviction victim.
    sequence: u64,
    future: VerificationFuture,
}

/// Verifies credential envelopes, deduplicating identical inputs.
///
/// Verifications are keyed by the SHA-256 of the serialized envelope and the
/// current timestamp window. A second call with the same input returns a
/// clone of the first call's future, whether that future is still running or
/// already resolved. Entries from past windows are purged on every call.
pub struct CredentialVerifier {
    scheme: Arc<dyn SignatureScheme>,
    trusted_email_issuer: String,
    clock: Arc<dyn Clock>,
    resolution_ms: i64,
    max_entries: usize,
    memo: Mutex<HashMap<String, Memoized>>,
    next_sequence: AtomicU64,
}

impl CredentialVerifier {
    pub fn new(
        scheme: Arc<dyn SignatureScheme>,
        trusted_email_issuer: impl Into<String>,
        clock: Arc<dyn Clock>,
        resolution_secs: u64,
        max_entries: usize,
    ) -> Self {
        Self {
            scheme,
            trusted_email_issuer: trusted_email_issuer.into(),
            clock,
            resolution_ms: (resolution_secs.max(1) as i64).saturating_mul(1000),
            max_entries: max_entries.max(1),
            memo: Mutex::new(HashMap::new()),
            next_sequence: AtomicU64::new(0),
        }
    }

    /// Start of the resolution window containing `now`, in milliseconds.
    pub fn current_window(&self) -> i64 {
        round_timestamp(self.clock.now().timestamp_millis(), self.resolution_ms)
    }

    pub fn resolution_ms(&self) -> i64 {
        self.resolution_ms
    }

    pub fn verify(&self, credential: &SerializedCredential) -> VerificationFuture {
        let window = self.current_window();
        let key = hex::encode(Sha256::digest(credential.as_str().as_bytes()));

        let mut memo = match self.memo.lock() {
            Ok(memo) => memo,
            Err(poisoned) => poisoned.into_inner(),
        };
        memo.retain(|_, entry| entry.window == window);

        if let Some(entry) = memo.get(&key) {
            CREDENTIAL_SINGLE_FLIGHT_HITS.inc();
            return entry.future.clone();
        }

        let future = verify_envelope(
            Arc::clone(&self.scheme),
            self.trusted_email_issuer.clone(),
            credential.0.clone(),
            window,
        )
        .map(|result| {
            let outcome = match &result {
                Ok(_) => "valid",
                Err(e) => e.reason(),
            };
            CREDENTIAL_VERIFICATIONS.with_label_values(&[outcome]).inc();
            result
        })
        .boxed()
        .shared();

        if memo.len() >= self.max_entries {
            memo.retain(|_, entry| entry.future.peek().is_none());
        }
        if memo.len() >= self.max_entries {
            let oldest = memo
                .iter()
                .min_by_key(|(_, entry)| entry.sequence)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                debug!("verification memo full, evicting oldest in-flight entry");
                memo.remove(&oldest);
            }
        }
        memo.insert(
            key,
            Memoized {
                window,
                sequence: self.next_sequence.fetch_add(1, Ordering::Relaxed),
                future: future.clone(),
            },
        );

        future
    }

    /// Verify and require an email assertion.
    pub async fn verify_and_require_email(
        &self,
        credential: &SerializedCredential,
    ) -> Result<VerifiedCredential, VerificationError> {
        let verified = self.verify(credential).await?;
        if verified.email.is_none() {
            return Err(VerificationError::MissingEmail);
        }
        Ok(verified)
    }

    pub fn memoized_count(&self) -> usize {
        self.memo.lock().map(|m| m.len()).unwrap_or(0)
    }
}

/// Round a millisecond timestamp down to a multiple of `resolution_ms`.
pub fn round_timestamp(millis: i64, resolution_ms: i64) -> i64 {
    millis - millis.rem_euclid(resolution_ms)
}

async fn verify_envelope(
    scheme: Arc<dyn SignatureScheme>,
    trusted_email_issuer: String,
    serialized: String,
    window: i64,
) -> Result<VerifiedCredential, VerificationError> {
    let envelope: CredentialEnvelope = serde_json::from_str(&serialized)
        .map_err(|e| VerificationError::InvalidSignature(format!("malformed credential: {}", e)))?;

    let message = payload_message(&envelope.payload)
        .map_err(|e| VerificationError::InvalidSignature(e.to_string()))?;
    if !scheme.verify(&envelope.holder, &message, &envelope.signature) {
        return Err(VerificationError::InvalidSignature(
            "holder signature does not verify".to_string(),
        ));
    }

    if envelope.payload.timestamp != window {
        return Err(VerificationError::Expired {
            timestamp: envelope.payload.timestamp,
            window,
        });
    }

    let email = match &envelope.payload.email {
        None => None,
        Some(assertion) => {
            if !assertion.issuer.eq_ignore_ascii_case(&trusted_email_issuer) {
                return Err(VerificationError::InvalidSignature(
                    "email assertion signed by an untrusted issuer".to_string(),
                ));
            }
            let claim = claim_message(&assertion.claim)
                .map_err(|e| VerificationError::InvalidSignature(e.to_string()))?;
            if !scheme.verify(&assertion.issuer, &claim, &assertion.signature) {
                return Err(VerificationError::InvalidSignature(
                    "email assertion signature does not verify".to_string(),
                ));
            }
            if !assertion.claim.holder.eq_ignore_ascii_case(&envelope.holder) {
                return Err(VerificationError::IdentityMismatch);
            }
            Some(assertion.claim.email.trim().to_lowercase())
        }
    };

    Ok(VerifiedCredential {
        holder: envelope.holder.to_lowercase(),
        email,
        timestamp: envelope.payload.timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::credential::Ed25519Scheme;
    use crate::testing::fixtures::{self, CredentialFactory};
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingScheme {
        calls: AtomicUsize,
    }

    impl SignatureScheme for CountingScheme {
        fn verify(&self, public_key: &str, message: &[u8], signature: &str) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ed25519Scheme.verify(public_key, message, signature)
        }
    }

    fn setup() -> (CredentialVerifier, CredentialFactory, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 15, 0).unwrap(),
        ));
        let factory = CredentialFactory::new(clock.clone(), 3600);
        let verifier = CredentialVerifier::new(
            Arc::new(Ed25519Scheme),
            fixtures::email_issuer().public_key_hex(),
            clock.clone(),
            3600,
            100,
        );
        (verifier, factory, clock)
    }

    #[test]
    fn test_round_timestamp() {
        assert_eq!(round_timestamp(7_199_999, 3_600_000), 3_600_000);
        assert_eq!(round_timestamp(7_200_000, 3_600_000), 7_200_000);
        assert_eq!(round_timestamp(-1, 1000), -1000);
    }

    #[tokio::test]
    async fn test_valid_credential_with_email() {
        let (verifier, factory, _) = setup();
        let holder = fixtures::holder(1);
        let credential = factory.credential(&holder, Some("Alice@Example.com"));

        let verified = verifier.verify(&credential).await.unwrap();
        assert_eq!(verified.holder, holder.public_key_hex());
        assert_eq!(verified.email.as_deref(), Some("alice@example.com"));
    }

    #[tokio::test]
    async fn test_require_email_rejects_anonymous_credential() {
        let (verifier, factory, _) = setup();
        let credential = factory.credential(&fixtures::holder(1), None);

        assert!(verifier.verify(&credential).await.is_ok());
        assert_eq!(
            verifier.verify_and_require_email(&credential).await,
            Err(VerificationError::MissingEmail)
        );
    }

    #[tokio::test]
    async fn test_concurrent_calls_share_one_future() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let scheme = Arc::new(CountingScheme {
            calls: AtomicUsize::new(0),
        });
        let verifier = CredentialVerifier::new(
            scheme.clone(),
            fixtures::email_issuer().public_key_hex(),
            clock.clone(),
            3600,
            100,
        );
        let factory = CredentialFactory::new(clock, 3600);
        let credential = factory.credential(&fixtures::holder(2), Some("bob@example.com"));

        let first = verifier.verify(&credential);
        let second = verifier.verify(&credential);
        assert!(first.ptr_eq(&second));

        let (a, b) = tokio::join!(first, second);
        assert_eq!(a, b);
        // Holder signature + email assertion signature, checked once.
        assert_eq!(scheme.calls.load(Ordering::SeqCst), 2);

        // A later call reuses the settled result.
        let third = verifier.verify(&credential).await;
        assert_eq!(third, a);
        assert_eq!(scheme.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_errors_are_shared_too() {
        let (verifier, factory, _) = setup();
        let credential = factory.mismatched_credential(&fixtures::holder(1), "eve@example.com");

        let first = verifier.verify(&credential);
        let second = verifier.verify(&credential);
        assert!(first.ptr_eq(&second));
        assert_eq!(first.await, Err(VerificationError::IdentityMismatch));
        assert_eq!(second.await, Err(VerificationError::IdentityMismatch));
    }

    #[tokio::test]
    async fn test_expired_credential_fails() {
        let (verifier, factory, clock) = setup();
        let credential = factory.credential(&fixtures::holder(1), Some("a@example.com"));
        clock.advance(Duration::hours(1));

        let result = verifier.verify(&credential).await;
        assert!(matches!(result, Err(VerificationError::Expired { .. })));
    }

    #[tokio::test]
    async fn test_window_change_purges_memo() {
        let (verifier, factory, clock) = setup();
        let credential = factory.credential(&fixtures::holder(1), Some("a@example.com"));
        let _ = verifier.verify(&credential).await;
        assert_eq!(verifier.memoized_count(), 1);

        clock.advance(Duration::hours(1));
        let fresh = factory.credential(&fixtures::holder(1), Some("a@example.com"));
        let _ = verifier.verify(&fresh).await;
        assert_eq!(verifier.memoized_count(), 1);
    }

    #[tokio::test]
    async fn test_tampered_payload_fails_signature() {
        let (verifier, factory, _) = setup();
        let credential = factory.credential(&fixtures::holder(1), Some("a@example.com"));
        let mut envelope: CredentialEnvelope = serde_json::from_str(credential.as_str()).unwrap();
        envelope.payload.timestamp += 1;
        let tampered = envelope.serialize().unwrap();

        let result = verifier.verify(&tampered).await;
        assert!(matches!(result, Err(VerificationError::InvalidSignature(_))));
    }

    #[tokio::test]
    async fn test_untrusted_email_issuer_fails() {
        let (verifier, factory, _) = setup();
        let rogue = fixtures::holder(99);
        let credential =
            factory.credential_with_issuer(&fixtures::holder(1), "a@example.com", &rogue);

        let result = verifier.verify(&credential).await;
        assert!(matches!(result, Err(VerificationError::InvalidSignature(_))));
    }

    #[tokio::test]
    async fn test_malformed_input_is_invalid_signature() {
        let (verifier, _, _) = setup();
        let result = verifier
            .verify(&SerializedCredential("not json".to_string()))
            .await;
        assert!(matches!(result, Err(VerificationError::InvalidSignature(_))));
    }

    #[tokio::test]
    async fn test_memo_is_bounded() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let verifier = CredentialVerifier::new(
            Arc::new(Ed25519Scheme),
            fixtures::email_issuer().public_key_hex(),
            clock.clone(),
            3600,
            2,
        );
        let factory = CredentialFactory::new(clock, 3600);
        for seed in 1..=5u8 {
            let credential = factory.credential(&fixtures::holder(seed), None);
            assert!(verifier.verify(&credential).await.is_ok());
        }
        assert!(verifier.memoized_count() <= 2);
    }

    #[tokio::test]
    async fn test_full_memo_still_shares_new_inputs() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let verifier = CredentialVerifier::new(
            Arc::new(Ed25519Scheme),
            fixtures::email_issuer().public_key_hex(),
            clock.clone(),
            3600,
            2,
        );
        let factory = CredentialFactory::new(clock, 3600);
        let credentials: Vec<_> = (1..=3u8)
            .map(|seed| factory.credential(&fixtures::holder(seed), None))
            .collect();

        // Nothing is polled yet, so every entry stays in flight.
        let first = verifier.verify(&credentials[0]);
        let _second = verifier.verify(&credentials[1]);
        let third = verifier.verify(&credentials[2]);
        let third_again = verifier.verify(&credentials[2]);
        assert!(third.ptr_eq(&third_again));
        assert_eq!(verifier.memoized_count(), 2);

        // The oldest entry made room and is verified afresh.
        let first_again = verifier.verify(&credentials[0]);
        assert!(!first.ptr_eq(&first_again));
        assert_eq!(first.await, first_again.await);
        assert!(third.await.is_ok());
    }
}
