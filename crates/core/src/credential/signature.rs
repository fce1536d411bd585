use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("key is not valid hex: {0}")]
    InvalidHex(String),

    #[error("key must be 32 bytes, got {0}")]
    InvalidLength(usize),
}

/// Pluggable signature check over hex-encoded keys and signatures.
pub trait SignatureScheme: Send + Sync {
    fn verify(&self, public_key: &str, message: &[u8], signature: &str) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Ed25519Scheme;

impl SignatureScheme for Ed25519Scheme {
    fn verify(&self, public_key: &str, message: &[u8], signature: &str) -> bool {
        let Ok(key_bytes) = decode_32(public_key) else {
            return false;
        };
        let Ok(key) = VerifyingKey::from_bytes(&key_bytes) else {
            return false;
        };
        let Ok(sig_bytes) = hex::decode(signature) else {
            return false;
        };
        let Ok(sig) = Signature::from_slice(&sig_bytes) else {
            return false;
        };
        key.verify(message, &sig).is_ok()
    }
}

/// Ed25519 signing key loaded from a hex seed.
pub struct KeySigner {
    key: SigningKey,
}

impl KeySigner {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(&seed),
        }
    }

    pub fn from_hex_seed(seed: &str) -> Result<Self, KeyError> {
        Ok(Self::from_seed(decode_32(seed)?))
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.key.verifying_key().as_bytes())
    }

    pub fn sign_hex(&self, message: &[u8]) -> String {
        hex::encode(self.key.sign(message).to_bytes())
    }
}

fn decode_32(value: &str) -> Result<[u8; 32], KeyError> {
    let bytes = hex::decode(value).map_err(|e| KeyError::InvalidHex(e.to_string()))?;
    let len = bytes.len();
    bytes.try_into().map_err(|_| KeyError::InvalidLength(len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let signer = KeySigner::from_seed([7u8; 32]);
        let sig = signer.sign_hex(b"hello");
        assert!(Ed25519Scheme.verify(&signer.public_key_hex(), b"hello", &sig));
        assert!(!Ed25519Scheme.verify(&signer.public_key_hex(), b"hellO", &sig));
    }

    #[test]
    fn test_wrong_key_fails() {
        let signer = KeySigner::from_seed([7u8; 32]);
        let other = KeySigner::from_seed([8u8; 32]);
        let sig = signer.sign_hex(b"msg");
        assert!(!Ed25519Scheme.verify(&other.public_key_hex(), b"msg", &sig));
    }

    #[test]
    fn test_garbage_inputs_fail_closed() {
        let signer = KeySigner::from_seed([7u8; 32]);
        assert!(!Ed25519Scheme.verify("zz", b"msg", "00"));
        assert!(!Ed25519Scheme.verify(&signer.public_key_hex(), b"msg", "not-hex"));
        assert!(!Ed25519Scheme.verify(&signer.public_key_hex(), b"msg", "abcd"));
    }

    #[test]
    fn test_hex_seed_roundtrip() {
        let signer = KeySigner::from_hex_seed(&"07".repeat(32)).unwrap();
        assert_eq!(
            signer.public_key_hex(),
            KeySigner::from_seed([7u8; 32]).public_key_hex()
        );
        assert!(matches!(
            KeySigner::from_hex_seed("0707"),
            Err(KeyError::InvalidLength(2))
        ));
        assert!(matches!(
            KeySigner::from_hex_seed("xyz"),
            Err(KeyError::InvalidHex(_))
        ));
    }
}
