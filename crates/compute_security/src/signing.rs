//! Ed25519 signing helpers (§6 HTTP boundary).
//!
//! Replaces the teacher's `sha256`/`compute_artifact_hash` content-identity
//! helpers with real sign/verify over the same `ed25519-dalek` dependency:
//! a provider or consumer may sign a request body so a mutation can be
//! attributed to a keypair instead of the bearer token alone.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::OsRng;

use crate::SecurityError;

/// Generates a fresh signing key. Callers persist `to_bytes()` themselves —
/// this crate has no notion of a keystore (out of scope, §1 non-goals).
pub fn generate_signing_key() -> SigningKey {
    SigningKey::generate(&mut OsRng)
}

pub fn sign(key: &SigningKey, message: &[u8]) -> Signature {
    key.sign(message)
}

pub fn verify(key: &VerifyingKey, message: &[u8], signature: &Signature) -> Result<(), SecurityError> {
    key.verify(message, signature)
        .map_err(|_| SecurityError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_message_signed_by_a_key_verifies_against_its_own_verifying_key() {
        let key = generate_signing_key();
        let signature = sign(&key, b"offer-123");
        assert!(verify(&key.verifying_key(), b"offer-123", &signature).is_ok());
    }

    #[test]
    fn a_tampered_message_fails_verification() {
        let key = generate_signing_key();
        let signature = sign(&key, b"offer-123");
        assert!(verify(&key.verifying_key(), b"offer-456", &signature).is_err());
    }
}
