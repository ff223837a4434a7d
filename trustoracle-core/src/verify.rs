//! Submission signature verification.
//!
//! Devices sign SHA-256 of the canonical payload, not the raw message.
//! The verifier must match that exactly or no device signature will
//! ever verify.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

use crate::canonical::{canonical_json, StepPayload};

/// SHA-256 digest of the canonical signing form.
pub fn canonical_digest(payload: &StepPayload) -> [u8; 32] {
    Sha256::digest(canonical_json(payload).as_bytes()).into()
}

/// Verify a detached Ed25519 signature over the canonical digest.
///
/// Returns `false` on any malformed input (wrong key or signature
/// length, non-canonical key bytes); this never panics and never
/// reports why, the caller maps `false` to a validation failure.
pub fn verify_step_signature(payload: &StepPayload, signature: &[u8], public_key: &[u8]) -> bool {
    let Ok(key_bytes) = <[u8; 32]>::try_from(public_key) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    let Ok(sig_bytes) = <[u8; 64]>::try_from(signature) else {
        return false;
    };
    let signature = Signature::from_bytes(&sig_bytes);

    let digest = canonical_digest(payload);
    verifying_key.verify(&digest, &signature).is_ok()
}
