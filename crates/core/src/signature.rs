//! Envelope MAC computation and verification.
//!
//! The MAC covers the full serialized message with the envelope `signature`
//! field set to the empty string. serde_json serializes object keys in sorted
//! order, so the byte representation is canonical for a given message.

use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Errors raised while computing or verifying a message MAC.
#[derive(Debug, Error)]
pub enum SignatureError {
    /// The message could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The signing key was rejected by the MAC implementation.
    #[error("invalid signing key")]
    InvalidKey,

    /// The signature field does not contain valid hex.
    #[error("malformed signature encoding")]
    MalformedSignature,
}

/// Serialize `message` with `envelope.signature` cleared.
fn canonical_bytes<T: Serialize>(message: &T) -> Result<Vec<u8>, SignatureError> {
    let mut value = serde_json::to_value(message)?;
    if let Some(envelope) = value.get_mut("envelope")
        && let Some(obj) = envelope.as_object_mut()
    {
        obj.insert("signature".to_string(), serde_json::Value::String(String::new()));
    }
    Ok(serde_json::to_vec(&value)?)
}

/// Compute the hex-encoded HMAC-SHA256 over the canonical message bytes.
pub fn compute_signature<T: Serialize>(message: &T, secret: &[u8]) -> Result<String, SignatureError> {
    let bytes = canonical_bytes(message)?;
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| SignatureError::InvalidKey)?;
    mac.update(&bytes);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a hex-encoded signature against the canonical message bytes.
///
/// The comparison is constant-time. Returns `Ok(false)` for a wrong (but
/// well-formed) signature and `Err` for malformed input.
pub fn verify_signature<T: Serialize>(
    message: &T,
    signature: &str,
    secret: &[u8],
) -> Result<bool, SignatureError> {
    let expected = compute_signature(message, secret)?;
    let expected_bytes = hex::decode(&expected).map_err(|_| SignatureError::MalformedSignature)?;
    let provided_bytes = hex::decode(signature).map_err(|_| SignatureError::MalformedSignature)?;
    if provided_bytes.len() != expected_bytes.len() {
        return Ok(false);
    }
    Ok(expected_bytes.ct_eq(&provided_bytes).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Envelope, SourceType};
    use serde::Deserialize;

    #[derive(Serialize, Deserialize)]
    struct Sample {
        envelope: Envelope,
        payload: String,
    }

    fn sample() -> Sample {
        Sample {
            envelope: Envelope::root("sensor-1", SourceType::Sensor),
            payload: "hello".into(),
        }
    }

    #[test]
    fn sign_and_verify() {
        let mut msg = sample();
        let sig = compute_signature(&msg, b"secret").unwrap();
        msg.envelope.signature = sig.clone();
        // The signature field itself is excluded from the MAC input.
        assert!(verify_signature(&msg, &sig, b"secret").unwrap());
    }

    #[test]
    fn wrong_key_rejected() {
        let msg = sample();
        let sig = compute_signature(&msg, b"secret").unwrap();
        assert!(!verify_signature(&msg, &sig, b"other").unwrap());
    }

    #[test]
    fn tampered_body_rejected() {
        let mut msg = sample();
        let sig = compute_signature(&msg, b"secret").unwrap();
        msg.payload = "tampered".into();
        assert!(!verify_signature(&msg, &sig, b"secret").unwrap());
    }

    #[test]
    fn malformed_hex_is_an_error() {
        let msg = sample();
        assert!(matches!(
            verify_signature(&msg, "not-hex!", b"secret"),
            Err(SignatureError::MalformedSignature)
        ));
    }

    #[test]
    fn truncated_signature_rejected() {
        let msg = sample();
        let sig = compute_signature(&msg, b"secret").unwrap();
        assert!(!verify_signature(&msg, &sig[..32], b"secret").unwrap());
    }
}
