//! Envelope signing
//!
//! The controller computes HMAC-SHA1 over `JSON.stringify` of the message with
//! the `signature` key absent. `serde_json` with `preserve_order` produces the
//! same bytes for the same key order, so both sides agree as long as the order
//! is never touched between receiving and re-serializing.

use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::{Map, Value};
use sha1::Sha1;
use subtle::ConstantTimeEq;

use crate::ProtocolError;

type HmacSha1 = Hmac<Sha1>;

/// Name of the envelope field holding the signature
pub const SIGNATURE_FIELD: &str = "signature";

/// Sign the canonical JSON form of `unsigned`, returning lowercase hex.
pub fn sign<T: Serialize + ?Sized>(secret: &str, unsigned: &T) -> Result<String, ProtocolError> {
    let canonical = serde_json::to_string(unsigned)?;
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes())
        .map_err(|e| ProtocolError::InvalidKey(e.to_string()))?;
    mac.update(canonical.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a received message object.
///
/// The signature is removed with `shift_remove` so the remaining keys keep the
/// order they arrived in. A message without a string signature never verifies.
pub fn verify(secret: &str, message: &Map<String, Value>) -> bool {
    let Some(Value::String(supplied)) = message.get(SIGNATURE_FIELD) else {
        return false;
    };

    let mut unsigned = message.clone();
    unsigned.shift_remove(SIGNATURE_FIELD);

    match sign(secret, &unsigned) {
        Ok(expected) => expected.as_bytes().ct_eq(supplied.as_bytes()).into(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn test_sign_is_hex_sha1_length() {
        let signature = sign("secret", &json!({"type": "heartbeat"})).unwrap();
        assert_eq!(signature.len(), 40);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_sign_matches_known_hmac_sha1() {
        // HMAC-SHA1("key", "The quick brown fox jumps over the lazy dog")
        let mut mac = HmacSha1::new_from_slice(b"key").unwrap();
        mac.update(b"The quick brown fox jumps over the lazy dog");
        assert_eq!(
            hex::encode(mac.finalize().into_bytes()),
            "de7c9b85b8b78aa6bc8a7a36f70a90701c9db4d9"
        );
    }

    #[test]
    fn test_verify_accepts_matching_signature() {
        let mut message = object(json!({"type": "result", "params": {"result": "REG_OK"}, "id": 7}));
        let signature = sign("s3cret", &message).unwrap();
        message.insert(SIGNATURE_FIELD.to_string(), Value::String(signature));
        assert!(verify("s3cret", &message));
    }

    #[test]
    fn test_verify_rejects_wrong_secret() {
        let mut message = object(json!({"type": "result", "id": 7}));
        let signature = sign("s3cret", &message).unwrap();
        message.insert(SIGNATURE_FIELD.to_string(), Value::String(signature));
        assert!(!verify("other", &message));
    }

    #[test]
    fn test_verify_depends_on_key_order() {
        let ordered = object(json!({"a": 1, "b": 2}));
        let signature = sign("k", &ordered).unwrap();

        let mut reordered = object(json!({"b": 2, "a": 1}));
        reordered.insert(SIGNATURE_FIELD.to_string(), Value::String(signature));
        assert!(!verify("k", &reordered));
    }

    #[test]
    fn test_signature_position_does_not_matter() {
        let unsigned = object(json!({"type": "command", "id": 1}));
        let signature = sign("k", &unsigned).unwrap();

        let mut leading = Map::new();
        leading.insert(SIGNATURE_FIELD.to_string(), Value::String(signature));
        leading.extend(unsigned);
        assert!(verify("k", &leading));
    }

    #[test]
    fn test_verify_rejects_missing_or_non_string_signature() {
        let message = object(json!({"type": "shutdown"}));
        assert!(!verify("k", &message));

        let message = object(json!({"type": "shutdown", "signature": 42}));
        assert!(!verify("k", &message));
    }
}
