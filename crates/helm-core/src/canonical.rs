//! RFC 8785 (JCS) canonical JSON and SHA-256 hashing.
//!
//! Every hashed or signed surface in HELM is the JCS form of the artifact:
//! lexicographically sorted keys, no insignificant whitespace, no HTML
//! escaping, integral numbers rendered without fraction. The signed surface
//! of an artifact is its JCS form with the signature field removed.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::HelmError;

/// Serialize any value to its JCS canonical byte form.
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>, HelmError> {
    serde_jcs::to_vec(value).map_err(|e| HelmError::Canonicalization(e.to_string()))
}

/// SHA-256 of arbitrary bytes → 32-byte array.
pub fn sha256_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 of arbitrary bytes → lowercase hex string.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256_bytes(data))
}

/// Canonical hash of a serializable value: SHA-256 over its JCS form.
pub fn canonical_hash<T: Serialize>(value: &T) -> Result<[u8; 32], HelmError> {
    Ok(sha256_bytes(&to_canonical_json(value)?))
}

/// Canonical hash rendered as hex.
pub fn canonical_hash_hex<T: Serialize>(value: &T) -> Result<String, HelmError> {
    Ok(hex::encode(canonical_hash(value)?))
}

/// Wire-format content address: `sha256:` + hex digest.
pub fn content_address(data: &[u8]) -> String {
    format!("sha256:{}", sha256_hex(data))
}

/// The signed surface of an artifact: JCS form with the named signature
/// field removed. Signing and verification must both run over this.
pub fn signed_surface<T: Serialize>(artifact: &T, sig_field: &str) -> Result<Vec<u8>, HelmError> {
    let mut value = serde_json::to_value(artifact)
        .map_err(|e| HelmError::Serialization(e.to_string()))?;
    if let Value::Object(map) = &mut value {
        map.remove(sig_field);
    }
    to_canonical_json(&value)
}
