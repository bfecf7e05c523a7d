use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid public key bytes")]
    InvalidPublicKey,
    #[error("invalid signature length: expected {expected}, got {got}")]
    InvalidLength { expected: usize, got: usize },
}

impl From<SignatureError> for helm_core::HelmError {
    fn from(_: SignatureError) -> Self {
        helm_core::HelmError::InvalidSignature
    }
}

/// Verify a detached Ed25519 signature.
pub fn verify_detached(
    public_key: &VerifyingKey,
    message: &[u8],
    signature: &Signature,
) -> Result<(), SignatureError> {
    public_key
        .verify(message, signature)
        .map_err(|_| SignatureError::InvalidSignature)
}

/// Verify a hex-encoded signature against a hex-encoded public key, the
/// form both carried on wire artifacts and stored in the trust registry.
pub fn verify_hex(
    public_key_hex: &str,
    message: &[u8],
    signature_hex: &str,
) -> Result<(), SignatureError> {
    let pk_bytes = hex::decode(public_key_hex).map_err(|_| SignatureError::InvalidPublicKey)?;
    let pk_arr: [u8; 32] = pk_bytes
        .try_into()
        .map_err(|_| SignatureError::InvalidPublicKey)?;
    let pk = VerifyingKey::from_bytes(&pk_arr).map_err(|_| SignatureError::InvalidPublicKey)?;

    let sig_bytes = hex::decode(signature_hex)
        .map_err(|_| SignatureError::InvalidSignature)?;
    if sig_bytes.len() != 64 {
        return Err(SignatureError::InvalidLength { expected: 64, got: sig_bytes.len() });
    }
    let mut sig_arr = [0u8; 64];
    sig_arr.copy_from_slice(&sig_bytes);
    verify_detached(&pk, message, &Signature::from_bytes(&sig_arr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypair::KeyPair;

    #[test]
    fn sign_verify_round_trip() {
        let kp = KeyPair::from_seed([9u8; 32]);
        let message = b"every refusal is a first-class artifact";
        let sig = kp.sign_hex(message);
        assert!(verify_hex(&kp.public_key_hex(), message, &sig).is_ok());
    }

    #[test]
    fn tampered_message_fails() {
        let kp = KeyPair::from_seed([9u8; 32]);
        let sig = kp.sign_hex(b"original");
        assert!(verify_hex(&kp.public_key_hex(), b"tampered", &sig).is_err());
    }

    #[test]
    fn wrong_key_fails() {
        let a = KeyPair::from_seed([1u8; 32]);
        let b = KeyPair::from_seed([2u8; 32]);
        let sig = a.sign_hex(b"msg");
        assert!(verify_hex(&b.public_key_hex(), b"msg", &sig).is_err());
    }
}
