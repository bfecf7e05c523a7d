use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use helm_core::sha256_hex;

/// An Ed25519 keypair with a derived key id.
///
/// The 32-byte seed is held in a `Zeroizing` buffer to wipe memory on drop;
/// the signing key itself zeroizes on drop as well.
pub struct KeyPair {
    pub key_id: String,
    signing: SigningKey,
    seed: Zeroizing<[u8; 32]>,
}

impl KeyPair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        let signing = SigningKey::generate(&mut OsRng);
        Self::from_signing_key(signing)
    }

    /// Deterministically restore a keypair from a 32-byte seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(&seed))
    }

    fn from_signing_key(signing: SigningKey) -> Self {
        let key_id = sha256_hex(signing.verifying_key().as_bytes());
        let seed = Zeroizing::new(signing.to_bytes());
        Self { key_id, signing, seed }
    }

    /// Sign `message`, producing a 64-byte detached signature.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing.sign(message)
    }

    /// Sign `message` and render the signature as lowercase hex.
    pub fn sign_hex(&self, message: &[u8]) -> String {
        hex::encode(self.sign(message).to_bytes())
    }

    pub fn public_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key().as_bytes())
    }

    /// Seed bytes for downstream key derivation. Crate-private: only the
    /// KMS may read these, and only as HKDF input key material.
    pub(crate) fn seed_bytes(&self) -> &[u8; 32] {
        &self.seed
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair {{ key_id: {}… }}", &self.key_id[..16])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_seed_is_deterministic() {
        let a = KeyPair::from_seed([7u8; 32]);
        let b = KeyPair::from_seed([7u8; 32]);
        assert_eq!(a.public_key_hex(), b.public_key_hex());
        assert_eq!(a.sign_hex(b"msg"), b.sign_hex(b"msg"));
    }

    #[test]
    fn distinct_seeds_distinct_keys() {
        let a = KeyPair::from_seed([1u8; 32]);
        let b = KeyPair::from_seed([2u8; 32]);
        assert_ne!(a.public_key_hex(), b.public_key_hex());
    }
}
