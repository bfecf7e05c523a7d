use ed25519_dalek::{Signature, VerifyingKey};

use crate::keypair::KeyPair;

/// Signing backend seam. One trait, one implementation per backend,
/// composed at construction. Implementations own their private key bytes
/// and never expose them.
pub trait KeyProvider: Send + Sync {
    fn key_id(&self) -> &str;
    fn public_key(&self) -> VerifyingKey;
    fn sign(&self, message: &[u8]) -> Signature;

    fn public_key_hex(&self) -> String {
        hex::encode(self.public_key().as_bytes())
    }

    fn sign_hex(&self, message: &[u8]) -> String {
        hex::encode(self.sign(message).to_bytes())
    }
}

/// In-process provider backed by a local keypair. Tenant providers handed
/// out by the KMS are of this type.
pub struct LocalKeyProvider {
    keypair: KeyPair,
}

impl LocalKeyProvider {
    pub fn new(keypair: KeyPair) -> Self {
        Self { keypair }
    }
}

impl KeyProvider for LocalKeyProvider {
    fn key_id(&self) -> &str {
        &self.keypair.key_id
    }

    fn public_key(&self) -> VerifyingKey {
        self.keypair.public_key()
    }

    fn sign(&self, message: &[u8]) -> Signature {
        self.keypair.sign(message)
    }
}
