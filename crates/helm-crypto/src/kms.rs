use hkdf::Hkdf;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use zeroize::Zeroizing;

use helm_core::{HelmError, TenantId, HKDF_TENANT_SALT};

use crate::keypair::KeyPair;
use crate::provider::LocalKeyProvider;

/// Key management service: one Ed25519 master key, deterministic per-tenant
/// derivation, and a provider cache.
///
/// Derivation: `seed = HKDF-SHA256(ikm = master_seed, salt = "helm-tenant-kdf",
/// info = tenant_id)`, then the tenant key is Ed25519 from that seed. The
/// same tenant id always derives the same key; the cache is invalidated only
/// by master key rotation.
pub struct Kms {
    master: Mutex<KeyPair>,
    cache: Mutex<HashMap<TenantId, Arc<LocalKeyProvider>>>,
}

impl Kms {
    pub fn new(master: KeyPair) -> Self {
        Self {
            master: Mutex::new(master),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Derive (or fetch from cache) the signing provider for a tenant.
    pub fn derive(&self, tenant: &TenantId) -> Result<Arc<LocalKeyProvider>, HelmError> {
        if tenant.is_empty() {
            return Err(HelmError::EmptyTenantId);
        }
        {
            let cache = self.cache.lock().expect("kms cache lock poisoned");
            if let Some(provider) = cache.get(tenant) {
                return Ok(Arc::clone(provider));
            }
        }

        let seed = {
            let master = self.master.lock().expect("kms master lock poisoned");
            derive_tenant_seed(master.seed_bytes(), tenant)
        };
        let provider = Arc::new(LocalKeyProvider::new(KeyPair::from_seed(*seed)));

        let mut cache = self.cache.lock().expect("kms cache lock poisoned");
        Ok(Arc::clone(cache.entry(tenant.clone()).or_insert(provider)))
    }

    /// Public key of the master signer, for verifying kernel-level artifacts.
    pub fn master_public_key_hex(&self) -> String {
        let master = self.master.lock().expect("kms master lock poisoned");
        master.public_key_hex()
    }

    /// Sign with the master key (kernel-level artifacts only; tenant
    /// artifacts are signed by derived providers).
    pub fn master_sign_hex(&self, message: &[u8]) -> String {
        let master = self.master.lock().expect("kms master lock poisoned");
        master.sign_hex(message)
    }

    /// Replace the master key. Every cached tenant provider is invalidated;
    /// subsequent derivations use the new master.
    pub fn rotate_master(&self, new_master: KeyPair) {
        let mut master = self.master.lock().expect("kms master lock poisoned");
        let mut cache = self.cache.lock().expect("kms cache lock poisoned");
        *master = new_master;
        cache.clear();
    }
}

fn derive_tenant_seed(master_seed: &[u8; 32], tenant: &TenantId) -> Zeroizing<[u8; 32]> {
    let hk = Hkdf::<Sha256>::new(Some(HKDF_TENANT_SALT), master_seed);
    let mut okm = Zeroizing::new([0u8; 32]);
    hk.expand(tenant.as_str().as_bytes(), okm.as_mut())
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    okm
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::KeyProvider;
    use crate::sign::verify_hex;

    fn kms() -> Kms {
        Kms::new(KeyPair::from_seed([42u8; 32]))
    }

    #[test]
    fn same_tenant_same_key() {
        let kms = kms();
        let a = kms.derive(&TenantId::new("alpha")).unwrap();
        let b = kms.derive(&TenantId::new("alpha")).unwrap();
        assert_eq!(a.public_key_hex(), b.public_key_hex());
        assert_eq!(a.sign_hex(b"m"), b.sign_hex(b"m"));
    }

    #[test]
    fn distinct_tenants_distinct_keys() {
        let kms = kms();
        let a = kms.derive(&TenantId::new("alpha")).unwrap();
        let b = kms.derive(&TenantId::new("beta")).unwrap();
        assert_ne!(a.public_key_hex(), b.public_key_hex());
        assert_ne!(a.public_key_hex(), kms.master_public_key_hex());
    }

    #[test]
    fn cross_tenant_signatures_do_not_verify() {
        let kms = kms();
        let alpha = kms.derive(&TenantId::new("alpha")).unwrap();
        let beta = kms.derive(&TenantId::new("beta")).unwrap();
        let sig = alpha.sign_hex(b"m");
        assert_ne!(sig, beta.sign_hex(b"m"));
        assert!(verify_hex(&alpha.public_key_hex(), b"m", &sig).is_ok());
        assert!(verify_hex(&beta.public_key_hex(), b"m", &sig).is_err());
    }

    #[test]
    fn empty_tenant_rejected() {
        let kms = kms();
        assert!(matches!(
            kms.derive(&TenantId::new("")),
            Err(HelmError::EmptyTenantId)
        ));
    }

    #[test]
    fn rotation_invalidates_cache() {
        let kms = kms();
        let before = kms.derive(&TenantId::new("alpha")).unwrap().public_key_hex();
        kms.rotate_master(KeyPair::from_seed([43u8; 32]));
        let after = kms.derive(&TenantId::new("alpha")).unwrap().public_key_hex();
        assert_ne!(before, after);
    }
}
