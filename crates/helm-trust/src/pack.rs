//! Pack admission: target lookup, delegation, transparency-log inclusion,
//! monotonic versions, publisher key status, receipt chaining, revocation.
//!
//! Every stage is fail-closed. Revocation is monotonic: once a pack name
//! is revoked it cannot be reinstalled through any ordinary path.

use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use tracing::{info, warn};

use helm_core::{canonical_hash_hex, sha256_hex, to_canonical_json, HelmError, Timestamp};

use crate::metadata::{verify_threshold, MetadataSignature, RoleKeys, VerifiedMetadata};
use crate::translog::{verify_inclusion, InclusionProof, SignedTreeHead};

/// A versioned, signed unit of tool capability.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PackRef {
    pub name: String,
    pub version: Version,
    /// Hex SHA-256 of the pack contents.
    pub hash: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublisherKeyStatus {
    Active,
    Expired,
    Revoked,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PublisherKey {
    pub key_id: String,
    pub status: PublisherKeyStatus,
}

/// Threshold-signed permission to install a version lower than the one
/// currently installed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RollbackOverride {
    pub pack: String,
    pub to_version: Version,
    pub signatures: Vec<MetadataSignature>,
}

impl RollbackOverride {
    pub fn signing_bytes(&self) -> Result<Vec<u8>, HelmError> {
        #[derive(Serialize)]
        struct Surface<'a> {
            pack: &'a str,
            to_version: &'a Version,
        }
        to_canonical_json(&Surface { pack: &self.pack, to_version: &self.to_version })
    }
}

/// Threshold-signed permission to install despite a revoked publisher key
/// (quarantined-but-released packs).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuarantineOverride {
    pub pack: String,
    pub key_id: String,
    pub signatures: Vec<MetadataSignature>,
}

impl QuarantineOverride {
    pub fn signing_bytes(&self) -> Result<Vec<u8>, HelmError> {
        #[derive(Serialize)]
        struct Surface<'a> {
            pack: &'a str,
            key_id: &'a str,
        }
        to_canonical_json(&Surface { pack: &self.pack, key_id: &self.key_id })
    }
}

/// Hash-chained per-pack install record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InstallReceipt {
    pub receipt_id: String,
    pub pack_name: String,
    pub version: Version,
    pub pack_hash: String,
    pub installed_at: Timestamp,
    /// Receipt id of the previous install of this pack name.
    pub previous_receipt_id: Option<String>,
    pub content_hash: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpgradeReceipt {
    pub receipt_id: String,
    pub pack_name: String,
    pub from_version: Version,
    pub to_version: Version,
    pub upgraded_at: Timestamp,
}

/// Everything a caller presents to install one pack.
pub struct PackCandidate<'a> {
    pub pack: PackRef,
    pub pack_bytes: &'a [u8],
    pub certified: bool,
    pub publisher_key: PublisherKey,
    pub inclusion: Option<(InclusionProof, SignedTreeHead)>,
    pub rollback_override: Option<RollbackOverride>,
    pub quarantine_override: Option<QuarantineOverride>,
}

struct InstalledPack {
    version: Version,
    last_receipt_id: String,
}

struct LoaderInner {
    installed: HashMap<String, InstalledPack>,
    receipts: Vec<InstallReceipt>,
    upgrades: Vec<UpgradeReceipt>,
    revoked: BTreeSet<String>,
    trusted_tree_size: u64,
    seq: u64,
}

/// Stateful pack loader. Metadata refresh happens upstream in
/// `TufVerifier`; the loader consumes its `VerifiedMetadata`.
pub struct PackLoader {
    override_keys: RoleKeys,
    log_public_key: Option<String>,
    inner: Mutex<LoaderInner>,
}

impl PackLoader {
    pub fn new(override_keys: RoleKeys, log_public_key: Option<String>) -> Self {
        Self {
            override_keys,
            log_public_key,
            inner: Mutex::new(LoaderInner {
                installed: HashMap::new(),
                receipts: Vec::new(),
                upgrades: Vec::new(),
                revoked: BTreeSet::new(),
                trusted_tree_size: 0,
                seq: 0,
            }),
        }
    }

    /// Reject installs below the currently installed version. Equal is a
    /// reinstall and allowed; lower requires a valid rollback override.
    pub fn enforce_monotonic_version(
        &self,
        name: &str,
        new_version: &Version,
        rollback: Option<&RollbackOverride>,
    ) -> Result<(), HelmError> {
        let inner = self.inner.lock().expect("pack loader lock poisoned");
        let Some(current) = inner.installed.get(name) else {
            return Ok(());
        };
        if *new_version >= current.version {
            return Ok(());
        }
        if let Some(ov) = rollback {
            if ov.pack == name && ov.to_version == *new_version {
                verify_threshold(&ov.signing_bytes()?, &ov.signatures, &self.override_keys)?;
                warn!(pack = name, to = %new_version, "rollback override accepted");
                return Ok(());
            }
        }
        Err(HelmError::VersionRollback {
            installed: current.version.to_string(),
            got: new_version.to_string(),
        })
    }

    fn check_publisher_key(
        &self,
        pack: &str,
        key: &PublisherKey,
        quarantine: Option<&QuarantineOverride>,
    ) -> Result<(), HelmError> {
        match key.status {
            PublisherKeyStatus::Active => Ok(()),
            PublisherKeyStatus::Expired => Err(HelmError::PublisherKeyRejected {
                key_id: key.key_id.clone(),
                status: "EXPIRED",
            }),
            PublisherKeyStatus::Revoked => {
                if let Some(ov) = quarantine {
                    if ov.pack == pack && ov.key_id == key.key_id {
                        verify_threshold(&ov.signing_bytes()?, &ov.signatures, &self.override_keys)?;
                        warn!(pack, key_id = %key.key_id, "quarantine override accepted for revoked key");
                        return Ok(());
                    }
                }
                Err(HelmError::PublisherKeyRejected {
                    key_id: key.key_id.clone(),
                    status: "REVOKED",
                })
            }
        }
    }

    /// Run the full admission pipeline and mint a chained install receipt.
    pub fn install(
        &self,
        metadata: &VerifiedMetadata,
        candidate: PackCandidate<'_>,
        now: Timestamp,
    ) -> Result<InstallReceipt, HelmError> {
        let name = candidate.pack.name.clone();

        // ── Revocation is checked before anything else ───────────────────────
        {
            let inner = self.inner.lock().expect("pack loader lock poisoned");
            if inner.revoked.contains(&name) {
                return Err(HelmError::PackRevoked(name));
            }
        }

        // ── Target lookup ────────────────────────────────────────────────────
        let expected = metadata
            .target_hash(&name)
            .ok_or_else(|| HelmError::TargetMismatch(name.clone()))?;
        if expected != candidate.pack.hash || sha256_hex(candidate.pack_bytes) != candidate.pack.hash {
            return Err(HelmError::TargetMismatch(name));
        }

        // ── Delegation for certified packs ───────────────────────────────────
        if candidate.certified {
            let delegated = metadata.delegations.iter().any(|d| d.matches(&name));
            if !delegated {
                return Err(HelmError::DelegationMismatch { pack: name });
            }
        }

        // ── Transparency-log inclusion ───────────────────────────────────────
        match (&candidate.inclusion, candidate.certified) {
            (Some((proof, head)), _) => {
                if let Some(log_key) = &self.log_public_key {
                    head.verify(log_key)?;
                }
                let trusted = self.inner.lock().expect("pack loader lock poisoned").trusted_tree_size;
                verify_inclusion(candidate.pack_bytes, proof, head, trusted)?;
                let mut inner = self.inner.lock().expect("pack loader lock poisoned");
                inner.trusted_tree_size = head.tree_size;
            }
            (None, true) => {
                return Err(HelmError::InclusionProofInvalid(
                    "certified pack requires an inclusion proof".into(),
                ));
            }
            (None, false) => {}
        }

        // ── Monotonic version ────────────────────────────────────────────────
        self.enforce_monotonic_version(
            &name,
            &candidate.pack.version,
            candidate.rollback_override.as_ref(),
        )?;

        // ── Publisher key status ─────────────────────────────────────────────
        self.check_publisher_key(
            &name,
            &candidate.publisher_key,
            candidate.quarantine_override.as_ref(),
        )?;

        // ── Mint receipts ────────────────────────────────────────────────────
        let mut inner = self.inner.lock().expect("pack loader lock poisoned");
        inner.seq += 1;
        let receipt_id = format!("install-{}", inner.seq);
        let previous = inner.installed.get(&name).map(|p| p.last_receipt_id.clone());
        let from_version = inner.installed.get(&name).map(|p| p.version.clone());

        let mut receipt = InstallReceipt {
            receipt_id: receipt_id.clone(),
            pack_name: name.clone(),
            version: candidate.pack.version.clone(),
            pack_hash: candidate.pack.hash.clone(),
            installed_at: now,
            previous_receipt_id: previous,
            content_hash: String::new(),
        };
        receipt.content_hash = {
            let mut unsealed = receipt.clone();
            unsealed.content_hash = String::new();
            canonical_hash_hex(&unsealed)?
        };

        if let Some(from) = from_version {
            if from != candidate.pack.version {
                inner.seq += 1;
                let upgrade = UpgradeReceipt {
                    receipt_id: format!("upgrade-{}", inner.seq),
                    pack_name: name.clone(),
                    from_version: from,
                    to_version: candidate.pack.version.clone(),
                    upgraded_at: now,
                };
                inner.upgrades.push(upgrade);
            }
        }

        inner.installed.insert(
            name.clone(),
            InstalledPack {
                version: candidate.pack.version.clone(),
                last_receipt_id: receipt_id,
            },
        );
        inner.receipts.push(receipt.clone());
        info!(pack = %name, version = %candidate.pack.version, "pack installed");
        Ok(receipt)
    }

    /// Monotonic revocation. There is no unrevoke.
    pub fn revoke(&self, name: &str) {
        let mut inner = self.inner.lock().expect("pack loader lock poisoned");
        inner.revoked.insert(name.to_string());
        warn!(pack = name, "pack revoked");
    }

    /// 0 for revoked or unknown packs, 100 for installed trusted packs.
    pub fn trust_score(&self, name: &str) -> u8 {
        let inner = self.inner.lock().expect("pack loader lock poisoned");
        if inner.revoked.contains(name) {
            return 0;
        }
        if inner.installed.contains_key(name) {
            100
        } else {
            0
        }
    }

    pub fn installed_version(&self, name: &str) -> Option<Version> {
        let inner = self.inner.lock().expect("pack loader lock poisoned");
        inner.installed.get(name).map(|p| p.version.clone())
    }

    /// Install receipts for one pack, oldest first.
    pub fn receipts_for(&self, name: &str) -> Vec<InstallReceipt> {
        let inner = self.inner.lock().expect("pack loader lock poisoned");
        inner
            .receipts
            .iter()
            .filter(|r| r.pack_name == name)
            .cloned()
            .collect()
    }

    pub fn upgrades_for(&self, name: &str) -> Vec<UpgradeReceipt> {
        let inner = self.inner.lock().expect("pack loader lock poisoned");
        inner
            .upgrades
            .iter()
            .filter(|r| r.pack_name == name)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Delegation;
    use std::collections::BTreeMap;

    fn loader() -> PackLoader {
        PackLoader::new(RoleKeys { keys: BTreeMap::new(), threshold: 1 }, None)
    }

    fn metadata_for(bytes: &[u8], name: &str) -> VerifiedMetadata {
        let mut targets = BTreeMap::new();
        targets.insert(name.to_string(), sha256_hex(bytes));
        VerifiedMetadata {
            targets,
            delegations: vec![Delegation { role_name: "certified".into(), path_patterns: vec!["tools/*".into()] }],
        }
    }

    fn candidate<'a>(bytes: &'a [u8], name: &str, version: &str) -> PackCandidate<'a> {
        PackCandidate {
            pack: PackRef {
                name: name.into(),
                version: Version::parse(version).unwrap(),
                hash: sha256_hex(bytes),
            },
            pack_bytes: bytes,
            certified: false,
            publisher_key: PublisherKey { key_id: "pub-1".into(), status: PublisherKeyStatus::Active },
            inclusion: None,
            rollback_override: None,
            quarantine_override: None,
        }
    }

    #[test]
    fn install_then_upgrade_chains_receipts() {
        let loader = loader();
        let bytes = b"pack-contents-v1";
        let md = metadata_for(bytes, "tools/sendmail");
        let r1 = loader.install(&md, candidate(bytes, "tools/sendmail", "1.0.0"), 10).unwrap();
        assert!(r1.previous_receipt_id.is_none());

        let r2 = loader.install(&md, candidate(bytes, "tools/sendmail", "2.0.0"), 20).unwrap();
        assert_eq!(r2.previous_receipt_id.as_deref(), Some(r1.receipt_id.as_str()));
        assert_eq!(loader.upgrades_for("tools/sendmail").len(), 1);
        assert_eq!(loader.installed_version("tools/sendmail"), Some(Version::parse("2.0.0").unwrap()));
    }

    #[test]
    fn version_rollback_rejected_with_rollback_in_message() {
        let loader = loader();
        let bytes = b"pack";
        let md = metadata_for(bytes, "tools/sendmail");
        loader.install(&md, candidate(bytes, "tools/sendmail", "1.0.0"), 10).unwrap();

        let err = loader
            .enforce_monotonic_version("tools/sendmail", &Version::parse("0.9.0").unwrap(), None)
            .unwrap_err();
        assert!(err.to_string().contains("rollback"));

        // Equal (reinstall) and greater both pass.
        assert!(loader
            .enforce_monotonic_version("tools/sendmail", &Version::parse("1.0.0").unwrap(), None)
            .is_ok());
        assert!(loader
            .enforce_monotonic_version("tools/sendmail", &Version::parse("2.0.0").unwrap(), None)
            .is_ok());
    }

    #[test]
    fn revocation_is_monotonic() {
        let loader = loader();
        let bytes = b"pack";
        let md = metadata_for(bytes, "tools/sendmail");
        loader.install(&md, candidate(bytes, "tools/sendmail", "1.0.0"), 10).unwrap();
        loader.revoke("tools/sendmail");

        assert!(matches!(
            loader.install(&md, candidate(bytes, "tools/sendmail", "1.1.0"), 20),
            Err(HelmError::PackRevoked(_))
        ));
        assert_eq!(loader.trust_score("tools/sendmail"), 0);
    }

    #[test]
    fn target_mismatch_rejected() {
        let loader = loader();
        let bytes = b"pack";
        let md = metadata_for(b"different-contents", "tools/sendmail");
        assert!(matches!(
            loader.install(&md, candidate(bytes, "tools/sendmail", "1.0.0"), 10),
            Err(HelmError::TargetMismatch(_))
        ));
    }

    #[test]
    fn certified_pack_requires_delegation_and_inclusion() {
        let loader = loader();
        let bytes = b"pack";
        let mut md = metadata_for(bytes, "other/pack");
        md.targets.insert("other/pack".into(), sha256_hex(bytes));

        let mut cand = candidate(bytes, "other/pack", "1.0.0");
        cand.certified = true;
        assert!(matches!(
            loader.install(&md, cand, 10),
            Err(HelmError::DelegationMismatch { .. })
        ));

        // Name under the delegated path but missing the inclusion proof.
        let md = metadata_for(bytes, "tools/sendmail");
        let mut cand = candidate(bytes, "tools/sendmail", "1.0.0");
        cand.certified = true;
        assert!(matches!(
            loader.install(&md, cand, 10),
            Err(HelmError::InclusionProofInvalid(_))
        ));
    }

    fn override_signer() -> helm_crypto::LocalKeyProvider {
        helm_crypto::LocalKeyProvider::new(helm_crypto::KeyPair::from_seed([3u8; 32]))
    }

    fn loader_with_overrides() -> PackLoader {
        use helm_crypto::KeyProvider;
        let signer = override_signer();
        let keys = RoleKeys {
            keys: [(signer.key_id().to_string(), signer.public_key_hex())]
                .into_iter()
                .collect(),
            threshold: 1,
        };
        PackLoader::new(keys, None)
    }

    #[test]
    fn rollback_override_admits_downgrade() {
        use helm_crypto::KeyProvider;
        let loader = loader_with_overrides();
        let bytes = b"pack";
        let md = metadata_for(bytes, "tools/sendmail");
        loader.install(&md, candidate(bytes, "tools/sendmail", "2.0.0"), 10).unwrap();

        let signer = override_signer();
        let mut ov = RollbackOverride {
            pack: "tools/sendmail".into(),
            to_version: Version::parse("1.0.0").unwrap(),
            signatures: vec![],
        };
        let surface = ov.signing_bytes().unwrap();
        ov.signatures.push(MetadataSignature {
            key_id: signer.key_id().to_string(),
            sig: signer.sign_hex(&surface),
        });

        let mut cand = candidate(bytes, "tools/sendmail", "1.0.0");
        cand.rollback_override = Some(ov);
        let receipt = loader.install(&md, cand, 20).unwrap();
        assert_eq!(receipt.version, Version::parse("1.0.0").unwrap());

        // An unsigned override is worthless.
        let mut cand = candidate(bytes, "tools/sendmail", "0.5.0");
        cand.rollback_override = Some(RollbackOverride {
            pack: "tools/sendmail".into(),
            to_version: Version::parse("0.5.0").unwrap(),
            signatures: vec![],
        });
        assert!(loader.install(&md, cand, 30).is_err());
    }

    #[test]
    fn quarantine_override_admits_revoked_publisher_key() {
        use helm_crypto::KeyProvider;
        let loader = loader_with_overrides();
        let bytes = b"pack";
        let md = metadata_for(bytes, "tools/sendmail");

        let mut cand = candidate(bytes, "tools/sendmail", "1.0.0");
        cand.publisher_key.status = PublisherKeyStatus::Revoked;
        assert!(matches!(
            loader.install(&md, cand, 10),
            Err(HelmError::PublisherKeyRejected { status: "REVOKED", .. })
        ));

        let signer = override_signer();
        let mut ov = QuarantineOverride {
            pack: "tools/sendmail".into(),
            key_id: "pub-1".into(),
            signatures: vec![],
        };
        let surface = ov.signing_bytes().unwrap();
        ov.signatures.push(MetadataSignature {
            key_id: signer.key_id().to_string(),
            sig: signer.sign_hex(&surface),
        });

        let mut cand = candidate(bytes, "tools/sendmail", "1.0.0");
        cand.publisher_key.status = PublisherKeyStatus::Revoked;
        cand.quarantine_override = Some(ov);
        assert!(loader.install(&md, cand, 20).is_ok());
    }

    #[test]
    fn certified_install_with_inclusion_proof() {
        use crate::translog::{leaf_hash, node_hash, InclusionProof, SignedTreeHead};
        let loader = loader();
        let bytes = b"certified-pack";
        let md = metadata_for(bytes, "tools/sendmail");

        // Two-leaf log: our pack plus one sibling entry.
        let sibling = leaf_hash(b"other-entry");
        let root = node_hash(&leaf_hash(bytes), &sibling);
        let proof = InclusionProof {
            leaf_index: 0,
            tree_size: 2,
            path: vec![hex::encode(sibling)],
        };
        let head = SignedTreeHead {
            tree_size: 2,
            root_hash: hex::encode(root),
            signature: String::new(),
        };

        let mut cand = candidate(bytes, "tools/sendmail", "1.0.0");
        cand.certified = true;
        cand.inclusion = Some((proof, head));
        let receipt = loader.install(&md, cand, 10).unwrap();
        assert_eq!(receipt.pack_name, "tools/sendmail");

        // A later head with fewer entries is a log rollback.
        let proof = InclusionProof { leaf_index: 0, tree_size: 1, path: vec![] };
        let head = SignedTreeHead {
            tree_size: 1,
            root_hash: hex::encode(leaf_hash(bytes)),
            signature: String::new(),
        };
        let mut cand = candidate(bytes, "tools/sendmail", "1.1.0");
        cand.certified = true;
        cand.inclusion = Some((proof, head));
        assert!(matches!(
            loader.install(&md, cand, 20),
            Err(HelmError::TreeSizeRegression { trusted: 2, got: 1 })
        ));
    }

    #[test]
    fn expired_publisher_key_always_rejected() {
        let loader = loader();
        let bytes = b"pack";
        let md = metadata_for(bytes, "tools/sendmail");
        let mut cand = candidate(bytes, "tools/sendmail", "1.0.0");
        cand.publisher_key.status = PublisherKeyStatus::Expired;
        assert!(matches!(
            loader.install(&md, cand, 10),
            Err(HelmError::PublisherKeyRejected { status: "EXPIRED", .. })
        ));
    }
}
