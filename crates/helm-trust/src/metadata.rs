//! Threshold-signed, monotonic repository metadata.
//!
//! The refresh order is fixed: timestamp freshness first, then snapshot,
//! then targets. Any expiry, version rollback, or threshold failure is
//! fail-closed; there is no partially-trusted state.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;
use tracing::{debug, warn};

use helm_core::{to_canonical_json, HelmError, Timestamp};
use helm_crypto::verify_hex;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TufRole {
    Timestamp,
    Snapshot,
    Targets,
}

impl TufRole {
    pub fn name(self) -> &'static str {
        match self {
            TufRole::Timestamp => "timestamp",
            TufRole::Snapshot => "snapshot",
            TufRole::Targets => "targets",
        }
    }
}

/// Trusted keys and signature threshold for one role.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoleKeys {
    /// key id → hex Ed25519 public key.
    pub keys: BTreeMap<String, String>,
    pub threshold: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetadataSignature {
    pub key_id: String,
    pub sig: String,
}

/// A delegated role: certified pack names must match one of its path
/// patterns (`prefix*` or exact).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Delegation {
    pub role_name: String,
    pub path_patterns: Vec<String>,
}

impl Delegation {
    pub fn matches(&self, pack_name: &str) -> bool {
        self.path_patterns.iter().any(|p| match p.strip_suffix('*') {
            Some(prefix) => pack_name.starts_with(prefix),
            None => pack_name == p,
        })
    }
}

/// Payload of the targets role.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TargetsPayload {
    /// pack name → hex SHA-256 of the pack contents.
    pub targets: BTreeMap<String, String>,
    #[serde(default)]
    pub delegations: Vec<Delegation>,
}

/// One signed metadata document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TufMetadata {
    pub role: TufRole,
    pub version: u64,
    pub expires_at: Timestamp,
    pub payload: serde_json::Value,
    pub signatures: Vec<MetadataSignature>,
}

impl TufMetadata {
    /// The threshold-signed surface: canonical form of everything except
    /// the signatures.
    pub fn signing_bytes(&self) -> Result<Vec<u8>, HelmError> {
        #[derive(Serialize)]
        struct Surface<'a> {
            role: TufRole,
            version: u64,
            expires_at: Timestamp,
            payload: &'a serde_json::Value,
        }
        to_canonical_json(&Surface {
            role: self.role,
            version: self.version,
            expires_at: self.expires_at,
            payload: &self.payload,
        })
    }
}

/// Count distinct trusted key ids with valid signatures over `message`
/// until the role threshold is reached.
pub fn verify_threshold(
    message: &[u8],
    signatures: &[MetadataSignature],
    role_keys: &RoleKeys,
) -> Result<u32, HelmError> {
    let mut valid: BTreeSet<&str> = BTreeSet::new();
    for sig in signatures {
        if valid.contains(sig.key_id.as_str()) {
            continue;
        }
        let Some(public_key) = role_keys.keys.get(&sig.key_id) else {
            continue;
        };
        if verify_hex(public_key, message, &sig.sig).is_ok() {
            valid.insert(&sig.key_id);
            if valid.len() as u32 >= role_keys.threshold {
                return Ok(valid.len() as u32);
            }
        }
    }
    Err(HelmError::ThresholdNotMet {
        need: role_keys.threshold,
        got: valid.len() as u32,
    })
}

/// The outcome of a successful refresh: the trusted targets map and
/// delegation table.
#[derive(Clone, Debug)]
pub struct VerifiedMetadata {
    pub targets: BTreeMap<String, String>,
    pub delegations: Vec<Delegation>,
}

impl VerifiedMetadata {
    pub fn target_hash(&self, pack_name: &str) -> Option<&str> {
        self.targets.get(pack_name).map(String::as_str)
    }
}

/// Stateful metadata verifier holding trusted role keys and the highest
/// version seen per role.
pub struct TufVerifier {
    role_keys: HashMap<TufRole, RoleKeys>,
    versions: Mutex<HashMap<TufRole, u64>>,
}

impl TufVerifier {
    pub fn new(role_keys: HashMap<TufRole, RoleKeys>) -> Self {
        Self {
            role_keys,
            versions: Mutex::new(HashMap::new()),
        }
    }

    /// Verify one document: expiry, threshold, monotonic version. On
    /// success the trusted version for the role advances.
    fn verify_role(&self, md: &TufMetadata, now: Timestamp) -> Result<(), HelmError> {
        if now > md.expires_at {
            warn!(role = md.role.name(), expires_at = md.expires_at, "metadata expired");
            return Err(HelmError::MetadataExpired {
                role: md.role.name(),
                expired_at: md.expires_at,
            });
        }

        let role_keys = self
            .role_keys
            .get(&md.role)
            .ok_or_else(|| HelmError::Other(format!("no trusted keys for role {}", md.role.name())))?;
        verify_threshold(&md.signing_bytes()?, &md.signatures, role_keys)?;

        let mut versions = self.versions.lock().expect("tuf versions lock poisoned");
        let installed = versions.get(&md.role).copied().unwrap_or(0);
        if md.version < installed {
            return Err(HelmError::MetadataRollback {
                role: md.role.name(),
                installed,
                got: md.version,
            });
        }
        versions.insert(md.role, md.version);
        debug!(role = md.role.name(), version = md.version, "metadata verified");
        Ok(())
    }

    /// Full refresh in the fixed order: timestamp, snapshot, targets.
    pub fn refresh(
        &self,
        timestamp: &TufMetadata,
        snapshot: &TufMetadata,
        targets: &TufMetadata,
        now: Timestamp,
    ) -> Result<VerifiedMetadata, HelmError> {
        self.verify_role(timestamp, now)?;
        self.verify_role(snapshot, now)?;
        self.verify_role(targets, now)?;

        let payload: TargetsPayload = serde_json::from_value(targets.payload.clone())
            .map_err(|e| HelmError::Serialization(e.to_string()))?;
        Ok(VerifiedMetadata {
            targets: payload.targets,
            delegations: payload.delegations,
        })
    }
}
