//! Signed wire artifacts: decision records, execution intents, denial
//! receipts. The hashed surface of each is its JCS canonical form; the
//! signed surface excludes the signature field.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::canonical::to_canonical_json;
use crate::constants::DECISION_ID_NAMESPACE;
use crate::error::HelmError;
use crate::types::{Decision, DenialReason, Principal, TenantId, Timestamp};

/// Deterministic decision id: UUIDv5 over the canonical request hash.
/// Identical requests always produce identical ids.
pub fn decision_id_for_request(request_hash: &[u8; 32]) -> Uuid {
    Uuid::new_v5(&DECISION_ID_NAMESPACE, request_hash)
}

// ── DecisionTrace ────────────────────────────────────────────────────────────

/// One engine's contribution to a merged decision.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSubtrace {
    pub engine: String,
    pub decision: Decision,
    pub trace_hash: String,
}

/// Reproducibility record attached to every decision.
///
/// `rules_fired` order is significant: reordering changes
/// `evaluation_graph_hash` by construction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DecisionTrace {
    pub evaluation_graph_hash: String,
    pub rules_fired: Vec<String>,
    pub inputs_hashes: BTreeMap<String, String>,
    pub engine_subtraces: Vec<EngineSubtrace>,
}

// ── DecisionRecord ───────────────────────────────────────────────────────────

/// A signed verdict from the decision pipeline.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub id: Uuid,
    pub tenant: TenantId,
    pub decision: Decision,
    pub policy_version: String,
    pub constraints: BTreeMap<String, serde_json::Value>,
    pub trace: DecisionTrace,
    pub issued_at: Timestamp,
    pub expires_at: Option<Timestamp>,
    /// Hex-encoded detached Ed25519 signature over the signed surface.
    pub signature: Option<String>,
}

impl DecisionRecord {
    /// The bytes a tenant key signs: JCS form excluding `signature`.
    pub fn signing_bytes(&self) -> Result<Vec<u8>, HelmError> {
        crate::canonical::signed_surface(self, "signature")
    }
}

// ── ExecutionIntent ──────────────────────────────────────────────────────────

/// A signed capability grant, minted only on ALLOW. The external effector
/// presents this to execute; the kernel itself never executes anything.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionIntent {
    pub id: Uuid,
    pub tenant: TenantId,
    pub target_capability: String,
    pub payload: serde_json::Value,
    pub decision_id: Uuid,
    pub signature: Option<String>,
}

impl ExecutionIntent {
    pub fn signing_bytes(&self) -> Result<Vec<u8>, HelmError> {
        crate::canonical::signed_surface(self, "signature")
    }
}

// ── DenialReceipt ────────────────────────────────────────────────────────────

/// First-class refusal artifact. Every denial across the kernel produces
/// exactly one, retained in order by the denial ledger.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DenialReceipt {
    pub receipt_id: String,
    pub denied_at: Timestamp,
    pub principal: Principal,
    pub tenant: Option<TenantId>,
    pub action: String,
    pub reason: DenialReason,
    pub details: String,
    pub policy_ref: Option<String>,
    pub envelope_ref: Option<String>,
    pub run_id: Option<Uuid>,
    /// Hex SHA-256 over the canonical receipt excluding this field.
    pub content_hash: String,
}

impl DenialReceipt {
    /// Recompute the content hash over everything except `content_hash`.
    pub fn compute_content_hash(&self) -> Result<String, HelmError> {
        let mut value = serde_json::to_value(self)
            .map_err(|e| HelmError::Serialization(e.to_string()))?;
        if let serde_json::Value::Object(map) = &mut value {
            map.remove("content_hash");
        }
        let bytes = to_canonical_json(&value)?;
        Ok(crate::canonical::sha256_hex(&bytes))
    }

    /// Seal the receipt: set `content_hash` from the current fields.
    pub fn seal(mut self) -> Result<Self, HelmError> {
        self.content_hash = self.compute_content_hash()?;
        Ok(self)
    }

    pub fn verify_content_hash(&self) -> Result<bool, HelmError> {
        Ok(self.content_hash == self.compute_content_hash()?)
    }
}

// ── GovernResult ─────────────────────────────────────────────────────────────

/// Outcome of one governed action: the merged verdict, the minted intent on
/// ALLOW, and the hash of the attestation node receipting the outcome.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GovernResult {
    pub decision: Decision,
    pub intent: Option<ExecutionIntent>,
    pub reason_code: String,
    /// Hex hash of the ATTESTATION node appended for this outcome.
    pub node_id: String,
    pub allowed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::sha256_bytes;

    #[test]
    fn decision_id_is_deterministic() {
        let h = sha256_bytes(b"request");
        assert_eq!(decision_id_for_request(&h), decision_id_for_request(&h));
        let h2 = sha256_bytes(b"request2");
        assert_ne!(decision_id_for_request(&h), decision_id_for_request(&h2));
    }

    #[test]
    fn receipt_content_hash_detects_mutation() {
        let receipt = DenialReceipt {
            receipt_id: "denial-1".into(),
            denied_at: 1_700_000_000_000,
            principal: Principal::new("agent-7"),
            tenant: Some(TenantId::new("acme")),
            action: "fs.write".into(),
            reason: DenialReason::Budget,
            details: "daily budget exhausted".into(),
            policy_ref: None,
            envelope_ref: None,
            run_id: None,
            content_hash: String::new(),
        }
        .seal()
        .unwrap();
        assert!(receipt.verify_content_hash().unwrap());

        let mut tampered = receipt;
        tampered.details = "nothing to see".into();
        assert!(!tampered.verify_content_hash().unwrap());
    }

    #[test]
    fn signing_bytes_excludes_signature() {
        let mut record = DecisionRecord {
            id: decision_id_for_request(&sha256_bytes(b"r")),
            tenant: TenantId::new("acme"),
            decision: Decision::Allow,
            policy_version: "policy-v1".into(),
            constraints: BTreeMap::new(),
            trace: DecisionTrace::default(),
            issued_at: 1_700_000_000_000,
            expires_at: None,
            signature: None,
        };
        let unsigned = record.signing_bytes().unwrap();
        record.signature = Some("aa".repeat(64));
        assert_eq!(unsigned, record.signing_bytes().unwrap());
    }
}
