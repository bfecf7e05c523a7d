//! Evidence contract wire types. The checking engine lives in
//! `helm-evidence`; these shapes are shared because contracts and
//! submissions are persisted artifacts and appear in decision traces.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::canonical::canonical_hash_hex;
use crate::error::HelmError;
use crate::types::Timestamp;

/// Check phase a caller runs: before minting an intent, or after the
/// external effect completed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidencePhase {
    Before,
    After,
}

/// When a requirement applies. `Both` means required independently in both
/// phases; a satisfied before-check never short-circuits the after-check.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceWhen {
    Before,
    After,
    Both,
}

impl EvidenceWhen {
    pub fn applies_to(self, phase: EvidencePhase) -> bool {
        match self {
            EvidenceWhen::Both => true,
            EvidenceWhen::Before => phase == EvidencePhase::Before,
            EvidenceWhen::After => phase == EvidencePhase::After,
        }
    }
}

/// One evidence demand inside a contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRequirement {
    pub evidence_type: String,
    pub when: EvidenceWhen,
    pub required: bool,
    /// When set, a matching submission must carry exactly this issuer.
    pub issuer_constraint: Option<String>,
}

/// Required-evidence spec for one action class.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceContract {
    pub contract_id: String,
    pub action_class: String,
    pub version: u32,
    pub requirements: Vec<EvidenceRequirement>,
}

/// Versioned bundle of contracts keyed by action class. Its canonical hash
/// is a first-class artifact referenced from decision traces.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EvidenceContractManifest {
    pub version: u32,
    pub contracts: BTreeMap<String, EvidenceContract>,
}

impl EvidenceContractManifest {
    /// Canonical manifest hash, invariant under requirement reordering:
    /// requirements are sorted before hashing so two manifests with the
    /// same requirements in different order hash identically.
    pub fn manifest_hash(&self) -> Result<String, HelmError> {
        let mut normalized = self.clone();
        for contract in normalized.contracts.values_mut() {
            contract.requirements.sort_by(|a, b| {
                (&a.evidence_type, a.when, &a.issuer_constraint)
                    .cmp(&(&b.evidence_type, b.when, &b.issuer_constraint))
            });
        }
        canonical_hash_hex(&normalized)
    }
}

/// A piece of evidence submitted against a contract. Only `verified=true`
/// submissions count toward satisfaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceSubmission {
    pub submission_id: String,
    pub contract_id: String,
    pub action_class: String,
    pub evidence_type: String,
    pub content_hash: String,
    pub issuer_id: String,
    pub submitted_at: Timestamp,
    pub verified: bool,
}

/// Outcome of a phase check.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceVerdict {
    pub action_class: String,
    pub phase: EvidencePhase,
    pub satisfied: bool,
    /// Evidence types still missing a verified submission.
    pub missing: Vec<String>,
    /// Submission ids that satisfied a requirement.
    pub verified: Vec<String>,
}
