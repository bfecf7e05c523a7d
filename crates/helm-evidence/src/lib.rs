//! Evidence contract engine.
//!
//! Holds a versioned manifest of per-action-class required-evidence specs
//! and checks submissions against them in the before and after phases.
//! `when = both` demands independent satisfaction in each phase; a clean
//! before-check never short-circuits the after-check.

use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::debug;

use helm_core::{
    EvidenceContract, EvidenceContractManifest, EvidencePhase, EvidenceSubmission,
    EvidenceVerdict, HelmError,
};

pub struct EvidenceEngine {
    manifest: Mutex<EvidenceContractManifest>,
}

impl EvidenceEngine {
    pub fn new(manifest: EvidenceContractManifest) -> Self {
        Self { manifest: Mutex::new(manifest) }
    }

    pub fn empty() -> Self {
        Self::new(EvidenceContractManifest::default())
    }

    /// Register or replace the contract for an action class.
    pub fn register_contract(&self, contract: EvidenceContract) {
        let mut manifest = self.manifest.lock().expect("manifest lock poisoned");
        manifest.contracts.insert(contract.action_class.clone(), contract);
        manifest.version += 1;
    }

    /// Canonical hash of the current manifest; referenced from decision
    /// traces as the evidence-policy version identifier.
    pub fn manifest_hash(&self) -> Result<String, HelmError> {
        self.manifest.lock().expect("manifest lock poisoned").manifest_hash()
    }

    /// Check one phase of one action class against the given submissions.
    ///
    /// A requirement is satisfied by at least one `verified` submission of
    /// the matching evidence type; when an issuer constraint is set the
    /// submission must carry exactly that issuer. An action class with no
    /// registered contract is satisfied vacuously.
    pub fn check(
        &self,
        action_class: &str,
        phase: EvidencePhase,
        submissions: &[EvidenceSubmission],
    ) -> EvidenceVerdict {
        let manifest = self.manifest.lock().expect("manifest lock poisoned");
        let contract = match manifest.contracts.get(action_class) {
            Some(c) => c,
            None => {
                return EvidenceVerdict {
                    action_class: action_class.to_string(),
                    phase,
                    satisfied: true,
                    missing: vec![],
                    verified: vec![],
                }
            }
        };

        // Group verified submissions by evidence type.
        let mut by_type: BTreeMap<&str, Vec<&EvidenceSubmission>> = BTreeMap::new();
        for sub in submissions.iter().filter(|s| s.verified) {
            by_type.entry(sub.evidence_type.as_str()).or_default().push(sub);
        }

        let mut missing = Vec::new();
        let mut verified = Vec::new();

        for requirement in contract
            .requirements
            .iter()
            .filter(|r| r.required && r.when.applies_to(phase))
        {
            let matched = by_type
                .get(requirement.evidence_type.as_str())
                .and_then(|subs| {
                    subs.iter().find(|s| match &requirement.issuer_constraint {
                        Some(issuer) => &s.issuer_id == issuer,
                        None => true,
                    })
                });
            match matched {
                Some(sub) => verified.push(sub.submission_id.clone()),
                None => missing.push(requirement.evidence_type.clone()),
            }
        }

        // Canonical report: the verdict is identical no matter how the
        // contract's requirements were ordered.
        missing.sort();
        missing.dedup();
        verified.sort();
        verified.dedup();

        let satisfied = missing.is_empty();
        debug!(action_class, ?phase, satisfied, missing = missing.len(), "evidence check");
        EvidenceVerdict {
            action_class: action_class.to_string(),
            phase,
            satisfied,
            missing,
            verified,
        }
    }
}
