use thiserror::Error;

use crate::types::{DenialReason, Lamport};

#[derive(Debug, Error)]
pub enum HelmError {
    // ── Decision pipeline ────────────────────────────────────────────────────
    #[error("evaluation cancelled by caller")]
    Cancelled,

    #[error("policy expression rejected by deterministic profile: {issues} issue(s)")]
    ProfileViolation { issues: usize },

    #[error("policy evaluation failed: {code}")]
    Evaluation { code: &'static str, message_hash: String },

    // ── Proof graph ──────────────────────────────────────────────────────────
    #[error("unknown node: {0}")]
    UnknownNode(String),

    #[error("unknown parent node: {0}")]
    UnknownParent(String),

    #[error("node {node} fails hash validation (stored {stored}, recomputed {recomputed})")]
    TamperedNode { node: String, stored: String, recomputed: String },

    #[error("lamport regression at node {node}: {got} <= parent max {parent_max}")]
    LamportRegression { node: String, got: Lamport, parent_max: Lamport },

    // ── Budget / risk ────────────────────────────────────────────────────────
    #[error("{bucket} budget exhausted: used {used} + cost {cost} > limit {limit}")]
    BudgetExhausted { bucket: &'static str, used: u64, cost: u64, limit: u64 },

    #[error("unknown tenant: {0}")]
    UnknownTenant(String),

    #[error("risk cost {cost} exceeds per-action cap {max_risk} for {action_type}")]
    RiskCapExceeded { action_type: String, cost: u64, max_risk: u64 },

    #[error("aggregate risk {aggregate} + weighted cost {weighted} exceeds window max {max}")]
    RiskAggregateExceeded { aggregate: u64, weighted: u64, max: u64 },

    #[error("no risk envelope registered for action type {0}")]
    UnknownActionType(String),

    // ── Trust / packs ────────────────────────────────────────────────────────
    #[error("signature threshold not met: need {need}, got {got}")]
    ThresholdNotMet { need: u32, got: u32 },

    #[error("metadata {role} expired at {expired_at}")]
    MetadataExpired { role: &'static str, expired_at: i64 },

    #[error("metadata {role} version rollback: {got} < {installed}")]
    MetadataRollback { role: &'static str, installed: u64, got: u64 },

    #[error("pack version rollback: {got} < installed {installed}")]
    VersionRollback { installed: String, got: String },

    #[error("pack {0} is revoked")]
    PackRevoked(String),

    #[error("publisher key {key_id} is {status}")]
    PublisherKeyRejected { key_id: String, status: &'static str },

    #[error("pack hash does not match targets manifest entry for {0}")]
    TargetMismatch(String),

    #[error("pack {pack} does not match any delegated path pattern")]
    DelegationMismatch { pack: String },

    #[error("inclusion proof invalid: {0}")]
    InclusionProofInvalid(String),

    #[error("transparency log tree size regressed: {got} < trusted {trusted}")]
    TreeSizeRegression { trusted: u64, got: u64 },

    // ── Liveness / jurisdiction ──────────────────────────────────────────────
    #[error("liveness entry {0} not found")]
    LivenessNotFound(String),

    #[error("liveness entry {id} is {state}; transition not permitted")]
    LivenessTerminal { id: String, state: &'static str },

    #[error("no jurisdiction rule for region {0}")]
    JurisdictionMissing(String),

    // ── Crypto / keys ────────────────────────────────────────────────────────
    #[error("invalid signature")]
    InvalidSignature,

    #[error("tenant id must not be empty")]
    EmptyTenantId,

    // ── Serialization / storage ──────────────────────────────────────────────
    #[error("canonicalization error: {0}")]
    Canonicalization(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("content address not found: {0}")]
    BlobNotFound(String),

    // ── General ──────────────────────────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

impl HelmError {
    /// Map an error onto the receipt taxonomy. Used when a gate failure must
    /// be converted into a denial receipt.
    pub fn denial_reason(&self) -> DenialReason {
        match self {
            HelmError::Cancelled
            | HelmError::ProfileViolation { .. }
            | HelmError::Evaluation { .. } => DenialReason::Policy,
            HelmError::BudgetExhausted { .. } => DenialReason::Budget,
            HelmError::UnknownTenant(_) | HelmError::EmptyTenantId => DenialReason::Tenant,
            HelmError::RiskCapExceeded { .. }
            | HelmError::RiskAggregateExceeded { .. }
            | HelmError::UnknownActionType(_) => DenialReason::Envelope,
            HelmError::JurisdictionMissing(_) => DenialReason::Jurisdiction,
            HelmError::InvalidSignature
            | HelmError::ThresholdNotMet { .. }
            | HelmError::InclusionProofInvalid(_)
            | HelmError::TreeSizeRegression { .. }
            | HelmError::MetadataExpired { .. }
            | HelmError::MetadataRollback { .. }
            | HelmError::VersionRollback { .. }
            | HelmError::PackRevoked(_)
            | HelmError::PublisherKeyRejected { .. }
            | HelmError::TargetMismatch(_)
            | HelmError::DelegationMismatch { .. } => DenialReason::Verification,
            _ => DenialReason::Policy,
        }
    }
}
