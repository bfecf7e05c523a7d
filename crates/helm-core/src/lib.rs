pub mod artifact;
pub mod canonical;
pub mod constants;
pub mod error;
pub mod evidence;
pub mod types;

pub use artifact::{
    decision_id_for_request, DecisionRecord, DecisionTrace, DenialReceipt, EngineSubtrace,
    ExecutionIntent, GovernResult,
};
pub use canonical::{
    canonical_hash, canonical_hash_hex, content_address, sha256_bytes, sha256_hex, signed_surface,
    to_canonical_json,
};
pub use constants::*;
pub use error::HelmError;
pub use evidence::{
    EvidenceContract, EvidenceContractManifest, EvidencePhase, EvidenceRequirement,
    EvidenceSubmission, EvidenceVerdict, EvidenceWhen,
};
pub use types::*;
