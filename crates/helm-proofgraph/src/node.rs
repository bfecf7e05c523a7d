use serde::{Deserialize, Serialize};
use serde_json::Value;

use helm_core::{sha256_bytes, to_canonical_json, HelmError, Lamport, NodeHash, Timestamp};

/// Vertex classification in the proof DAG.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeKind {
    /// A governed action was proposed.
    Intent,
    /// A decision was made (allow or refuse) for an intent.
    Attestation,
    /// The external effector reported the action's outcome.
    Effect,
    /// Key material changed (add, revoke, rotate).
    TrustEvent,
    /// Periodic anchor summarizing graph state.
    Checkpoint,
    /// A swarm merge combined sub-decisions into one verdict.
    MergeDecision,
}

/// A vertex in a tenant's proof graph.
///
/// `node_hash` is a pure function of every other field: SHA-256 over the
/// JCS form of the node with `node_hash` removed. The signature, when
/// present, sits inside the hashed surface, so a signed node's hash commits
/// to its signature. `timestamp` is informational only; ordering is carried
/// entirely by `lamport`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProofNode {
    pub kind: NodeKind,
    /// Content hashes of the heads at append time. Empty only for the
    /// first node of a graph.
    pub parents: Vec<NodeHash>,
    /// Strictly monotonic within the owning graph.
    pub lamport: Lamport,
    pub principal: String,
    /// Per-principal sequence number within the graph.
    pub principal_seq: u64,
    pub payload: Value,
    /// Hex-encoded detached signature over the canonical node excluding
    /// `node_hash` and `sig`.
    pub sig: Option<String>,
    pub node_hash: NodeHash,
    /// Epoch milliseconds. Never feeds ordering or validation logic.
    pub timestamp: Timestamp,
}

impl ProofNode {
    /// Recompute this node's content hash from its current fields.
    pub fn compute_hash(&self) -> Result<NodeHash, HelmError> {
        let mut value = serde_json::to_value(self)
            .map_err(|e| HelmError::Serialization(e.to_string()))?;
        if let Value::Object(map) = &mut value {
            map.remove("node_hash");
        }
        Ok(NodeHash::from_bytes(sha256_bytes(&to_canonical_json(&value)?)))
    }

    /// The bytes covered by `sig`: canonical node minus `node_hash` and `sig`.
    pub fn signing_bytes(&self) -> Result<Vec<u8>, HelmError> {
        let mut value = serde_json::to_value(self)
            .map_err(|e| HelmError::Serialization(e.to_string()))?;
        if let Value::Object(map) = &mut value {
            map.remove("node_hash");
            map.remove("sig");
        }
        to_canonical_json(&value)
    }

    /// True when the stored hash matches the recomputed one.
    pub fn validate(&self) -> Result<bool, HelmError> {
        Ok(self.compute_hash()? == self.node_hash)
    }
}
