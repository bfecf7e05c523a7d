//! Transparency-log inclusion proofs (RFC 6962 hashing).
//!
//! `leaf = SHA256(0x00 || data)`, `node = SHA256(0x01 || left || right)`.
//! A proof is the audit path from the leaf to the signed tree head; the
//! trusted tree size must never regress.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use helm_core::HelmError;
use helm_crypto::verify_hex;

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

pub fn leaf_hash(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_PREFIX]);
    hasher.update(data);
    hasher.finalize().into()
}

pub fn node_hash(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([NODE_PREFIX]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Audit path for one leaf.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InclusionProof {
    pub leaf_index: u64,
    pub tree_size: u64,
    /// Sibling hashes from the leaf up to the root, hex encoded.
    pub path: Vec<String>,
}

/// Log head signed by the transparency log operator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignedTreeHead {
    pub tree_size: u64,
    /// Hex root hash.
    pub root_hash: String,
    /// Hex signature over `{tree_size}:{root_hash}` by the log key.
    pub signature: String,
}

impl SignedTreeHead {
    pub fn signing_bytes(&self) -> Vec<u8> {
        format!("{}:{}", self.tree_size, self.root_hash).into_bytes()
    }

    pub fn verify(&self, log_public_key_hex: &str) -> Result<(), HelmError> {
        verify_hex(log_public_key_hex, &self.signing_bytes(), &self.signature)
            .map_err(|_| HelmError::InclusionProofInvalid("tree head signature invalid".into()))
    }
}

/// Recompute the root from a leaf and its audit path (RFC 6962 §2.1.1)
/// and compare against the signed head. `trusted_tree_size` is the last
/// size this verifier accepted; a smaller head is a log rollback.
pub fn verify_inclusion(
    leaf_data: &[u8],
    proof: &InclusionProof,
    head: &SignedTreeHead,
    trusted_tree_size: u64,
) -> Result<(), HelmError> {
    if head.tree_size < trusted_tree_size {
        return Err(HelmError::TreeSizeRegression {
            trusted: trusted_tree_size,
            got: head.tree_size,
        });
    }
    if proof.tree_size != head.tree_size {
        return Err(HelmError::InclusionProofInvalid(
            "proof tree size does not match head".into(),
        ));
    }
    if proof.leaf_index >= proof.tree_size {
        return Err(HelmError::InclusionProofInvalid("leaf index out of range".into()));
    }

    // RFC 9162 §2.1.3.2 audit-path walk.
    let mut hash = leaf_hash(leaf_data);
    let mut fnode = proof.leaf_index;
    let mut snode = proof.tree_size - 1;

    for sibling_hex in &proof.path {
        if snode == 0 {
            return Err(HelmError::InclusionProofInvalid("path longer than tree".into()));
        }
        let sibling_bytes = hex::decode(sibling_hex)
            .map_err(|_| HelmError::InclusionProofInvalid("bad path hash encoding".into()))?;
        let sibling: [u8; 32] = sibling_bytes
            .try_into()
            .map_err(|_| HelmError::InclusionProofInvalid("bad path hash length".into()))?;

        if fnode % 2 == 1 || fnode == snode {
            hash = node_hash(&sibling, &hash);
            if fnode % 2 == 0 {
                while fnode % 2 == 0 && fnode != 0 {
                    fnode >>= 1;
                    snode >>= 1;
                }
            }
        } else {
            hash = node_hash(&hash, &sibling);
        }
        fnode >>= 1;
        snode >>= 1;
    }

    if snode != 0 {
        return Err(HelmError::InclusionProofInvalid("path shorter than tree".into()));
    }
    if hex::encode(hash) != head.root_hash {
        return Err(HelmError::InclusionProofInvalid("root mismatch".into()));
    }
    Ok(())
}
