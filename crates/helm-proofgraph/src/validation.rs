use helm_core::{HelmError, NodeHash};

use crate::graph::ProofGraph;

/// Walk the ancestor closure of `start`, verifying each node.
///
/// Checks (per node):
/// 1. Recomputed hash equals the stored `node_hash`
/// 2. Every claimed parent exists in the graph
/// 3. `lamport` strictly exceeds the maximum parent lamport
///
/// Fails on the first tampered node with a structured error naming it.
/// Returns the number of nodes verified.
pub fn validate_chain(graph: &ProofGraph, start: &NodeHash) -> Result<usize, HelmError> {
    let nodes = graph.snapshot();
    let mut stack = vec![start.clone()];
    let mut seen = std::collections::BTreeSet::new();
    let mut verified = 0usize;

    while let Some(hash) = stack.pop() {
        if !seen.insert(hash.clone()) {
            continue;
        }
        let node = nodes
            .get(&hash)
            .ok_or_else(|| HelmError::UnknownNode(hash.to_hex()))?;

        // ── 1. Hash integrity ────────────────────────────────────────────────
        let recomputed = node.compute_hash()?;
        if recomputed != node.node_hash {
            return Err(HelmError::TamperedNode {
                node: node.node_hash.to_hex(),
                stored: node.node_hash.to_hex(),
                recomputed: recomputed.to_hex(),
            });
        }

        // ── 2 & 3. Parents exist and lamport advances ────────────────────────
        let mut parent_max = 0;
        for parent in &node.parents {
            let p = nodes
                .get(parent)
                .ok_or_else(|| HelmError::UnknownParent(parent.to_hex()))?;
            parent_max = parent_max.max(p.lamport);
        }
        if !node.parents.is_empty() && node.lamport <= parent_max {
            return Err(HelmError::LamportRegression {
                node: node.node_hash.to_hex(),
                got: node.lamport,
                parent_max,
            });
        }

        stack.extend(node.parents.iter().cloned());
        verified += 1;
    }

    Ok(verified)
}
