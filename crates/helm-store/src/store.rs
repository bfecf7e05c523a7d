use helm_core::{HelmError, Lamport, NodeHash, TenantId};
use helm_proofgraph::{NodeKind, ProofNode};
use helm_risk::Budget;

/// Persistence seam for proof nodes and budget rows. One trait, one
/// implementation per backend, composed at construction. Backends store
/// nodes verbatim and may never recompute or mutate hashes.
pub trait Store: Send + Sync {
    fn store_node(&self, node: &ProofNode) -> Result<(), HelmError>;

    fn get_node(&self, id: &NodeHash) -> Result<Option<ProofNode>, HelmError>;

    /// Nodes of one kind with `lo <= lamport <= hi`, lamport order.
    fn get_nodes_by_kind(
        &self,
        kind: NodeKind,
        lo: Lamport,
        hi: Lamport,
    ) -> Result<Vec<ProofNode>, HelmError>;

    /// All nodes with `lo <= lamport <= hi`, lamport order.
    fn get_range(&self, lo: Lamport, hi: Lamport) -> Result<Vec<ProofNode>, HelmError>;

    /// Ancestor closure of `id` (inclusive), lamport order.
    fn get_chain(&self, id: &NodeHash) -> Result<Vec<ProofNode>, HelmError> {
        let mut stack = vec![id.clone()];
        let mut seen = std::collections::BTreeSet::new();
        let mut out = Vec::new();
        while let Some(hash) = stack.pop() {
            if !seen.insert(hash.clone()) {
                continue;
            }
            let node = self
                .get_node(&hash)?
                .ok_or_else(|| HelmError::UnknownNode(hash.to_hex()))?;
            stack.extend(node.parents.iter().cloned());
            out.push(node);
        }
        out.sort_by_key(|n| n.lamport);
        Ok(out)
    }

    /// Insert or update a budget row keyed by tenant.
    fn upsert_budget(&self, budget: &Budget) -> Result<(), HelmError>;

    /// Fetch a budget row. Absent rows materialize with the default
    /// limits rather than failing.
    fn get_budget(&self, tenant: &TenantId) -> Result<Budget, HelmError>;
}
