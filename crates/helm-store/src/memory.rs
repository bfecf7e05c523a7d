use std::collections::HashMap;
use std::sync::Mutex;

use helm_core::{
    HelmError, Lamport, NodeHash, TenantId, DEFAULT_DAILY_LIMIT, DEFAULT_MONTHLY_LIMIT,
};
use helm_proofgraph::{NodeKind, ProofNode};
use helm_risk::Budget;

use crate::store::Store;

/// Volatile store for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    nodes: HashMap<NodeHash, ProofNode>,
    budgets: HashMap<TenantId, Budget>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn store_node(&self, node: &ProofNode) -> Result<(), HelmError> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        inner.nodes.entry(node.node_hash.clone()).or_insert_with(|| node.clone());
        Ok(())
    }

    fn get_node(&self, id: &NodeHash) -> Result<Option<ProofNode>, HelmError> {
        let inner = self.inner.lock().expect("memory store lock poisoned");
        Ok(inner.nodes.get(id).cloned())
    }

    fn get_nodes_by_kind(
        &self,
        kind: NodeKind,
        lo: Lamport,
        hi: Lamport,
    ) -> Result<Vec<ProofNode>, HelmError> {
        Ok(self
            .get_range(lo, hi)?
            .into_iter()
            .filter(|n| n.kind == kind)
            .collect())
    }

    fn get_range(&self, lo: Lamport, hi: Lamport) -> Result<Vec<ProofNode>, HelmError> {
        let inner = self.inner.lock().expect("memory store lock poisoned");
        let mut out: Vec<ProofNode> = inner
            .nodes
            .values()
            .filter(|n| n.lamport >= lo && n.lamport <= hi)
            .cloned()
            .collect();
        out.sort_by_key(|n| n.lamport);
        Ok(out)
    }

    fn upsert_budget(&self, budget: &Budget) -> Result<(), HelmError> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        inner.budgets.insert(budget.tenant.clone(), budget.clone());
        Ok(())
    }

    fn get_budget(&self, tenant: &TenantId) -> Result<Budget, HelmError> {
        let inner = self.inner.lock().expect("memory store lock poisoned");
        Ok(inner
            .budgets
            .get(tenant)
            .cloned()
            .unwrap_or_else(|| {
                Budget::new(tenant.clone(), DEFAULT_DAILY_LIMIT, DEFAULT_MONTHLY_LIMIT)
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helm_proofgraph::ProofGraph;
    use serde_json::json;

    #[test]
    fn absent_budget_gets_defaults() {
        let store = MemoryStore::new();
        let budget = store.get_budget(&TenantId::new("fresh")).unwrap();
        assert_eq!(budget.daily_limit, DEFAULT_DAILY_LIMIT);
        assert_eq!(budget.monthly_limit, DEFAULT_MONTHLY_LIMIT);
    }

    #[test]
    fn chain_reconstruction_from_storage() {
        let store = MemoryStore::new();
        let graph = ProofGraph::new(TenantId::new("acme"));
        for i in 0..3 {
            let node = graph
                .append(NodeKind::Intent, json!({"i": i}), "p", i)
                .unwrap();
            store.store_node(&node).unwrap();
        }
        let tip = graph.heads().pop().unwrap();
        let chain = store.get_chain(&tip).unwrap();
        assert_eq!(chain.len(), 3);
        assert!(chain.windows(2).all(|w| w[0].lamport < w[1].lamport));
    }
}
