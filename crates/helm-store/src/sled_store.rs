use std::path::Path;
use tracing::debug;

use helm_core::{
    HelmError, Lamport, NodeHash, TenantId, DEFAULT_DAILY_LIMIT, DEFAULT_MONTHLY_LIMIT,
};
use helm_proofgraph::{NodeKind, ProofNode};
use helm_risk::Budget;

use crate::store::Store;

/// Persistent store backed by sled (pure-Rust, no C dependencies).
///
/// Named trees:
///   nodes    — node_hash bytes → JSON(ProofNode)
///   lamports — lamport be bytes → node_hash bytes (range index)
///   budgets  — tenant utf8 bytes → bincode(Budget)
///
/// Nodes are stored as canonical-shaped JSON because payloads are
/// arbitrary JSON values; budget rows are plain structs and use bincode.
pub struct SledStore {
    _db: sled::Db,
    nodes: sled::Tree,
    lamports: sled::Tree,
    budgets: sled::Tree,
}

impl SledStore {
    /// Open or create the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, HelmError> {
        let db = sled::open(path).map_err(storage_err)?;
        let nodes = db.open_tree("nodes").map_err(storage_err)?;
        let lamports = db.open_tree("lamports").map_err(storage_err)?;
        let budgets = db.open_tree("budgets").map_err(storage_err)?;
        Ok(Self { _db: db, nodes, lamports, budgets })
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), HelmError> {
        self._db.flush().map_err(storage_err)?;
        Ok(())
    }

    fn decode_node(bytes: &[u8]) -> Result<ProofNode, HelmError> {
        serde_json::from_slice(bytes).map_err(|e| HelmError::Serialization(e.to_string()))
    }
}

fn storage_err(e: sled::Error) -> HelmError {
    HelmError::Storage(e.to_string())
}

impl Store for SledStore {
    fn store_node(&self, node: &ProofNode) -> Result<(), HelmError> {
        let bytes =
            serde_json::to_vec(node).map_err(|e| HelmError::Serialization(e.to_string()))?;
        self.nodes
            .insert(node.node_hash.as_bytes(), bytes)
            .map_err(storage_err)?;
        self.lamports
            .insert(node.lamport.to_be_bytes(), node.node_hash.as_bytes().as_slice())
            .map_err(storage_err)?;
        debug!(hash = %node.node_hash, lamport = node.lamport, "node persisted");
        Ok(())
    }

    fn get_node(&self, id: &NodeHash) -> Result<Option<ProofNode>, HelmError> {
        match self.nodes.get(id.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(Self::decode_node(&bytes)?)),
            None => Ok(None),
        }
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
        let mut out = Vec::new();
        for item in self
            .lamports
            .range(lo.to_be_bytes()..=hi.to_be_bytes())
        {
            let (_, hash_bytes) = item.map_err(storage_err)?;
            match self.nodes.get(&hash_bytes).map_err(storage_err)? {
                Some(bytes) => out.push(Self::decode_node(&bytes)?),
                None => {
                    let mut arr = [0u8; 32];
                    arr.copy_from_slice(&hash_bytes);
                    return Err(HelmError::UnknownNode(NodeHash::from_bytes(arr).to_hex()));
                }
            }
        }
        Ok(out)
    }

    fn upsert_budget(&self, budget: &Budget) -> Result<(), HelmError> {
        let bytes =
            bincode::serialize(budget).map_err(|e| HelmError::Serialization(e.to_string()))?;
        self.budgets
            .insert(budget.tenant.as_str().as_bytes(), bytes)
            .map_err(storage_err)?;
        Ok(())
    }

    fn get_budget(&self, tenant: &TenantId) -> Result<Budget, HelmError> {
        match self
            .budgets
            .get(tenant.as_str().as_bytes())
            .map_err(storage_err)?
        {
            Some(bytes) => {
                bincode::deserialize(&bytes).map_err(|e| HelmError::Serialization(e.to_string()))
            }
            None => Ok(Budget::new(
                tenant.clone(),
                DEFAULT_DAILY_LIMIT,
                DEFAULT_MONTHLY_LIMIT,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helm_proofgraph::ProofGraph;
    use serde_json::json;

    fn temp_store() -> (SledStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        (store, dir)
    }

    #[test]
    fn node_round_trip_preserves_hash() {
        let (store, _dir) = temp_store();
        let graph = ProofGraph::new(TenantId::new("acme"));
        let node = graph
            .append(NodeKind::Intent, json!({"tool": "get_weather"}), "p", 1)
            .unwrap();
        store.store_node(&node).unwrap();
        let loaded = store.get_node(&node.node_hash).unwrap().unwrap();
        assert_eq!(loaded.node_hash, node.node_hash);
        assert!(loaded.validate().unwrap());
    }

    #[test]
    fn range_scan_uses_lamport_index() {
        let (store, _dir) = temp_store();
        let graph = ProofGraph::new(TenantId::new("acme"));
        for i in 0..5 {
            let kind = if i % 2 == 0 { NodeKind::Intent } else { NodeKind::Effect };
            store.store_node(&graph.append(kind, json!({"i": i}), "p", i).unwrap()).unwrap();
        }
        assert_eq!(store.get_range(2, 4).unwrap().len(), 3);
        assert_eq!(store.get_nodes_by_kind(NodeKind::Intent, 1, 5).unwrap().len(), 3);
    }

    #[test]
    fn budget_upsert_semantics() {
        let (store, _dir) = temp_store();
        let tenant = TenantId::new("acme");

        let absent = store.get_budget(&tenant).unwrap();
        assert_eq!(absent.daily_limit, DEFAULT_DAILY_LIMIT);
        assert_eq!(absent.monthly_limit, DEFAULT_MONTHLY_LIMIT);

        let mut budget = Budget::new(tenant.clone(), 2_000, 90_000);
        store.upsert_budget(&budget).unwrap();
        budget.daily_used = 150;
        store.upsert_budget(&budget).unwrap();

        let loaded = store.get_budget(&tenant).unwrap();
        assert_eq!(loaded.daily_limit, 2_000);
        assert_eq!(loaded.daily_used, 150);
    }
}
