use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tracing::debug;

use helm_core::{HelmError, Lamport, NodeHash, TenantId, Timestamp};
use helm_crypto::KeyProvider;

use crate::node::{NodeKind, ProofNode};

struct GraphInner {
    /// Flat map keyed by content hash; parent references are hashes, so
    /// cycles are structurally impossible.
    nodes: HashMap<NodeHash, ProofNode>,
    /// Append order, which is also lamport order.
    order: Vec<NodeHash>,
    heads: BTreeSet<NodeHash>,
    lamport: Lamport,
    principal_seqs: HashMap<String, u64>,
}

/// Per-tenant append-only proof DAG.
///
/// One writer path serialized by the interior mutex; the lamport counter is
/// owned by the graph and never derived from wall clock. Heads move forward
/// only: each append takes the current heads as parents and replaces them
/// with the new node's hash.
pub struct ProofGraph {
    tenant: TenantId,
    inner: Mutex<GraphInner>,
}

impl ProofGraph {
    pub fn new(tenant: TenantId) -> Self {
        Self {
            tenant,
            inner: Mutex::new(GraphInner {
                nodes: HashMap::new(),
                order: Vec::new(),
                heads: BTreeSet::new(),
                lamport: 0,
                principal_seqs: HashMap::new(),
            }),
        }
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    /// Append an unsigned node. Total: fails only if the caller-supplied
    /// payload cannot be canonicalized.
    pub fn append(
        &self,
        kind: NodeKind,
        payload: Value,
        principal: &str,
        now: Timestamp,
    ) -> Result<ProofNode, HelmError> {
        self.append_inner(kind, payload, principal, now, None)
    }

    /// Append a signed node. The signature covers the canonical node minus
    /// `node_hash` and `sig`, and the final hash commits to the signature.
    pub fn append_signed(
        &self,
        kind: NodeKind,
        payload: Value,
        principal: &str,
        now: Timestamp,
        signer: &dyn KeyProvider,
    ) -> Result<ProofNode, HelmError> {
        self.append_inner(kind, payload, principal, now, Some(signer))
    }

    fn append_inner(
        &self,
        kind: NodeKind,
        payload: Value,
        principal: &str,
        now: Timestamp,
        signer: Option<&dyn KeyProvider>,
    ) -> Result<ProofNode, HelmError> {
        let mut inner = self.inner.lock().expect("proof graph lock poisoned");

        let parents: Vec<NodeHash> = inner.heads.iter().cloned().collect();
        let lamport = inner.lamport + 1;
        let seq = inner
            .principal_seqs
            .get(principal)
            .copied()
            .unwrap_or(0)
            + 1;

        let mut node = ProofNode {
            kind,
            parents,
            lamport,
            principal: principal.to_string(),
            principal_seq: seq,
            payload,
            sig: None,
            node_hash: NodeHash::from_bytes([0u8; 32]),
            timestamp: now,
        };

        if let Some(signer) = signer {
            let bytes = node.signing_bytes()?;
            node.sig = Some(signer.sign_hex(&bytes));
        }
        node.node_hash = node.compute_hash()?;

        inner.lamport = lamport;
        inner.principal_seqs.insert(principal.to_string(), seq);
        inner.heads.clear();
        inner.heads.insert(node.node_hash.clone());
        inner.order.push(node.node_hash.clone());
        inner.nodes.insert(node.node_hash.clone(), node.clone());

        debug!(tenant = %self.tenant, lamport, kind = ?kind, hash = %node.node_hash, "appended node");
        Ok(node)
    }

    pub fn get(&self, hash: &NodeHash) -> Option<ProofNode> {
        let inner = self.inner.lock().expect("proof graph lock poisoned");
        inner.nodes.get(hash).cloned()
    }

    /// Nodes with `lo <= lamport <= hi`, in lamport order.
    pub fn get_range(&self, lo: Lamport, hi: Lamport) -> Vec<ProofNode> {
        let inner = self.inner.lock().expect("proof graph lock poisoned");
        inner
            .order
            .iter()
            .filter_map(|h| inner.nodes.get(h))
            .filter(|n| n.lamport >= lo && n.lamport <= hi)
            .cloned()
            .collect()
    }

    /// Nodes of one kind within a lamport range, in lamport order.
    pub fn get_by_kind(&self, kind: NodeKind, lo: Lamport, hi: Lamport) -> Vec<ProofNode> {
        self.get_range(lo, hi)
            .into_iter()
            .filter(|n| n.kind == kind)
            .collect()
    }

    /// Ancestor closure of a node (inclusive), in lamport order. Used for
    /// evidence-pack export.
    pub fn get_chain(&self, hash: &NodeHash) -> Result<Vec<ProofNode>, HelmError> {
        let inner = self.inner.lock().expect("proof graph lock poisoned");
        let mut stack = vec![hash.clone()];
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        while let Some(h) = stack.pop() {
            if !seen.insert(h.clone()) {
                continue;
            }
            let node = inner
                .nodes
                .get(&h)
                .ok_or_else(|| HelmError::UnknownNode(h.to_hex()))?;
            stack.extend(node.parents.iter().cloned());
            out.push(node.clone());
        }
        out.sort_by_key(|n| n.lamport);
        Ok(out)
    }

    pub fn heads(&self) -> Vec<NodeHash> {
        let inner = self.inner.lock().expect("proof graph lock poisoned");
        inner.heads.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().expect("proof graph lock poisoned");
        inner.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn current_lamport(&self) -> Lamport {
        let inner = self.inner.lock().expect("proof graph lock poisoned");
        inner.lamport
    }

    pub(crate) fn snapshot(&self) -> HashMap<NodeHash, ProofNode> {
        let inner = self.inner.lock().expect("proof graph lock poisoned");
        inner.nodes.clone()
    }
}

/// Lock-plus-map registry of per-tenant graphs, created on first use.
#[derive(Default)]
pub struct ProofGraphRegistry {
    graphs: Mutex<HashMap<TenantId, Arc<ProofGraph>>>,
}

impl ProofGraphRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn graph(&self, tenant: &TenantId) -> Arc<ProofGraph> {
        let mut graphs = self.graphs.lock().expect("graph registry lock poisoned");
        Arc::clone(
            graphs
                .entry(tenant.clone())
                .or_insert_with(|| Arc::new(ProofGraph::new(tenant.clone()))),
        )
    }

    pub fn tenants(&self) -> Vec<TenantId> {
        let graphs = self.graphs.lock().expect("graph registry lock poisoned");
        graphs.keys().cloned().collect()
    }
}
