//! Evidence pack export and offline verification.
//!
//! A pack is a directory with a `manifest.json` whose `file_hashes` maps
//! every contained file to its hex SHA-256, an optional `02_PROOFGRAPH/`
//! slice, and `receipts/`. The verifier is offline: structure, index
//! integrity, per-file hashes, chain integrity when a graph slice is
//! present, and receipt-order monotonicity. Findings are structured, not
//! boolean.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::info;

use helm_core::{sha256_hex, DenialReceipt, HelmError};
use helm_proofgraph::ProofNode;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const INDEX_FILE: &str = "00_INDEX.json";
pub const PROOFGRAPH_FILE: &str = "02_PROOFGRAPH/nodes.json";
pub const RECEIPTS_FILE: &str = "receipts/denials.json";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PackManifest {
    /// Relative path → hex SHA-256.
    pub file_hashes: BTreeMap<String, String>,
}

/// One verification finding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PackIssue {
    pub code: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct PackReport {
    pub files_checked: usize,
    pub nodes_checked: usize,
    pub receipts_checked: usize,
    pub issues: Vec<PackIssue>,
}

impl PackReport {
    pub fn ok(&self) -> bool {
        self.issues.is_empty()
    }

    fn issue(&mut self, code: &'static str, detail: impl Into<String>) {
        self.issues.push(PackIssue { code, detail: detail.into() });
    }
}

fn write_file(dir: &Path, rel: &str, bytes: &[u8]) -> Result<String, HelmError> {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| HelmError::Storage(e.to_string()))?;
    }
    fs::write(&path, bytes).map_err(|e| HelmError::Storage(e.to_string()))?;
    Ok(sha256_hex(bytes))
}

/// Export a pack: proof-graph slice, denial receipts, extra artifacts,
/// and the manifest indexing them all.
pub fn export_pack(
    dir: &Path,
    nodes: &[ProofNode],
    receipts: &[DenialReceipt],
    extra: &BTreeMap<String, serde_json::Value>,
) -> Result<PackManifest, HelmError> {
    let mut manifest = PackManifest::default();

    if !nodes.is_empty() {
        let bytes = serde_json::to_vec_pretty(nodes)
            .map_err(|e| HelmError::Serialization(e.to_string()))?;
        let hash = write_file(dir, PROOFGRAPH_FILE, &bytes)?;
        manifest.file_hashes.insert(PROOFGRAPH_FILE.into(), hash);
    }

    if !receipts.is_empty() {
        let bytes = serde_json::to_vec_pretty(receipts)
            .map_err(|e| HelmError::Serialization(e.to_string()))?;
        let hash = write_file(dir, RECEIPTS_FILE, &bytes)?;
        manifest.file_hashes.insert(RECEIPTS_FILE.into(), hash);
    }

    for (rel, value) in extra {
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| HelmError::Serialization(e.to_string()))?;
        let hash = write_file(dir, rel, &bytes)?;
        manifest.file_hashes.insert(rel.clone(), hash);
    }

    let manifest_bytes = serde_json::to_vec_pretty(&manifest)
        .map_err(|e| HelmError::Serialization(e.to_string()))?;
    write_file(dir, MANIFEST_FILE, &manifest_bytes)?;
    info!(files = manifest.file_hashes.len(), dir = %dir.display(), "evidence pack exported");
    Ok(manifest)
}

fn load_manifest(dir: &Path, report: &mut PackReport) -> Option<PackManifest> {
    for name in [MANIFEST_FILE, INDEX_FILE] {
        let path = dir.join(name);
        if path.exists() {
            return match fs::read(&path) {
                Ok(bytes) => match serde_json::from_slice::<PackManifest>(&bytes) {
                    Ok(manifest) => Some(manifest),
                    Err(e) => {
                        report.issue("index_unparseable", format!("{name}: {e}"));
                        None
                    }
                },
                Err(e) => {
                    report.issue("index_unreadable", format!("{name}: {e}"));
                    None
                }
            };
        }
    }
    report.issue("index_missing", "no manifest.json or 00_INDEX.json");
    None
}

fn verify_graph_slice(dir: &Path, report: &mut PackReport) {
    let path = dir.join(PROOFGRAPH_FILE);
    if !path.exists() {
        return;
    }
    let nodes: Vec<ProofNode> = match fs::read(&path)
        .ok()
        .and_then(|b| serde_json::from_slice(&b).ok())
    {
        Some(nodes) => nodes,
        None => {
            report.issue("proofgraph_unparseable", PROOFGRAPH_FILE);
            return;
        }
    };

    let hashes: std::collections::BTreeSet<_> =
        nodes.iter().map(|n| n.node_hash.clone()).collect();
    let mut last_lamport = 0;
    for node in &nodes {
        report.nodes_checked += 1;
        match node.validate() {
            Ok(true) => {}
            _ => report.issue("node_tampered", node.node_hash.to_hex()),
        }
        if node.lamport <= last_lamport {
            report.issue("lamport_order", node.node_hash.to_hex());
        }
        last_lamport = node.lamport;
        for parent in &node.parents {
            if !hashes.contains(parent) {
                // Parents outside the slice are allowed only for the
                // slice's first node.
                if node.lamport != nodes.first().map(|n| n.lamport).unwrap_or(0) {
                    report.issue("parent_outside_slice", parent.to_hex());
                }
            }
        }
    }
}

fn verify_receipts(dir: &Path, report: &mut PackReport) {
    let path = dir.join(RECEIPTS_FILE);
    if !path.exists() {
        return;
    }
    let receipts: Vec<DenialReceipt> = match fs::read(&path)
        .ok()
        .and_then(|b| serde_json::from_slice(&b).ok())
    {
        Some(receipts) => receipts,
        None => {
            report.issue("receipts_unparseable", RECEIPTS_FILE);
            return;
        }
    };

    let mut last_seq = 0u64;
    for receipt in &receipts {
        report.receipts_checked += 1;
        match receipt.verify_content_hash() {
            Ok(true) => {}
            _ => report.issue("receipt_hash_mismatch", receipt.receipt_id.clone()),
        }
        let seq = receipt
            .receipt_id
            .rsplit('-')
            .next()
            .and_then(|s| s.parse::<u64>().ok());
        match seq {
            Some(seq) if seq > last_seq => last_seq = seq,
            Some(_) => report.issue("receipt_order", receipt.receipt_id.clone()),
            None => report.issue("receipt_id_malformed", receipt.receipt_id.clone()),
        }
    }
}

/// Offline verification of an exported pack.
pub fn verify_pack(dir: &Path) -> Result<PackReport, HelmError> {
    let mut report = PackReport::default();

    let Some(manifest) = load_manifest(dir, &mut report) else {
        return Ok(report);
    };

    // ── Every listed file exists and hashes match ────────────────────────────
    for (rel, expected) in &manifest.file_hashes {
        let path = dir.join(rel);
        match fs::read(&path) {
            Ok(bytes) => {
                report.files_checked += 1;
                let actual = sha256_hex(&bytes);
                if &actual != expected {
                    report.issue("file_hash_mismatch", rel.clone());
                }
            }
            Err(_) => report.issue("file_missing", rel.clone()),
        }
    }

    verify_graph_slice(dir, &mut report);
    verify_receipts(dir, &mut report);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use helm_core::{DenialReason, Principal, TenantId};
    use helm_proofgraph::{NodeKind, ProofGraph};
    use serde_json::json;

    fn sample_nodes() -> Vec<ProofNode> {
        let graph = ProofGraph::new(TenantId::new("acme"));
        (0..3)
            .map(|i| graph.append(NodeKind::Intent, json!({"i": i}), "p", i).unwrap())
            .collect()
    }

    fn sample_receipts(n: u64) -> Vec<DenialReceipt> {
        (1..=n)
            .map(|i| {
                DenialReceipt {
                    receipt_id: format!("denial-{i}"),
                    denied_at: i as i64,
                    principal: Principal::new("agent"),
                    tenant: Some(TenantId::new("acme")),
                    action: "fs.write".into(),
                    reason: DenialReason::Policy,
                    details: "test".into(),
                    policy_ref: None,
                    envelope_ref: None,
                    run_id: None,
                    content_hash: String::new(),
                }
                .seal()
                .unwrap()
            })
            .collect()
    }

    #[test]
    fn exported_pack_verifies_clean() {
        let dir = tempfile::tempdir().unwrap();
        export_pack(dir.path(), &sample_nodes(), &sample_receipts(3), &BTreeMap::new()).unwrap();
        let report = verify_pack(dir.path()).unwrap();
        assert!(report.ok(), "unexpected issues: {:?}", report.issues);
        assert_eq!(report.files_checked, 2);
        assert_eq!(report.nodes_checked, 3);
        assert_eq!(report.receipts_checked, 3);
    }

    #[test]
    fn tampered_file_detected() {
        let dir = tempfile::tempdir().unwrap();
        export_pack(dir.path(), &sample_nodes(), &[], &BTreeMap::new()).unwrap();
        let path = dir.path().join(PROOFGRAPH_FILE);
        let mut contents = fs::read_to_string(&path).unwrap();
        contents = contents.replacen("\"i\": 0", "\"i\": 9", 1);
        fs::write(&path, contents).unwrap();

        let report = verify_pack(dir.path()).unwrap();
        assert!(!report.ok());
        assert!(report.issues.iter().any(|i| i.code == "file_hash_mismatch"));
        assert!(report.issues.iter().any(|i| i.code == "node_tampered"));
    }

    #[test]
    fn receipt_order_violation_detected() {
        let dir = tempfile::tempdir().unwrap();
        let mut receipts = sample_receipts(3);
        receipts.swap(0, 2);
        export_pack(dir.path(), &[], &receipts, &BTreeMap::new()).unwrap();
        let report = verify_pack(dir.path()).unwrap();
        assert!(report.issues.iter().any(|i| i.code == "receipt_order"));
    }

    #[test]
    fn missing_index_reported() {
        let dir = tempfile::tempdir().unwrap();
        let report = verify_pack(dir.path()).unwrap();
        assert!(report.issues.iter().any(|i| i.code == "index_missing"));
    }

    #[test]
    fn missing_listed_file_reported() {
        let dir = tempfile::tempdir().unwrap();
        export_pack(dir.path(), &[], &sample_receipts(1), &BTreeMap::new()).unwrap();
        fs::remove_file(dir.path().join(RECEIPTS_FILE)).unwrap();
        let report = verify_pack(dir.path()).unwrap();
        assert!(report.issues.iter().any(|i| i.code == "file_missing"));
    }
}
