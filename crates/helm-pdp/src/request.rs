use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use helm_core::{
    canonical_hash, Decision, DecisionTrace, HelmError, TenantId, Timestamp,
};

/// A request to the policy decision point.
///
/// `context` carries the deterministic inputs (argument hashes, budget
/// figures, classification levels). When reproducibility is required the
/// caller also supplies `decision_time_source` pointing at `committed_at`
/// or `observed_at` inside the context, and `issued_at` is taken from there
/// rather than from wall clock.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PdpRequest {
    pub request_id: String,
    /// Effect identifier, e.g. `fs.write` or `tool.execute`.
    pub effect: String,
    pub subject: TenantId,
    pub context: BTreeMap<String, Value>,
    pub obligations_context: BTreeMap<String, Value>,
}

impl PdpRequest {
    pub fn new(request_id: impl Into<String>, effect: impl Into<String>, subject: TenantId) -> Self {
        Self {
            request_id: request_id.into(),
            effect: effect.into(),
            subject,
            context: BTreeMap::new(),
            obligations_context: BTreeMap::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// SHA-256 over the canonical request. Identical request bytes always
    /// hash identically, which pins the decision id.
    pub fn canonical_hash(&self) -> Result<[u8; 32], HelmError> {
        canonical_hash(self)
    }

    /// Resolve `issued_at` from the request's declared time source, falling
    /// back to the caller-injected clock when none is declared.
    pub fn resolve_issued_at(&self, fallback_now: Timestamp) -> Timestamp {
        let source = self
            .context
            .get("decision_time_source")
            .and_then(|v| v.as_str());
        match source {
            Some(field @ ("committed_at" | "observed_at")) => self
                .context
                .get(field)
                .and_then(|v| v.as_i64())
                .unwrap_or(fallback_now),
            _ => fallback_now,
        }
    }

    /// Effect domain for swarm decomposition: the segment before the first
    /// `.`; effects without a dot form their own domain.
    pub fn domain(&self) -> &str {
        self.effect.split('.').next().unwrap_or(&self.effect)
    }
}

/// The verdict for one request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PdpResponse {
    pub decision: Decision,
    /// UUIDv5 over the canonical request hash: identical requests map to
    /// identical ids.
    pub decision_id: Uuid,
    pub policy_version: String,
    pub constraints: BTreeMap<String, Value>,
    pub trace: DecisionTrace,
    pub issued_at: Timestamp,
    pub expires_at: Option<Timestamp>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_hash_stable_across_construction_order() {
        let a = PdpRequest::new("r1", "fs.write", TenantId::new("acme"))
            .with_context("args_hash", json!("aa"))
            .with_context("budget", json!(10));
        let b = PdpRequest::new("r1", "fs.write", TenantId::new("acme"))
            .with_context("budget", json!(10))
            .with_context("args_hash", json!("aa"));
        assert_eq!(a.canonical_hash().unwrap(), b.canonical_hash().unwrap());
    }

    #[test]
    fn issued_at_follows_declared_time_source() {
        let req = PdpRequest::new("r1", "fs.write", TenantId::new("acme"))
            .with_context("decision_time_source", json!("committed_at"))
            .with_context("committed_at", json!(1_700_000_000_000i64));
        assert_eq!(req.resolve_issued_at(99), 1_700_000_000_000);

        let bare = PdpRequest::new("r1", "fs.write", TenantId::new("acme"));
        assert_eq!(bare.resolve_issued_at(99), 99);
    }

    #[test]
    fn domain_is_prefix_before_dot() {
        assert_eq!(PdpRequest::new("r", "fs.write", TenantId::new("t")).domain(), "fs");
        assert_eq!(PdpRequest::new("r", "solo", TenantId::new("t")).domain(), "solo");
    }
}
