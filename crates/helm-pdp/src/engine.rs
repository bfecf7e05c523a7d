use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use helm_core::{
    canonical_hash, decision_id_for_request, Decision, DecisionTrace, HelmError, Timestamp,
    DECISION_TTL_MS, RULE_CONTEXT_CANCELLATION, RULE_DEFAULT_DENY,
};

use crate::expr::eval_bool;
use crate::request::{PdpRequest, PdpResponse};
use crate::rules::RuleSet;
use crate::trace::{trace_hash, TraceStep};

/// Injectable time source for `issued_at` when the request declares no
/// `decision_time_source`. Reproducibility tests pin this to a constant.
pub type Clock = Arc<dyn Fn() -> Timestamp + Send + Sync>;

/// Policy decision point. One trait, one implementation per engine,
/// composed at construction.
#[async_trait]
pub trait Pdp: Send + Sync {
    async fn evaluate(
        &self,
        request: &PdpRequest,
        cancel: &CancellationToken,
    ) -> Result<PdpResponse, HelmError>;
}

/// In-process PDP evaluating a mutex-guarded rule set.
///
/// Contract: identical request bytes under an identical policy version
/// produce identical responses: same decision, decision id, fired rules,
/// and evaluation graph hash. `issued_at` follows the request's declared
/// time source and only falls back to the injected clock.
pub struct LocalPdp {
    rules: Mutex<RuleSet>,
    clock: Clock,
}

impl LocalPdp {
    pub fn new(rules: RuleSet) -> Self {
        Self {
            rules: Mutex::new(rules),
            clock: Arc::new(|| chrono::Utc::now().timestamp_millis()),
        }
    }

    pub fn with_clock(rules: RuleSet, clock: Clock) -> Self {
        Self { rules: Mutex::new(rules), clock }
    }

    pub fn register_rule(&self, rule: crate::rules::Rule) -> Result<(), HelmError> {
        self.rules.lock().expect("rule set lock poisoned").register(rule)
    }

    /// Auto-register an observe-allow rule when the effect has none.
    pub fn ensure_rule(&self, effect: &str) {
        self.rules.lock().expect("rule set lock poisoned").ensure_rule(effect);
    }

    pub fn policy_version(&self) -> String {
        self.rules.lock().expect("rule set lock poisoned").policy_version.clone()
    }

    fn deny_response(
        &self,
        request: &PdpRequest,
        rule: &str,
        policy_version: String,
    ) -> Result<PdpResponse, HelmError> {
        let request_hash = request.canonical_hash()?;
        let issued_at = request.resolve_issued_at((self.clock)());
        Ok(PdpResponse {
            decision: Decision::Deny,
            decision_id: decision_id_for_request(&request_hash),
            policy_version,
            constraints: BTreeMap::new(),
            trace: DecisionTrace {
                evaluation_graph_hash: trace_hash(&[]),
                rules_fired: vec![rule.to_string()],
                inputs_hashes: inputs_hashes(request)?,
                engine_subtraces: vec![],
            },
            issued_at,
            expires_at: Some(issued_at + DECISION_TTL_MS),
        })
    }
}

fn inputs_hashes(request: &PdpRequest) -> Result<BTreeMap<String, String>, HelmError> {
    let mut out = BTreeMap::new();
    for (name, value) in &request.context {
        out.insert(name.clone(), hex::encode(canonical_hash(value)?));
    }
    Ok(out)
}

#[async_trait]
impl Pdp for LocalPdp {
    async fn evaluate(
        &self,
        request: &PdpRequest,
        cancel: &CancellationToken,
    ) -> Result<PdpResponse, HelmError> {
        // Cancellation is checked before any state is touched; a cancelled
        // caller gets a first-class DENY verdict, never partial state.
        if cancel.is_cancelled() {
            let version = self.policy_version();
            return self.deny_response(request, RULE_CONTEXT_CANCELLATION, version);
        }

        let rules = self.rules.lock().expect("rule set lock poisoned").clone();

        let request_hash = request.canonical_hash()?;
        let issued_at = request.resolve_issued_at((self.clock)());

        let mut steps: Vec<TraceStep> = Vec::new();
        let mut fired: Vec<String> = Vec::new();
        let mut outcome: Option<(Decision, BTreeMap<String, Value>)> = None;

        for rule in rules.matching(&request.effect) {
            let result = match &rule.condition {
                Some(expr) => eval_bool(expr, &request.context).map_err(|e| {
                    HelmError::Evaluation { code: e.code, message_hash: e.message_hash }
                })?,
                None => true,
            };
            steps.push(TraceStep::new(
                steps.len() as u32 + 1,
                rule.expression_text(),
                if result { b"true" } else { b"false" },
            ));
            if result {
                fired.push(rule.rule_id.clone());
                outcome = Some((rule.decision, rule.constraints.clone()));
                break;
            }
        }

        // Fail-closed default: absence of a matching rule is a denial.
        let (decision, constraints) = outcome.unwrap_or_else(|| {
            fired.push(RULE_DEFAULT_DENY.to_string());
            (Decision::Deny, BTreeMap::new())
        });

        debug!(
            request_id = %request.request_id,
            effect = %request.effect,
            decision = %decision,
            "pdp evaluated"
        );

        Ok(PdpResponse {
            decision,
            decision_id: decision_id_for_request(&request_hash),
            policy_version: rules.policy_version.clone(),
            constraints,
            trace: DecisionTrace {
                evaluation_graph_hash: trace_hash(&steps),
                rules_fired: fired,
                inputs_hashes: inputs_hashes(request)?,
                engine_subtraces: vec![],
            },
            issued_at,
            expires_at: Some(issued_at + DECISION_TTL_MS),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{BinOp, Expr};
    use crate::rules::Rule;
    use helm_core::TenantId;
    use serde_json::json;

    fn fixed_clock() -> Clock {
        Arc::new(|| 1_700_000_000_000)
    }

    fn ruleset() -> RuleSet {
        let mut rules = RuleSet::new("policy-v1");
        rules
            .register(Rule {
                rule_id: "allow.small.spend".into(),
                effect_pattern: "tool.execute".into(),
                condition: Some(Expr::Binary {
                    op: BinOp::Le,
                    left: Box::new(Expr::Var("cost".into())),
                    right: Box::new(Expr::Int(100)),
                }),
                decision: Decision::Allow,
                constraints: BTreeMap::new(),
            })
            .unwrap();
        rules
    }

    fn request(cost: i64) -> PdpRequest {
        PdpRequest::new("r1", "tool.execute", TenantId::new("acme"))
            .with_context("cost", json!(cost))
    }

    #[tokio::test]
    async fn identical_requests_identical_responses() {
        let pdp = LocalPdp::with_clock(ruleset(), fixed_clock());
        let cancel = CancellationToken::new();
        let a = pdp.evaluate(&request(50), &cancel).await.unwrap();
        let b = pdp.evaluate(&request(50), &cancel).await.unwrap();
        assert_eq!(a.decision, b.decision);
        assert_eq!(a.decision_id, b.decision_id);
        assert_eq!(a.trace.evaluation_graph_hash, b.trace.evaluation_graph_hash);
        assert_eq!(a.trace.rules_fired, b.trace.rules_fired);
        assert_eq!(a.issued_at, b.issued_at);
    }

    #[tokio::test]
    async fn no_matching_rule_denies() {
        let pdp = LocalPdp::with_clock(ruleset(), fixed_clock());
        let cancel = CancellationToken::new();
        let req = PdpRequest::new("r2", "fs.delete", TenantId::new("acme"));
        let resp = pdp.evaluate(&req, &cancel).await.unwrap();
        assert_eq!(resp.decision, Decision::Deny);
        assert_eq!(resp.trace.rules_fired, vec![RULE_DEFAULT_DENY.to_string()]);
    }

    #[tokio::test]
    async fn unmatched_condition_falls_through_to_default_deny() {
        let pdp = LocalPdp::with_clock(ruleset(), fixed_clock());
        let cancel = CancellationToken::new();
        let resp = pdp.evaluate(&request(5_000), &cancel).await.unwrap();
        assert_eq!(resp.decision, Decision::Deny);
        assert_eq!(resp.trace.rules_fired, vec![RULE_DEFAULT_DENY.to_string()]);
        // The evaluated-but-false rule still appears in the step trace.
        assert_ne!(resp.trace.evaluation_graph_hash, trace_hash(&[]));
    }

    #[tokio::test]
    async fn cancelled_token_denies_with_marker() {
        let pdp = LocalPdp::with_clock(ruleset(), fixed_clock());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let resp = pdp.evaluate(&request(50), &cancel).await.unwrap();
        assert_eq!(resp.decision, Decision::Deny);
        assert_eq!(resp.trace.rules_fired, vec![RULE_CONTEXT_CANCELLATION.to_string()]);
    }

    #[tokio::test]
    async fn evaluation_error_surfaces_with_code() {
        let mut rules = RuleSet::new("policy-v1");
        rules
            .register(Rule {
                rule_id: "div".into(),
                effect_pattern: "tool.execute".into(),
                condition: Some(Expr::Binary {
                    op: BinOp::Eq,
                    left: Box::new(Expr::Binary {
                        op: BinOp::Div,
                        left: Box::new(Expr::Int(1)),
                        right: Box::new(Expr::Var("cost".into())),
                    }),
                    right: Box::new(Expr::Int(1)),
                }),
                decision: Decision::Allow,
                constraints: BTreeMap::new(),
            })
            .unwrap();
        let pdp = LocalPdp::with_clock(rules, fixed_clock());
        let cancel = CancellationToken::new();
        let err = pdp.evaluate(&request(0), &cancel).await.unwrap_err();
        assert!(matches!(err, HelmError::Evaluation { code: "CEL_DIV_ZERO", .. }));
    }
}
