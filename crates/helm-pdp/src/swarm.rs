//! Domain-decomposed parallel evaluation.
//!
//! A batch is split by effect domain, each domain evaluated as one
//! sub-batch under a semaphore bound, and the sub-decisions merged into a
//! single verdict. Domain groups are processed in lexicographic order and
//! responses are indexed back into original request order, so a batch
//! evaluates identically regardless of scheduling.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use helm_core::{Decision, EngineSubtrace, HelmError, MAX_PARALLEL_PDPS};

use crate::engine::Pdp;
use crate::request::{PdpRequest, PdpResponse};

/// How sub-decisions combine into the batch verdict.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeStrategy {
    /// DENY wins absolutely, then any approval/evidence requirement,
    /// else ALLOW.
    Strict,
    /// Fixed numeric priority:
    /// DENY > REQUIRE_APPROVAL > REQUIRE_EVIDENCE > DEFER > ALLOW.
    Priority,
}

impl MergeStrategy {
    pub fn merge(self, decisions: &[Decision]) -> Decision {
        if decisions.is_empty() {
            // An empty batch decides nothing; fail closed.
            return Decision::Deny;
        }
        match self {
            MergeStrategy::Strict => {
                if decisions.contains(&Decision::Deny) {
                    Decision::Deny
                } else if decisions.contains(&Decision::RequireApproval) {
                    Decision::RequireApproval
                } else if decisions.contains(&Decision::RequireEvidence) {
                    Decision::RequireEvidence
                } else if decisions.contains(&Decision::Defer) {
                    Decision::Defer
                } else {
                    Decision::Allow
                }
            }
            MergeStrategy::Priority => decisions
                .iter()
                .copied()
                .max_by_key(|d| d.priority())
                .unwrap_or(Decision::Deny),
        }
    }
}

/// Critical-path accounting: `T = Σ_t (S_main(t) + max_i S_sub_i(t))`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ParlMetrics {
    pub batches: u64,
    pub critical_path_micros: u64,
}

/// Result of one batch: responses in original request order plus the
/// merged verdict.
#[derive(Debug)]
pub struct BatchOutcome {
    pub responses: Vec<PdpResponse>,
    pub merged: Decision,
    /// Domains evaluated, lexicographically sorted.
    pub domains: Vec<String>,
    /// One subtrace per sub-evaluation, grouped by domain in domain
    /// order; feeds the merged decision's trace.
    pub subtraces: Vec<EngineSubtrace>,
}

pub struct SwarmPdp {
    pdp: Arc<dyn Pdp>,
    strategy: MergeStrategy,
    limiter: Arc<Semaphore>,
    metrics: Mutex<ParlMetrics>,
}

impl SwarmPdp {
    pub fn new(pdp: Arc<dyn Pdp>, strategy: MergeStrategy) -> Self {
        Self::with_parallelism(pdp, strategy, MAX_PARALLEL_PDPS)
    }

    pub fn with_parallelism(
        pdp: Arc<dyn Pdp>,
        strategy: MergeStrategy,
        max_parallel: usize,
    ) -> Self {
        Self {
            pdp,
            strategy,
            limiter: Arc::new(Semaphore::new(max_parallel.max(1))),
            metrics: Mutex::new(ParlMetrics::default()),
        }
    }

    pub fn metrics(&self) -> ParlMetrics {
        *self.metrics.lock().expect("swarm metrics lock poisoned")
    }

    /// Evaluate a batch. Sub-evaluations observe the cancellation token;
    /// a cancelled batch yields DENY verdicts, never partial state.
    pub async fn evaluate_batch(
        &self,
        requests: Vec<PdpRequest>,
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome, HelmError> {
        let main_start = Instant::now();
        let total = requests.len();

        // Group request indices by effect domain, sorted by domain name.
        let mut groups: BTreeMap<String, Vec<(usize, PdpRequest)>> = BTreeMap::new();
        for (idx, req) in requests.into_iter().enumerate() {
            groups.entry(req.domain().to_string()).or_default().push((idx, req));
        }
        let domains: Vec<String> = groups.keys().cloned().collect();
        let main_elapsed = main_start.elapsed();

        let mut handles = Vec::with_capacity(groups.len());
        for (domain, group) in groups {
            let pdp = Arc::clone(&self.pdp);
            let limiter = Arc::clone(&self.limiter);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                let _permit = limiter
                    .acquire_owned()
                    .await
                    .expect("swarm semaphore closed");
                let sub_start = Instant::now();
                let mut out = Vec::with_capacity(group.len());
                for (idx, req) in group {
                    let resp = pdp.evaluate(&req, &cancel).await?;
                    out.push((idx, resp));
                }
                debug!(domain = %domain, count = out.len(), "swarm sub-batch evaluated");
                Ok::<_, HelmError>((domain, out, sub_start.elapsed()))
            }));
        }

        let mut slots: Vec<Option<PdpResponse>> = (0..total).map(|_| None).collect();
        let mut subtraces = Vec::with_capacity(total);
        let mut max_sub = std::time::Duration::ZERO;
        for handle in handles {
            let (domain, indexed, sub_elapsed) = handle
                .await
                .map_err(|e| HelmError::Other(format!("swarm task failed: {e}")))??;
            max_sub = max_sub.max(sub_elapsed);
            for (idx, resp) in indexed {
                subtraces.push(EngineSubtrace {
                    engine: domain.clone(),
                    decision: resp.decision,
                    trace_hash: resp.trace.evaluation_graph_hash.clone(),
                });
                slots[idx] = Some(resp);
            }
        }

        let responses: Vec<PdpResponse> = slots
            .into_iter()
            .map(|s| s.ok_or_else(|| HelmError::Other("missing sub-response".into())))
            .collect::<Result<_, _>>()?;

        let decisions: Vec<Decision> = responses.iter().map(|r| r.decision).collect();
        let merged = self.strategy.merge(&decisions);

        {
            let mut metrics = self.metrics.lock().expect("swarm metrics lock poisoned");
            metrics.batches += 1;
            metrics.critical_path_micros +=
                (main_elapsed + max_sub).as_micros() as u64;
        }

        Ok(BatchOutcome { responses, merged, domains, subtraces })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Clock, LocalPdp};
    use crate::expr::{BinOp, Expr};
    use crate::rules::{Rule, RuleSet};
    use helm_core::TenantId;
    use serde_json::json;
    use std::collections::BTreeMap as Map;

    fn fixed_clock() -> Clock {
        Arc::new(|| 1_700_000_000_000)
    }

    fn swarm(strategy: MergeStrategy) -> SwarmPdp {
        let mut rules = RuleSet::new("policy-v1");
        rules
            .register(Rule {
                rule_id: "allow.fs.cheap".into(),
                effect_pattern: "fs.read".into(),
                condition: Some(Expr::Binary {
                    op: BinOp::Le,
                    left: Box::new(Expr::Var("cost".into())),
                    right: Box::new(Expr::Int(10)),
                }),
                decision: Decision::Allow,
                constraints: Map::new(),
            })
            .unwrap();
        rules
            .register(Rule {
                rule_id: "approve.net".into(),
                effect_pattern: "net.fetch".into(),
                condition: None,
                decision: Decision::RequireApproval,
                constraints: Map::new(),
            })
            .unwrap();
        let pdp = Arc::new(LocalPdp::with_clock(rules, fixed_clock()));
        SwarmPdp::with_parallelism(pdp, strategy, 2)
    }

    fn req(id: &str, effect: &str, cost: i64) -> PdpRequest {
        PdpRequest::new(id, effect, TenantId::new("acme")).with_context("cost", json!(cost))
    }

    #[tokio::test]
    async fn responses_return_in_request_order() {
        let swarm = swarm(MergeStrategy::Strict);
        let cancel = CancellationToken::new();
        let outcome = swarm
            .evaluate_batch(
                vec![req("a", "net.fetch", 1), req("b", "fs.read", 1), req("c", "fs.read", 99)],
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(outcome.domains, vec!["fs".to_string(), "net".to_string()]);
        assert_eq!(outcome.responses[0].decision, Decision::RequireApproval);
        assert_eq!(outcome.responses[1].decision, Decision::Allow);
        assert_eq!(outcome.responses[2].decision, Decision::Deny);
        assert_eq!(outcome.merged, Decision::Deny);
        assert_eq!(outcome.subtraces.len(), 3);
        assert!(outcome.subtraces.iter().any(|s| s.engine == "net"));
        assert_eq!(swarm.metrics().batches, 1);
    }

    #[tokio::test]
    async fn strict_merge_without_deny_takes_approval() {
        let swarm = swarm(MergeStrategy::Strict);
        let cancel = CancellationToken::new();
        let outcome = swarm
            .evaluate_batch(vec![req("a", "net.fetch", 1), req("b", "fs.read", 1)], &cancel)
            .await
            .unwrap();
        assert_eq!(outcome.merged, Decision::RequireApproval);
    }

    #[test]
    fn priority_merge_order() {
        let merge = MergeStrategy::Priority;
        assert_eq!(
            merge.merge(&[Decision::Allow, Decision::Defer, Decision::RequireEvidence]),
            Decision::RequireEvidence
        );
        assert_eq!(merge.merge(&[Decision::Allow, Decision::Deny]), Decision::Deny);
        assert_eq!(merge.merge(&[]), Decision::Deny);
    }

    #[tokio::test]
    async fn cancelled_batch_yields_denies() {
        let swarm = swarm(MergeStrategy::Strict);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = swarm
            .evaluate_batch(vec![req("a", "fs.read", 1)], &cancel)
            .await
            .unwrap();
        assert_eq!(outcome.merged, Decision::Deny);
    }
}
