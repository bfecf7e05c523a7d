//! Gate composition: one `govern` call runs every gate in order and
//! receipts the outcome on the tenant's proof graph.
//!
//! The bridge never executes the tool. On ALLOW it mints a signed
//! execution intent for the external effector; the caller reports the
//! outcome afterwards through `submit_effect`, which appends the EFFECT
//! node and runs the after-phase evidence check.

use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use helm_core::{
    canonical_hash, DecisionRecord, Decision, DenialReason, EvidencePhase, EvidenceSubmission,
    EvidenceVerdict, ExecutionIntent, GovernResult, HelmError, NodeHash, Principal, TenantId,
    Timestamp, DECISION_ID_NAMESPACE, DEFAULT_DAILY_LIMIT, DEFAULT_MONTHLY_LIMIT,
};
use helm_crypto::{KeyPair, KeyProvider, Kms, LocalKeyProvider};
use helm_evidence::EvidenceEngine;
use helm_govern::{
    BlockingKind, DenialLedger, Envelope, JurisdictionQuery, JurisdictionResolver, LivenessManager,
};
use helm_pdp::{
    BatchOutcome, Clock, LocalPdp, Pdp, PdpRequest, RuleSet, SwarmPdp,
};
use helm_proofgraph::{NodeKind, ProofGraph, ProofGraphRegistry, ProofNode};
use helm_risk::{autonomy_level, AutonomyGate, BudgetBook, RiskAccountant};
use helm_store::Store;
use helm_trust::{TrustEvent, TrustEventType, TrustRegistry};

use crate::config::KernelConfig;

/// One governed action proposal. The optional fields opt the request into
/// the corresponding gates: an action class runs the evidence contract,
/// a risk action type runs the envelope accountant, a region runs the
/// jurisdiction resolver.
#[derive(Clone, Debug)]
pub struct GovernRequest {
    pub tenant: TenantId,
    pub principal: Principal,
    pub tool: String,
    pub args_hash: String,
    /// Reserved spend in minor currency units.
    pub cost: u64,
    pub action_class: Option<String>,
    pub risk_action_type: Option<String>,
    pub region: Option<String>,
    pub evidence: Vec<EvidenceSubmission>,
    /// Provenance of the content driving this action; segments with
    /// injection indicators refuse the action outright.
    pub envelope: Option<Envelope>,
    /// A pending approval id from an earlier REQUIRE_APPROVAL verdict.
    /// Resolving it converts that verdict into an allow.
    pub approval_token: Option<String>,
    /// Model uncertainty in `[0, 1]`; drives the autonomy gate when the
    /// risk envelope carries a level.
    pub uncertainty: Option<f64>,
}

impl GovernRequest {
    pub fn new(tenant: TenantId, principal: Principal, tool: &str, args_hash: &str) -> Self {
        Self {
            tenant,
            principal,
            tool: tool.to_string(),
            args_hash: args_hash.to_string(),
            cost: 0,
            action_class: None,
            risk_action_type: None,
            region: None,
            evidence: Vec::new(),
            envelope: None,
            approval_token: None,
            uncertainty: None,
        }
    }

    pub fn with_cost(mut self, cost: u64) -> Self {
        self.cost = cost;
        self
    }
}

/// Outcome of an effect submission.
#[derive(Clone, Debug)]
pub struct EffectResult {
    pub node_id: String,
    pub evidence: Option<EvidenceVerdict>,
}

pub struct KernelBridge {
    config: KernelConfig,
    graphs: ProofGraphRegistry,
    pdp: Arc<LocalPdp>,
    swarm: SwarmPdp,
    budgets: BudgetBook,
    risk: RiskAccountant,
    evidence: EvidenceEngine,
    jurisdiction: JurisdictionResolver,
    denials: DenialLedger,
    liveness: LivenessManager,
    trust: TrustRegistry,
    kms: Kms,
    clock: Clock,
    store: Option<Arc<dyn Store>>,
}

impl KernelBridge {
    pub fn new(master: KeyPair, config: KernelConfig) -> Self {
        let clock: Clock = Arc::new(|| chrono::Utc::now().timestamp_millis());
        Self::with_clock(master, config, clock)
    }

    /// Construct with an injected clock. Reproducibility tests pin it.
    pub fn with_clock(master: KeyPair, config: KernelConfig, clock: Clock) -> Self {
        let pdp = Arc::new(LocalPdp::with_clock(
            RuleSet::new(config.policy_version.clone()),
            Arc::clone(&clock),
        ));
        let swarm = SwarmPdp::with_parallelism(
            Arc::clone(&pdp) as Arc<dyn Pdp>,
            config.merge_strategy,
            config.max_parallel_pdps,
        );
        Self {
            graphs: ProofGraphRegistry::new(),
            swarm,
            budgets: BudgetBook::new(),
            risk: RiskAccountant::new(config.risk_window),
            evidence: EvidenceEngine::empty(),
            jurisdiction: JurisdictionResolver::new(),
            denials: DenialLedger::new(),
            liveness: LivenessManager::new(),
            trust: TrustRegistry::new(),
            kms: Kms::new(master),
            pdp,
            clock,
            config,
            store: None,
        }
    }

    /// Attach a durable backend. Every node appended from this point is
    /// persisted before the call that produced it returns.
    pub fn attach_store(&mut self, store: Arc<dyn Store>) {
        self.store = Some(store);
    }

    fn persist(&self, node: &ProofNode) -> Result<(), HelmError> {
        if let Some(store) = &self.store {
            store.store_node(node)?;
        }
        Ok(())
    }

    // ── Component accessors ──────────────────────────────────────────────────

    pub fn budgets(&self) -> &BudgetBook {
        &self.budgets
    }

    pub fn risk(&self) -> &RiskAccountant {
        &self.risk
    }

    pub fn evidence(&self) -> &EvidenceEngine {
        &self.evidence
    }

    pub fn jurisdiction(&self) -> &JurisdictionResolver {
        &self.jurisdiction
    }

    pub fn denials(&self) -> &DenialLedger {
        &self.denials
    }

    pub fn liveness(&self) -> &LivenessManager {
        &self.liveness
    }

    pub fn trust(&self) -> &TrustRegistry {
        &self.trust
    }

    pub fn pdp(&self) -> &LocalPdp {
        &self.pdp
    }

    pub fn kms(&self) -> &Kms {
        &self.kms
    }

    pub fn graph(&self, tenant: &TenantId) -> Arc<ProofGraph> {
        self.graphs.graph(tenant)
    }

    fn now(&self) -> Timestamp {
        (self.clock)()
    }

    /// Tenants exist on first use: absent budget rows materialize with the
    /// default limits before the gate runs.
    fn ensure_tenant(&self, tenant: &TenantId) {
        if self.budgets.get(tenant).is_err() {
            self.budgets
                .set_limits(tenant, DEFAULT_DAILY_LIMIT, DEFAULT_MONTHLY_LIMIT);
        }
    }

    /// Record one refusal: denial receipt plus a signed ATTESTATION node.
    #[allow(clippy::too_many_arguments)]
    fn refuse(
        &self,
        graph: &ProofGraph,
        signer: &LocalKeyProvider,
        req: &GovernRequest,
        now: Timestamp,
        decision: Decision,
        reason: DenialReason,
        reason_code: &str,
        details: &str,
        decision_id: Option<Uuid>,
    ) -> Result<GovernResult, HelmError> {
        let receipt = self.denials.record(
            now,
            req.principal.clone(),
            Some(req.tenant.clone()),
            &req.tool,
            reason,
            details,
            Some(self.config.policy_version.clone()),
            None,
        )?;
        let attestation = graph.append_signed(
            NodeKind::Attestation,
            json!({
                "verdict": decision,
                "reason_code": reason_code,
                "receipt_id": receipt.receipt_id,
                "decision_id": decision_id,
            }),
            req.principal.as_str(),
            now,
            signer,
        )?;
        self.persist(&attestation)?;
        warn!(tool = %req.tool, tenant = %req.tenant, reason_code, "governed action refused");
        Ok(GovernResult {
            decision,
            intent: None,
            reason_code: reason_code.to_string(),
            node_id: attestation.node_hash.to_hex(),
            allowed: false,
        })
    }

    /// Govern one proposed action through every gate.
    pub async fn govern(
        &self,
        cancel: &CancellationToken,
        req: GovernRequest,
    ) -> Result<GovernResult, HelmError> {
        // Cancellation before any state is touched.
        if cancel.is_cancelled() {
            return Err(HelmError::Cancelled);
        }
        let now = self.now();
        self.ensure_tenant(&req.tenant);
        let graph = self.graphs.graph(&req.tenant);
        let signer = self.kms.derive(&req.tenant)?;

        // ── INTENT is receipted before any gate can refuse ───────────────────
        let intent_node = graph.append_signed(
            NodeKind::Intent,
            json!({"tool": req.tool, "args_hash": req.args_hash, "tenant": req.tenant}),
            req.principal.as_str(),
            now,
            signer.as_ref(),
        )?;
        self.persist(&intent_node)?;

        // ── Instruction firewall ─────────────────────────────────────────────
        if let Some(envelope) = &req.envelope {
            if envelope.has_injection_indicators() {
                let confidence = envelope.max_injection_confidence();
                return self.refuse(
                    &graph, &signer, &req, now,
                    Decision::Deny, DenialReason::Provenance, "INJECTION_DETECTED",
                    &format!("injection indicators present (max confidence {confidence:.2})"),
                    None,
                );
            }
        }

        // ── Budget gate ──────────────────────────────────────────────────────
        if let Err(e) = self.budgets.check_and_reserve(&req.tenant, req.cost, now) {
            return self.refuse(
                &graph, &signer, &req, now,
                Decision::Deny, DenialReason::Budget, "BUDGET_EXHAUSTED",
                &e.to_string(), None,
            );
        }

        // ── Policy gate ──────────────────────────────────────────────────────
        if self.config.observe_mode {
            self.pdp.ensure_rule(&req.tool);
        }
        let pdp_request = PdpRequest::new(
            format!("govern:{}:{}:{}", req.tenant, req.tool, req.args_hash),
            req.tool.clone(),
            req.tenant.clone(),
        )
        .with_context("action", json!("EXECUTE_TOOL"))
        .with_context("args_hash", json!(req.args_hash))
        .with_context("cost", json!(req.cost));

        let response = match self.pdp.evaluate(&pdp_request, cancel).await {
            Ok(response) => response,
            Err(e) => {
                // Fail closed: an erroring PDP is a missing decision.
                return self.refuse(
                    &graph, &signer, &req, now,
                    Decision::Deny, DenialReason::Policy, "POLICY_DECISION_MISSING",
                    &format!("policy evaluation failed: {e}"), None,
                );
            }
        };
        let decision_id = response.decision_id;

        // A resolved approval converts REQUIRE_APPROVAL into an allow.
        // The token is the pending liveness id handed out by the earlier
        // verdict; resolution is single-use and only valid while PENDING.
        let mut decision = response.decision;
        if decision == Decision::RequireApproval {
            if let Some(token) = &req.approval_token {
                if self.liveness.resolve(token).is_ok() {
                    info!(tool = %req.tool, token = %token, "approval resolved; continuing as allow");
                    decision = Decision::Allow;
                }
            }
        }

        match decision {
            Decision::Allow => {}
            Decision::Deny => {
                let details = if response.trace.rules_fired.iter().any(|r| r == helm_core::RULE_DEFAULT_DENY) {
                    format!("policy violation [E3]: tool {} is not explicitly allowed", req.tool)
                } else {
                    format!("policy violation: denied by {:?}", response.trace.rules_fired)
                };
                return self.refuse(
                    &graph, &signer, &req, now,
                    Decision::Deny, DenialReason::Policy, "POLICY_DENY",
                    &details, Some(decision_id),
                );
            }
            Decision::RequireApproval => {
                let pending = self.liveness.open(BlockingKind::Approval, now);
                return self.refuse(
                    &graph, &signer, &req, now,
                    Decision::RequireApproval, DenialReason::Policy, "POLICY_REQUIRE_APPROVAL",
                    &format!("approval required; pending as {}", pending.id),
                    Some(decision_id),
                );
            }
            Decision::RequireEvidence => {
                return self.refuse(
                    &graph, &signer, &req, now,
                    Decision::RequireEvidence, DenialReason::Verification, "POLICY_REQUIRE_EVIDENCE",
                    "evidence required by policy", Some(decision_id),
                );
            }
            Decision::Defer => {
                return self.refuse(
                    &graph, &signer, &req, now,
                    Decision::Defer, DenialReason::Policy, "POLICY_DEFER",
                    "decision deferred", Some(decision_id),
                );
            }
        }

        // ── Evidence contract pre-check ──────────────────────────────────────
        if let Some(action_class) = &req.action_class {
            let verdict = self
                .evidence
                .check(action_class, EvidencePhase::Before, &req.evidence);
            if !verdict.satisfied {
                return self.refuse(
                    &graph, &signer, &req, now,
                    Decision::RequireEvidence, DenialReason::Verification, "EVIDENCE_MISSING",
                    &format!("missing evidence: {:?}", verdict.missing),
                    Some(decision_id),
                );
            }
        }

        // ── Autonomy gate ────────────────────────────────────────────────────
        if let (Some(action_type), Some(uncertainty)) = (&req.risk_action_type, req.uncertainty) {
            if let Some(envelope) = self.risk.envelope(action_type) {
                let level = autonomy_level(uncertainty);
                if !AutonomyGate::permits(level, envelope.level) {
                    return self.refuse(
                        &graph, &signer, &req, now,
                        Decision::RequireApproval, DenialReason::Envelope, "AUTONOMY_INSUFFICIENT",
                        &format!(
                            "autonomy level {level} below threshold for {:?} risk",
                            envelope.level
                        ),
                        Some(decision_id),
                    );
                }
            }
        }

        // ── Risk envelope gate ───────────────────────────────────────────────
        if let Some(action_type) = &req.risk_action_type {
            if let Err(e) = self.risk.check_and_record(action_type, req.cost, now) {
                let code = match &e {
                    HelmError::RiskAggregateExceeded { .. } => "RISK_AGGREGATE_EXCEEDED",
                    _ => "RISK_CAP_EXCEEDED",
                };
                return self.refuse(
                    &graph, &signer, &req, now,
                    Decision::Deny, e.denial_reason(), code,
                    &e.to_string(), Some(decision_id),
                );
            }
        }

        // ── Jurisdiction gate ────────────────────────────────────────────────
        if let Some(region) = &req.region {
            let query = JurisdictionQuery {
                entity: req.principal.to_string(),
                counterparty: None,
                data_subject: None,
                service_region: region.clone(),
            };
            if let Err(e) = self.jurisdiction.resolve(query) {
                return self.refuse(
                    &graph, &signer, &req, now,
                    Decision::Deny, DenialReason::Jurisdiction, "JURISDICTION_MISSING",
                    &e.to_string(), Some(decision_id),
                );
            }
        }

        // ── Mint the signed execution intent ─────────────────────────────────
        let intent_id = Uuid::new_v5(
            &DECISION_ID_NAMESPACE,
            &canonical_hash(&json!({
                "decision_id": decision_id,
                "tool": req.tool,
                "args_hash": req.args_hash,
            }))?,
        );
        let mut intent = ExecutionIntent {
            id: intent_id,
            tenant: req.tenant.clone(),
            target_capability: req.tool.clone(),
            payload: json!({"args_hash": req.args_hash}),
            decision_id,
            signature: None,
        };
        intent.signature = Some(signer.sign_hex(&intent.signing_bytes()?));

        // The verdict itself is a signed artifact, carried inside the
        // attestation so the proof graph commits to the full trace.
        let mut record = DecisionRecord {
            id: decision_id,
            tenant: req.tenant.clone(),
            decision: Decision::Allow,
            policy_version: response.policy_version.clone(),
            constraints: response.constraints.clone(),
            trace: response.trace.clone(),
            issued_at: response.issued_at,
            expires_at: response.expires_at,
            signature: None,
        };
        record.signature = Some(signer.sign_hex(&record.signing_bytes()?));

        let attestation = graph.append_signed(
            NodeKind::Attestation,
            json!({
                "verdict": Decision::Allow,
                "reason_code": "OK",
                "decision_id": decision_id,
                "intent_id": intent.id,
                "decision_record": record,
            }),
            req.principal.as_str(),
            now,
            signer.as_ref(),
        )?;
        self.persist(&attestation)?;
        info!(tool = %req.tool, tenant = %req.tenant, decision_id = %decision_id, "governed action allowed");

        Ok(GovernResult {
            decision: Decision::Allow,
            intent: Some(intent),
            reason_code: "OK".to_string(),
            node_id: attestation.node_hash.to_hex(),
            allowed: true,
        })
    }

    /// Report the outcome of an executed action: appends the EFFECT node
    /// referencing its attestation and runs the after-phase evidence
    /// check. Unsatisfied after-phase evidence is receipted but the
    /// effect record stands; the action already happened.
    pub fn submit_effect(
        &self,
        tenant: &TenantId,
        principal: &Principal,
        attestation_node: &NodeHash,
        outcome: Value,
        action_class: Option<&str>,
        submissions: &[EvidenceSubmission],
    ) -> Result<EffectResult, HelmError> {
        let now = self.now();
        let graph = self.graphs.graph(tenant);
        if graph.get(attestation_node).is_none() {
            return Err(HelmError::UnknownNode(attestation_node.to_hex()));
        }
        let signer = self.kms.derive(tenant)?;
        let effect = graph.append_signed(
            NodeKind::Effect,
            json!({"attestation_node": attestation_node, "outcome": outcome}),
            principal.as_str(),
            now,
            signer.as_ref(),
        )?;
        self.persist(&effect)?;

        let verdict = match action_class {
            Some(class) => {
                let verdict = self.evidence.check(class, EvidencePhase::After, submissions);
                if !verdict.satisfied {
                    self.denials.record(
                        now,
                        principal.clone(),
                        Some(tenant.clone()),
                        &format!("{class}:after_evidence"),
                        DenialReason::Verification,
                        &format!("missing after-phase evidence: {:?}", verdict.missing),
                        None,
                        None,
                    )?;
                }
                Some(verdict)
            }
            None => None,
        };

        Ok(EffectResult { node_id: effect.node_hash.to_hex(), evidence: verdict })
    }

    /// Batch evaluation through the swarm; the merged verdict is receipted
    /// as a MERGE_DECISION node on the tenant's graph.
    pub async fn evaluate_batch(
        &self,
        cancel: &CancellationToken,
        tenant: &TenantId,
        requests: Vec<PdpRequest>,
    ) -> Result<BatchOutcome, HelmError> {
        let outcome = self.swarm.evaluate_batch(requests, cancel).await?;
        let now = self.now();
        let graph = self.graphs.graph(tenant);
        let signer = self.kms.derive(tenant)?;
        let node = graph.append_signed(
            NodeKind::MergeDecision,
            json!({
                "merged": outcome.merged,
                "domains": outcome.domains,
                "decision_ids": outcome.responses.iter().map(|r| r.decision_id).collect::<Vec<_>>(),
                "engine_subtraces": outcome.subtraces,
            }),
            "swarm",
            now,
            signer.as_ref(),
        )?;
        self.persist(&node)?;
        Ok(outcome)
    }

    /// Append a TRUST_EVENT node and fold it into the registry. The
    /// event's lamport is the node's, so chain order and key resolution
    /// agree.
    pub fn apply_trust_event(
        &self,
        tenant: &TenantId,
        event_type: TrustEventType,
        key_id: &str,
        public_key: &str,
    ) -> Result<TrustEvent, HelmError> {
        let now = self.now();
        let graph = self.graphs.graph(tenant);
        let signer = self.kms.derive(tenant)?;
        let node = graph.append_signed(
            NodeKind::TrustEvent,
            json!({"event_type": event_type, "key_id": key_id, "public_key": public_key}),
            "trust-registry",
            now,
            signer.as_ref(),
        )?;
        self.persist(&node)?;
        let event = TrustEvent {
            event_type,
            tenant: tenant.clone(),
            key_id: key_id.to_string(),
            public_key: public_key.to_string(),
            lamport: node.lamport,
        };
        self.trust.apply(event.clone());
        Ok(event)
    }

    /// Periodic anchor summarizing the tenant graph.
    pub fn checkpoint(&self, tenant: &TenantId) -> Result<NodeHash, HelmError> {
        let now = self.now();
        let graph = self.graphs.graph(tenant);
        let signer = self.kms.derive(tenant)?;
        let node = graph.append_signed(
            NodeKind::Checkpoint,
            json!({"lamport": graph.current_lamport(), "node_count": graph.len()}),
            "kernel",
            now,
            signer.as_ref(),
        )?;
        self.persist(&node)?;
        Ok(node.node_hash)
    }

    /// Compensation path for actual cost after execution (or after a
    /// cancelled reservation). Never implicit.
    pub fn record_spend(&self, tenant: &TenantId, cost: u64) -> Result<(), HelmError> {
        self.budgets.record_spend(tenant, cost, self.now())
    }
}
