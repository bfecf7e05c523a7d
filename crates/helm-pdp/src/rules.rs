use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::info;

use helm_core::{Decision, HelmError};

use crate::expr::Expr;
use crate::profile::validate_expression;

/// A policy rule. First matching rule wins; no matching rule means DENY.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Rule {
    pub rule_id: String,
    /// Effect this rule applies to: exact identifier or `*`.
    pub effect_pattern: String,
    /// Deterministic condition; `None` matches unconditionally.
    pub condition: Option<Expr>,
    pub decision: Decision,
    #[serde(default)]
    pub constraints: BTreeMap<String, Value>,
}

impl Rule {
    pub fn matches_effect(&self, effect: &str) -> bool {
        self.effect_pattern == "*" || self.effect_pattern == effect
    }

    /// Textual form of the condition for trace steps.
    pub fn expression_text(&self) -> String {
        match &self.condition {
            Some(expr) => expr.to_string(),
            None => "true".to_string(),
        }
    }
}

/// An ordered, versioned set of rules. Every condition passes the
/// deterministic profile at registration time; a rule set can therefore
/// never contain an expression that evaluates differently on replay.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RuleSet {
    pub policy_version: String,
    pub rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(policy_version: impl Into<String>) -> Self {
        Self {
            policy_version: policy_version.into(),
            rules: Vec::new(),
        }
    }

    /// Validate against the deterministic profile and append.
    pub fn register(&mut self, rule: Rule) -> Result<(), HelmError> {
        if let Some(condition) = &rule.condition {
            let issues = validate_expression(condition);
            if !issues.is_empty() {
                return Err(HelmError::ProfileViolation { issues: issues.len() });
            }
        }
        self.rules.push(rule);
        Ok(())
    }

    /// Auto-register an unconditional allow rule for an effect that has no
    /// rule yet. Used in proxy-observation mode so unknown tools are still
    /// receipted rather than invisible.
    pub fn ensure_rule(&mut self, effect: &str) {
        if self.rules.iter().any(|r| r.matches_effect(effect)) {
            return;
        }
        info!(effect, "no rule for effect; auto-registering observe-allow");
        self.rules.push(Rule {
            rule_id: format!("auto.observe.{effect}"),
            effect_pattern: effect.to_string(),
            condition: None,
            decision: Decision::Allow,
            constraints: BTreeMap::new(),
        });
    }

    pub fn matching<'a>(&'a self, effect: &'a str) -> impl Iterator<Item = &'a Rule> + 'a {
        self.rules.iter().filter(move |r| r.matches_effect(effect))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{BinOp, Expr};

    #[test]
    fn register_rejects_profile_violations() {
        let mut rules = RuleSet::new("policy-v1");
        let bad = Rule {
            rule_id: "r1".into(),
            effect_pattern: "*".into(),
            condition: Some(Expr::Call { name: "now".into(), args: vec![] }),
            decision: Decision::Allow,
            constraints: BTreeMap::new(),
        };
        assert!(matches!(
            rules.register(bad),
            Err(HelmError::ProfileViolation { issues: 1 })
        ));
        assert!(rules.rules.is_empty());
    }

    #[test]
    fn ensure_rule_is_idempotent() {
        let mut rules = RuleSet::new("policy-v1");
        rules.ensure_rule("get_weather");
        rules.ensure_rule("get_weather");
        assert_eq!(rules.rules.len(), 1);
        assert_eq!(rules.rules[0].rule_id, "auto.observe.get_weather");
    }

    #[test]
    fn wildcard_matches_any_effect() {
        let rule = Rule {
            rule_id: "r".into(),
            effect_pattern: "*".into(),
            condition: Some(Expr::Binary {
                op: BinOp::Le,
                left: Box::new(Expr::Var("cost".into())),
                right: Box::new(Expr::Int(10)),
            }),
            decision: Decision::Deny,
            constraints: BTreeMap::new(),
        };
        assert!(rule.matches_effect("anything.at.all"));
    }
}
