use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Mutex;
use tracing::warn;

use helm_core::HelmError;

/// Region → legal regime binding. `"*"` matches any region.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JurisdictionRule {
    pub region: String,
    pub regime: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct JurisdictionQuery {
    pub entity: String,
    pub counterparty: Option<String>,
    pub data_subject: Option<String>,
    pub service_region: String,
}

/// Two rules binding different regimes to the same region.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JurisdictionConflict {
    pub region: String,
    pub regimes: Vec<String>,
}

/// The legal context bound to an action. Conflicts are preserved, never
/// silently resolved: callers see the provisional regime and every
/// competing regime, and route the conflict to governed resolution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JurisdictionContext {
    pub query: JurisdictionQuery,
    /// Deterministic provisional binding: the lexicographically smallest
    /// matching regime.
    pub regime: String,
    pub conflicts: Vec<JurisdictionConflict>,
}

impl JurisdictionContext {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

#[derive(Default)]
pub struct JurisdictionResolver {
    rules: Mutex<Vec<JurisdictionRule>>,
}

impl JurisdictionResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: Vec<JurisdictionRule>) -> Self {
        Self { rules: Mutex::new(rules) }
    }

    pub fn add_rule(&self, rule: JurisdictionRule) {
        self.rules.lock().expect("jurisdiction lock poisoned").push(rule);
    }

    /// Bind a regime for the query's service region. Exact-region rules
    /// and wildcard rules both match; a missing rule is fail-closed.
    pub fn resolve(&self, query: JurisdictionQuery) -> Result<JurisdictionContext, HelmError> {
        let rules = self.rules.lock().expect("jurisdiction lock poisoned");
        let regimes: BTreeSet<String> = rules
            .iter()
            .filter(|r| r.region == query.service_region || r.region == "*")
            .map(|r| r.regime.clone())
            .collect();

        let Some(regime) = regimes.iter().next().cloned() else {
            return Err(HelmError::JurisdictionMissing(query.service_region));
        };

        let conflicts = if regimes.len() > 1 {
            warn!(region = %query.service_region, regimes = regimes.len(), "jurisdiction conflict");
            vec![JurisdictionConflict {
                region: query.service_region.clone(),
                regimes: regimes.into_iter().collect(),
            }]
        } else {
            vec![]
        };

        Ok(JurisdictionContext { query, regime, conflicts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(region: &str) -> JurisdictionQuery {
        JurisdictionQuery {
            entity: "acme-agent".into(),
            counterparty: None,
            data_subject: None,
            service_region: region.into(),
        }
    }

    #[test]
    fn exact_region_binds() {
        let resolver = JurisdictionResolver::with_rules(vec![
            JurisdictionRule { region: "eu-west".into(), regime: "gdpr".into() },
        ]);
        let ctx = resolver.resolve(query("eu-west")).unwrap();
        assert_eq!(ctx.regime, "gdpr");
        assert!(!ctx.has_conflicts());
    }

    #[test]
    fn wildcard_matches_any_region() {
        let resolver = JurisdictionResolver::with_rules(vec![
            JurisdictionRule { region: "*".into(), regime: "baseline".into() },
        ]);
        assert_eq!(resolver.resolve(query("anywhere")).unwrap().regime, "baseline");
    }

    #[test]
    fn conflicting_regimes_are_preserved() {
        let resolver = JurisdictionResolver::with_rules(vec![
            JurisdictionRule { region: "eu-west".into(), regime: "gdpr".into() },
            JurisdictionRule { region: "*".into(), regime: "baseline".into() },
        ]);
        let ctx = resolver.resolve(query("eu-west")).unwrap();
        assert!(ctx.has_conflicts());
        assert_eq!(ctx.conflicts[0].regimes, vec!["baseline".to_string(), "gdpr".to_string()]);
        // Deterministic provisional binding.
        assert_eq!(ctx.regime, "baseline");
    }

    #[test]
    fn missing_region_rule_fails_closed() {
        let resolver = JurisdictionResolver::new();
        assert!(matches!(
            resolver.resolve(query("mars")),
            Err(HelmError::JurisdictionMissing(_))
        ));
    }
}
