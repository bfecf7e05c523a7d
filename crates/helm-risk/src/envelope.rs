use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, warn};

use helm_core::{HelmError, RiskLevel, Timestamp, RISK_WINDOW_MS};

/// Per-action-type risk bound.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RiskEnvelope {
    pub action_type: String,
    /// Per-action cost cap; one action may never exceed this alone.
    pub max_risk: u64,
    /// Multiplier applied to this action type in the aggregate sum.
    pub weight: u64,
    pub level: RiskLevel,
}

/// Aggregate bound over a sliding window.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RiskWindow {
    pub window_ms: i64,
    pub max_aggregate: u64,
}

impl Default for RiskWindow {
    fn default() -> Self {
        Self { window_ms: RISK_WINDOW_MS, max_aggregate: 1_000 }
    }
}

/// One accepted risk spend.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RiskEvent {
    pub action_type: String,
    pub risk_cost: u64,
    pub timestamp: Timestamp,
}

struct AccountantInner {
    envelopes: HashMap<String, RiskEnvelope>,
    events: Vec<RiskEvent>,
}

/// Sliding-window risk accounting.
///
/// The aggregate is re-derived from the event ring on every check, over
/// `timestamp > now - window`. The window slides continuously rather than
/// resetting, so a burst cannot be laundered by waiting for a bucket edge.
/// Events are appended under the mutex and pruned only by explicit call.
pub struct RiskAccountant {
    window: RiskWindow,
    inner: Mutex<AccountantInner>,
}

impl RiskAccountant {
    pub fn new(window: RiskWindow) -> Self {
        Self {
            window,
            inner: Mutex::new(AccountantInner {
                envelopes: HashMap::new(),
                events: Vec::new(),
            }),
        }
    }

    pub fn register_envelope(&self, envelope: RiskEnvelope) {
        let mut inner = self.inner.lock().expect("risk lock poisoned");
        inner.envelopes.insert(envelope.action_type.clone(), envelope);
    }

    pub fn envelope(&self, action_type: &str) -> Option<RiskEnvelope> {
        let inner = self.inner.lock().expect("risk lock poisoned");
        inner.envelopes.get(action_type).cloned()
    }

    /// Current weighted aggregate inside the window.
    pub fn aggregate(&self, now: Timestamp) -> u64 {
        let inner = self.inner.lock().expect("risk lock poisoned");
        Self::aggregate_locked(&inner, self.window, now)
    }

    fn aggregate_locked(inner: &AccountantInner, window: RiskWindow, now: Timestamp) -> u64 {
        let cutoff = now - window.window_ms;
        inner
            .events
            .iter()
            .filter(|e| e.timestamp > cutoff)
            .map(|e| {
                let weight = inner
                    .envelopes
                    .get(&e.action_type)
                    .map(|env| env.weight)
                    .unwrap_or(1);
                e.risk_cost * weight
            })
            .sum()
    }

    /// Check both bounds and record the event when they hold.
    ///
    /// Rejects when the single action exceeds its envelope cap, or when the
    /// windowed aggregate plus this action's weighted cost would exceed the
    /// window maximum. Unknown action types are denied.
    pub fn check_and_record(
        &self,
        action_type: &str,
        cost: u64,
        now: Timestamp,
    ) -> Result<(), HelmError> {
        let mut inner = self.inner.lock().expect("risk lock poisoned");
        let envelope = inner
            .envelopes
            .get(action_type)
            .ok_or_else(|| HelmError::UnknownActionType(action_type.to_string()))?;

        if cost > envelope.max_risk {
            warn!(action_type, cost, max_risk = envelope.max_risk, "risk cap exceeded");
            return Err(HelmError::RiskCapExceeded {
                action_type: action_type.to_string(),
                cost,
                max_risk: envelope.max_risk,
            });
        }

        let weighted = cost * envelope.weight;
        let aggregate = Self::aggregate_locked(&inner, self.window, now);
        if aggregate + weighted > self.window.max_aggregate {
            warn!(action_type, aggregate, weighted, max = self.window.max_aggregate, "aggregate window exceeded");
            return Err(HelmError::RiskAggregateExceeded {
                aggregate,
                weighted,
                max: self.window.max_aggregate,
            });
        }

        inner.events.push(RiskEvent {
            action_type: action_type.to_string(),
            risk_cost: cost,
            timestamp: now,
        });
        debug!(action_type, cost, aggregate = aggregate + weighted, "risk recorded");
        Ok(())
    }

    /// Drop events that can no longer influence any window ending at or
    /// after `now`. Pruning is explicit; checks never mutate the ring.
    pub fn prune(&self, now: Timestamp) {
        let cutoff = now - self.window.window_ms;
        let mut inner = self.inner.lock().expect("risk lock poisoned");
        inner.events.retain(|e| e.timestamp > cutoff);
    }

    pub fn event_count(&self) -> usize {
        self.inner.lock().expect("risk lock poisoned").events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: i64 = 3600 * 1000;

    fn accountant() -> RiskAccountant {
        let acc = RiskAccountant::new(RiskWindow { window_ms: HOUR, max_aggregate: 100 });
        acc.register_envelope(RiskEnvelope {
            action_type: "payment".into(),
            max_risk: 50,
            weight: 3,
            level: RiskLevel::High,
        });
        acc
    }

    #[test]
    fn burst_then_cool_cannot_game_the_window() {
        let acc = accountant();
        let t0 = 10 * HOUR;
        // Three weighted-30 spends fit (aggregate 90); the fourth would
        // reach 120 > 100.
        assert!(acc.check_and_record("payment", 10, t0).is_ok());
        assert!(acc.check_and_record("payment", 10, t0 + 1).is_ok());
        assert!(acc.check_and_record("payment", 10, t0 + 2).is_ok());
        let err = acc.check_and_record("payment", 10, t0 + 3).unwrap_err();
        assert!(matches!(
            err,
            HelmError::RiskAggregateExceeded { aggregate: 90, weighted: 30, max: 100 }
        ));
    }

    #[test]
    fn aggregate_slides_to_zero_past_the_window() {
        let acc = accountant();
        let t0 = 10 * HOUR;
        acc.check_and_record("payment", 10, t0).unwrap();
        assert_eq!(acc.aggregate(t0), 30);
        assert_eq!(acc.aggregate(t0 + HOUR + 1), 0);
    }

    #[test]
    fn per_action_cap_rejects_before_aggregate() {
        let acc = accountant();
        assert!(matches!(
            acc.check_and_record("payment", 51, 0).unwrap_err(),
            HelmError::RiskCapExceeded { .. }
        ));
        assert_eq!(acc.event_count(), 0, "rejected actions leave no event");
    }

    #[test]
    fn unknown_action_type_denied() {
        let acc = accountant();
        assert!(matches!(
            acc.check_and_record("unregistered", 1, 0),
            Err(HelmError::UnknownActionType(_))
        ));
    }

    #[test]
    fn prune_is_explicit_and_window_bounded() {
        let acc = accountant();
        let t0 = 10 * HOUR;
        acc.check_and_record("payment", 10, t0).unwrap();
        acc.check_and_record("payment", 10, t0 + HOUR / 2).unwrap();
        assert_eq!(acc.event_count(), 2);
        acc.prune(t0 + HOUR + 1);
        assert_eq!(acc.event_count(), 1);
    }
}
