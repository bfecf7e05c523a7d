//! Expiry watcher for blocking states.
//!
//! Every blocking state carries an explicit deadline. The state machine is
//! PENDING → {ACTIVE, CANCELED, EXPIRED}, all terminal; the sweep moves
//! PENDING to EXPIRED exactly once at the deadline, and extension is only
//! permitted while still PENDING.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info};

use helm_core::{
    HelmError, Timestamp, APPROVAL_TIMEOUT_MS, LEASE_TIMEOUT_MS, OBLIGATION_TIMEOUT_MS,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockingKind {
    /// Pending human approval; defaults to 24 hours.
    Approval,
    /// Outstanding obligation attached to a decision; defaults to 72 hours.
    Obligation,
    /// Sequencer lease; defaults to 30 seconds.
    Lease,
}

impl BlockingKind {
    pub fn default_timeout_ms(self) -> i64 {
        match self {
            BlockingKind::Approval => APPROVAL_TIMEOUT_MS,
            BlockingKind::Obligation => OBLIGATION_TIMEOUT_MS,
            BlockingKind::Lease => LEASE_TIMEOUT_MS,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LivenessState {
    Pending,
    Active,
    Canceled,
    Expired,
}

impl LivenessState {
    fn name(self) -> &'static str {
        match self {
            LivenessState::Pending => "PENDING",
            LivenessState::Active => "ACTIVE",
            LivenessState::Canceled => "CANCELED",
            LivenessState::Expired => "EXPIRED",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LivenessEntry {
    pub id: String,
    pub kind: BlockingKind,
    pub state: LivenessState,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
}

#[derive(Default)]
pub struct LivenessManager {
    inner: Mutex<ManagerInner>,
}

#[derive(Default)]
struct ManagerInner {
    entries: HashMap<String, LivenessEntry>,
    seq: u64,
}

impl LivenessManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a blocking state with the kind's default timeout.
    pub fn open(&self, kind: BlockingKind, now: Timestamp) -> LivenessEntry {
        self.open_with_timeout(kind, now, kind.default_timeout_ms())
    }

    pub fn open_with_timeout(
        &self,
        kind: BlockingKind,
        now: Timestamp,
        timeout_ms: i64,
    ) -> LivenessEntry {
        let mut inner = self.inner.lock().expect("liveness lock poisoned");
        inner.seq += 1;
        let entry = LivenessEntry {
            id: format!("live-{}", inner.seq),
            kind,
            state: LivenessState::Pending,
            created_at: now,
            expires_at: now + timeout_ms,
        };
        debug!(id = %entry.id, ?kind, expires_at = entry.expires_at, "blocking state opened");
        inner.entries.insert(entry.id.clone(), entry.clone());
        entry
    }

    fn transition(
        &self,
        id: &str,
        to: LivenessState,
    ) -> Result<LivenessEntry, HelmError> {
        let mut inner = self.inner.lock().expect("liveness lock poisoned");
        let entry = inner
            .entries
            .get_mut(id)
            .ok_or_else(|| HelmError::LivenessNotFound(id.to_string()))?;
        if entry.state != LivenessState::Pending {
            return Err(HelmError::LivenessTerminal {
                id: id.to_string(),
                state: entry.state.name(),
            });
        }
        entry.state = to;
        Ok(entry.clone())
    }

    /// PENDING → ACTIVE.
    pub fn resolve(&self, id: &str) -> Result<LivenessEntry, HelmError> {
        self.transition(id, LivenessState::Active)
    }

    /// PENDING → CANCELED.
    pub fn cancel(&self, id: &str) -> Result<LivenessEntry, HelmError> {
        self.transition(id, LivenessState::Canceled)
    }

    /// Push the deadline out. Only permitted while PENDING.
    pub fn extend(&self, id: &str, extra_ms: i64) -> Result<LivenessEntry, HelmError> {
        let mut inner = self.inner.lock().expect("liveness lock poisoned");
        let entry = inner
            .entries
            .get_mut(id)
            .ok_or_else(|| HelmError::LivenessNotFound(id.to_string()))?;
        if entry.state != LivenessState::Pending {
            return Err(HelmError::LivenessTerminal {
                id: id.to_string(),
                state: entry.state.name(),
            });
        }
        entry.expires_at += extra_ms;
        Ok(entry.clone())
    }

    /// Transition every overdue PENDING entry to EXPIRED. Returns the ids
    /// expired by this sweep; an entry expires at most once.
    pub fn sweep(&self, now: Timestamp) -> Vec<String> {
        let mut inner = self.inner.lock().expect("liveness lock poisoned");
        let mut expired = Vec::new();
        for entry in inner.entries.values_mut() {
            if entry.state == LivenessState::Pending && now >= entry.expires_at {
                entry.state = LivenessState::Expired;
                expired.push(entry.id.clone());
            }
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "blocking states expired");
        }
        expired.sort();
        expired
    }

    pub fn get(&self, id: &str) -> Option<LivenessEntry> {
        let inner = self.inner.lock().expect("liveness lock poisoned");
        inner.entries.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timeouts_per_kind() {
        let mgr = LivenessManager::new();
        let approval = mgr.open(BlockingKind::Approval, 0);
        let obligation = mgr.open(BlockingKind::Obligation, 0);
        let lease = mgr.open(BlockingKind::Lease, 0);
        assert_eq!(approval.expires_at, 24 * 3600 * 1000);
        assert_eq!(obligation.expires_at, 72 * 3600 * 1000);
        assert_eq!(lease.expires_at, 30 * 1000);
    }

    #[test]
    fn sweep_expires_exactly_once() {
        let mgr = LivenessManager::new();
        let entry = mgr.open(BlockingKind::Lease, 0);
        assert!(mgr.sweep(29_999).is_empty());
        assert_eq!(mgr.sweep(30_000), vec![entry.id.clone()]);
        assert!(mgr.sweep(60_000).is_empty(), "already expired; never re-expires");
        assert_eq!(mgr.get(&entry.id).unwrap().state, LivenessState::Expired);
    }

    #[test]
    fn resolved_entries_do_not_expire() {
        let mgr = LivenessManager::new();
        let entry = mgr.open(BlockingKind::Approval, 0);
        mgr.resolve(&entry.id).unwrap();
        assert!(mgr.sweep(i64::MAX).is_empty());
        assert_eq!(mgr.get(&entry.id).unwrap().state, LivenessState::Active);
    }

    #[test]
    fn terminal_states_reject_transitions() {
        let mgr = LivenessManager::new();
        let entry = mgr.open(BlockingKind::Approval, 0);
        mgr.cancel(&entry.id).unwrap();
        assert!(matches!(
            mgr.resolve(&entry.id),
            Err(HelmError::LivenessTerminal { state: "CANCELED", .. })
        ));
        assert!(mgr.extend(&entry.id, 1000).is_err());
    }

    #[test]
    fn extension_only_while_pending() {
        let mgr = LivenessManager::new();
        let entry = mgr.open(BlockingKind::Lease, 0);
        let extended = mgr.extend(&entry.id, 10_000).unwrap();
        assert_eq!(extended.expires_at, 40_000);
        mgr.sweep(40_000);
        assert!(mgr.extend(&entry.id, 10_000).is_err());
    }
}
