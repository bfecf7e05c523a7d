//! Sandbox boundary contract.
//!
//! Every filesystem, network, and capability check returns an explicit
//! `{allowed, reason}` and records violations in a log. Denylists are
//! evaluated before allowlists; resource exhaustion maps onto the
//! well-known `ERR_COMPUTE_*` codes.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::warn;

use helm_core::{
    ERR_COMPUTE_MEMORY_EXHAUSTED, ERR_COMPUTE_TIME_EXHAUSTED,
};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SandboxPolicy {
    /// Path prefixes reads/writes may touch.
    pub fs_allowlist: Vec<String>,
    /// Path prefixes that are always refused, checked first.
    pub fs_denylist: Vec<String>,
    /// Hosts the sandbox may reach. Ignored when `network_deny_all`.
    pub network_allowlist: Vec<String>,
    pub network_deny_all: bool,
    pub max_memory_bytes: u64,
    pub max_cpu_seconds: u64,
    pub capabilities: Vec<String>,
    pub read_only: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundaryCheck {
    pub allowed: bool,
    pub reason: String,
}

impl BoundaryCheck {
    fn allow(reason: impl Into<String>) -> Self {
        Self { allowed: true, reason: reason.into() }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self { allowed: false, reason: reason.into() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    Filesystem,
    Network,
    Capability,
    Memory,
    Cpu,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub detail: String,
    /// Well-known exhaustion code, for resource violations.
    pub code: Option<&'static str>,
}

/// Policy plus the violation log for one sandbox instance.
pub struct SandboxGuard {
    policy: SandboxPolicy,
    violations: Mutex<Vec<Violation>>,
}

impl SandboxGuard {
    pub fn new(policy: SandboxPolicy) -> Self {
        Self { policy, violations: Mutex::new(Vec::new()) }
    }

    fn record(&self, kind: ViolationKind, detail: String, code: Option<&'static str>) {
        warn!(?kind, detail = %detail, "sandbox violation");
        self.violations
            .lock()
            .expect("violation log lock poisoned")
            .push(Violation { kind, detail, code });
    }

    /// Check a filesystem access. Denylist first, then read-only mode,
    /// then the allowlist.
    pub fn check_fs(&self, path: &str, write: bool) -> BoundaryCheck {
        for denied in &self.policy.fs_denylist {
            if path.starts_with(denied) {
                let check = BoundaryCheck::deny(format!("path {path} matches denylist entry {denied}"));
                self.record(ViolationKind::Filesystem, check.reason.clone(), None);
                return check;
            }
        }
        if write && self.policy.read_only {
            let check = BoundaryCheck::deny(format!("write to {path} refused: sandbox is read-only"));
            self.record(ViolationKind::Filesystem, check.reason.clone(), None);
            return check;
        }
        if self.policy.fs_allowlist.iter().any(|a| path.starts_with(a)) {
            return BoundaryCheck::allow("path within allowlist");
        }
        let check = BoundaryCheck::deny(format!("path {path} outside allowlist"));
        self.record(ViolationKind::Filesystem, check.reason.clone(), None);
        check
    }

    pub fn check_network(&self, host: &str) -> BoundaryCheck {
        if self.policy.network_deny_all {
            let check = BoundaryCheck::deny("network access denied for this sandbox");
            self.record(ViolationKind::Network, format!("attempted connection to {host}"), None);
            return check;
        }
        if self.policy.network_allowlist.iter().any(|a| a == host) {
            return BoundaryCheck::allow("host within allowlist");
        }
        let check = BoundaryCheck::deny(format!("host {host} outside allowlist"));
        self.record(ViolationKind::Network, check.reason.clone(), None);
        check
    }

    pub fn check_capability(&self, capability: &str) -> BoundaryCheck {
        if self.policy.capabilities.iter().any(|c| c == capability) {
            return BoundaryCheck::allow("capability granted");
        }
        let check = BoundaryCheck::deny(format!("capability {capability} not granted"));
        self.record(ViolationKind::Capability, check.reason.clone(), None);
        check
    }

    /// Report memory use; over-limit use is a violation with the
    /// exhaustion code.
    pub fn check_memory(&self, used_bytes: u64) -> BoundaryCheck {
        if used_bytes <= self.policy.max_memory_bytes {
            return BoundaryCheck::allow("within memory limit");
        }
        let check = BoundaryCheck::deny(format!(
            "memory {used_bytes} exceeds limit {}",
            self.policy.max_memory_bytes
        ));
        self.record(ViolationKind::Memory, check.reason.clone(), Some(ERR_COMPUTE_MEMORY_EXHAUSTED));
        check
    }

    pub fn check_cpu(&self, used_seconds: u64) -> BoundaryCheck {
        if used_seconds <= self.policy.max_cpu_seconds {
            return BoundaryCheck::allow("within cpu limit");
        }
        let check = BoundaryCheck::deny(format!(
            "cpu {used_seconds}s exceeds limit {}s",
            self.policy.max_cpu_seconds
        ));
        self.record(ViolationKind::Cpu, check.reason.clone(), Some(ERR_COMPUTE_TIME_EXHAUSTED));
        check
    }

    pub fn violations(&self) -> Vec<Violation> {
        self.violations.lock().expect("violation log lock poisoned").clone()
    }
}
