//! ─── HELM Kernel Constants ──────────────────────────────────────────────────
//!
//! Process-wide fixed choices: RFC 8785 canonical JSON and SHA-256 on every
//! hashed surface. Everything else is per-component configuration.

use uuid::Uuid;

// ── Budgets (minor currency units) ───────────────────────────────────────────

/// Default daily spend limit for a tenant with no configured budget row.
pub const DEFAULT_DAILY_LIMIT: u64 = 1_000;

/// Default monthly spend limit for a tenant with no configured budget row.
pub const DEFAULT_MONTHLY_LIMIT: u64 = 50_000;

// ── Liveness timeouts (milliseconds) ─────────────────────────────────────────

/// Pending human approval expires after 24 hours.
pub const APPROVAL_TIMEOUT_MS: i64 = 24 * 3600 * 1000;

/// Pending obligation expires after 72 hours.
pub const OBLIGATION_TIMEOUT_MS: i64 = 72 * 3600 * 1000;

/// Sequencer lease expires after 30 seconds.
pub const LEASE_TIMEOUT_MS: i64 = 30 * 1000;

// ── Risk / autonomy ──────────────────────────────────────────────────────────

/// Default sliding window for aggregate risk accounting: 1 hour.
pub const RISK_WINDOW_MS: i64 = 3600 * 1000;

/// Autonomy level required to execute a LOW-risk action unattended.
pub const AUTONOMY_THRESHOLD_LOW: u8 = 10;

/// Autonomy level required to execute a MED-risk action unattended.
pub const AUTONOMY_THRESHOLD_MED: u8 = 40;

/// Autonomy level required to execute a HIGH-risk action unattended.
pub const AUTONOMY_THRESHOLD_HIGH: u8 = 70;

// ── Decision pipeline ────────────────────────────────────────────────────────

/// UUIDv5 namespace for decision IDs. Identical canonical requests map to
/// identical decision IDs under this namespace.
pub const DECISION_ID_NAMESPACE: Uuid = Uuid::from_u128(0x48454c4d_0001_5000_8000_68656c6d6b31);

/// Upper bound on concurrent sub-evaluations in the swarm PDP.
pub const MAX_PARALLEL_PDPS: usize = 4;

/// Validity window of a decision record: 5 minutes past `issued_at`.
pub const DECISION_TTL_MS: i64 = 5 * 60 * 1000;

/// Rule fired when evaluation is aborted by caller cancellation.
pub const RULE_CONTEXT_CANCELLATION: &str = "system.deny.context_cancellation";

/// Rule fired when no rule matches a request (fail-closed default).
pub const RULE_DEFAULT_DENY: &str = "system.deny.default";

// ── Key derivation ───────────────────────────────────────────────────────────

/// HKDF-SHA256 salt for tenant key derivation from the master seed.
pub const HKDF_TENANT_SALT: &[u8] = b"helm-tenant-kdf";

// ── Sandbox exhaustion codes ─────────────────────────────────────────────────

pub const ERR_COMPUTE_GAS_EXHAUSTED: &str = "ERR_COMPUTE_GAS_EXHAUSTED";
pub const ERR_COMPUTE_TIME_EXHAUSTED: &str = "ERR_COMPUTE_TIME_EXHAUSTED";
pub const ERR_COMPUTE_MEMORY_EXHAUSTED: &str = "ERR_COMPUTE_MEMORY_EXHAUSTED";
pub const ERR_COMPUTE_OUTPUT_EXHAUSTED: &str = "ERR_COMPUTE_OUTPUT_EXHAUSTED";

// ── Credential broker ────────────────────────────────────────────────────────

/// Hard cap on credential TTL regardless of requested duration: 1 hour.
pub const CREDENTIAL_MAX_TTL_MS: i64 = 3600 * 1000;
