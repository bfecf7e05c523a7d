use serde::{Deserialize, Serialize};
use std::fmt;

/// Epoch milliseconds (UTC). Informational on proof nodes; never feeds
/// ordering logic, which is Lamport-based.
pub type Timestamp = i64;

/// Logical clock value owned by a tenant's proof graph.
pub type Lamport = u64;

// ── TenantId ─────────────────────────────────────────────────────────────────

/// Opaque tenant identifier. Tenants own key material, a budget row, risk
/// envelopes, and one proof graph each. Created on first use.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TenantId({})", self.0)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ── NodeHash ─────────────────────────────────────────────────────────────────

/// 32-byte content hash of a proof-graph node: SHA-256 of the JCS form of
/// the node excluding the `node_hash` field itself.
///
/// Serializes as lowercase hex so parent references in canonical JSON are
/// plain strings, never pointers.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHash(pub [u8; 32]);

impl Serialize for NodeHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for NodeHash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        NodeHash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl NodeHash {
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Display for NodeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for NodeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeHash({}…)", &self.to_hex()[..16])
    }
}

// ── Principal ────────────────────────────────────────────────────────────────

/// Actor identity recorded on proof nodes and receipts. A principal is a
/// tenant-scoped agent, service, or human approver.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal(pub String);

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Principal({})", self.0)
    }
}

// ── Decision ─────────────────────────────────────────────────────────────────

/// The verdict of a policy evaluation or gate composition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Allow,
    Deny,
    RequireApproval,
    RequireEvidence,
    Defer,
}

impl Decision {
    /// Fixed merge priority: DENY > REQUIRE_APPROVAL > REQUIRE_EVIDENCE >
    /// DEFER > ALLOW. Higher value wins a merge.
    pub fn priority(self) -> u8 {
        match self {
            Decision::Deny => 4,
            Decision::RequireApproval => 3,
            Decision::RequireEvidence => 2,
            Decision::Defer => 1,
            Decision::Allow => 0,
        }
    }

}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Decision::Allow => "ALLOW",
            Decision::Deny => "DENY",
            Decision::RequireApproval => "REQUIRE_APPROVAL",
            Decision::RequireEvidence => "REQUIRE_EVIDENCE",
            Decision::Defer => "DEFER",
        };
        write!(f, "{s}")
    }
}

// ── DenialReason ─────────────────────────────────────────────────────────────

/// Coarse refusal taxonomy. Every denial receipt carries exactly one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenialReason {
    /// PDP returned DENY or no matching rule.
    Policy,
    /// Content classification or instruction-firewall block.
    Provenance,
    /// Daily or monthly budget exhausted.
    Budget,
    /// FS/network/capability/memory/time boundary crossed.
    Sandbox,
    /// Cross-tenant access attempt.
    Tenant,
    /// Jurisdiction conflict unresolved or region rule missing.
    Jurisdiction,
    /// Signature, inclusion-proof, or threshold failure; evidence missing.
    Verification,
    /// Risk envelope or aggregate window exceeded.
    Envelope,
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DenialReason::Policy => "POLICY",
            DenialReason::Provenance => "PROVENANCE",
            DenialReason::Budget => "BUDGET",
            DenialReason::Sandbox => "SANDBOX",
            DenialReason::Tenant => "TENANT",
            DenialReason::Jurisdiction => "JURISDICTION",
            DenialReason::Verification => "VERIFICATION",
            DenialReason::Envelope => "ENVELOPE",
        };
        write!(f, "{s}")
    }
}

// ── RiskLevel ────────────────────────────────────────────────────────────────

/// Coarse risk classification of an action type. Gates autonomous execution
/// together with the autonomy level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    None,
    Low,
    Med,
    High,
    Critical,
}

// ── DataClass ────────────────────────────────────────────────────────────────

/// Data classification carried by a provenance envelope. Only escalates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataClass {
    Public,
    Internal,
    Confidential,
    Restricted,
}

impl DataClass {
    /// Escalation fold: the running classification of an envelope is the
    /// maximum over its segments.
    pub fn escalate(self, other: DataClass) -> DataClass {
        self.max(other)
    }
}
