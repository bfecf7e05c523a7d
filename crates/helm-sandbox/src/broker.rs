//! Short-lived scoped credentials for sandboxed effectors.
//!
//! Every issuance is journaled; revocation is immediate; validation
//! reports the precise reason a token is unusable.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use helm_core::{sha256_hex, Timestamp, CREDENTIAL_MAX_TTL_MS};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Credential {
    pub token_id: String,
    pub sandbox_id: String,
    pub scopes: Vec<String>,
    pub issued_at: Timestamp,
    pub expires_at: Timestamp,
    /// Hex SHA-256 of the secret token value; the value itself is returned
    /// once at issuance and never stored.
    pub token_hash: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationOutcome {
    Valid,
    NotFound,
    Revoked,
    Expired,
}

struct BrokerInner {
    credentials: HashMap<String, Credential>,
    revoked: HashMap<String, Timestamp>,
    journal: Vec<Credential>,
}

pub struct CredentialBroker {
    max_ttl_ms: i64,
    inner: Mutex<BrokerInner>,
}

impl CredentialBroker {
    pub fn new() -> Self {
        Self::with_max_ttl(CREDENTIAL_MAX_TTL_MS)
    }

    pub fn with_max_ttl(max_ttl_ms: i64) -> Self {
        Self {
            max_ttl_ms,
            inner: Mutex::new(BrokerInner {
                credentials: HashMap::new(),
                revoked: HashMap::new(),
                journal: Vec::new(),
            }),
        }
    }

    /// Issue a credential. The requested TTL is capped by the broker
    /// maximum. Returns the credential record and the secret token value.
    pub fn issue(
        &self,
        sandbox_id: &str,
        scopes: Vec<String>,
        requested_ttl_ms: i64,
        now: Timestamp,
    ) -> (Credential, String) {
        let ttl = requested_ttl_ms.clamp(0, self.max_ttl_ms);
        let token_value = format!("hst_{}", Uuid::new_v4().simple());
        let credential = Credential {
            token_id: format!("cred-{}", Uuid::new_v4().simple()),
            sandbox_id: sandbox_id.to_string(),
            scopes,
            issued_at: now,
            expires_at: now + ttl,
            token_hash: sha256_hex(token_value.as_bytes()),
        };

        let mut inner = self.inner.lock().expect("broker lock poisoned");
        inner.credentials.insert(credential.token_id.clone(), credential.clone());
        inner.journal.push(credential.clone());
        info!(token_id = %credential.token_id, sandbox_id, "credential issued");
        (credential, token_value)
    }

    /// Revocation takes effect immediately.
    pub fn revoke(&self, token_id: &str, now: Timestamp) {
        let mut inner = self.inner.lock().expect("broker lock poisoned");
        inner.revoked.insert(token_id.to_string(), now);
    }

    pub fn validate(&self, token_id: &str, now: Timestamp) -> ValidationOutcome {
        let inner = self.inner.lock().expect("broker lock poisoned");
        let Some(credential) = inner.credentials.get(token_id) else {
            return ValidationOutcome::NotFound;
        };
        if inner.revoked.contains_key(token_id) {
            return ValidationOutcome::Revoked;
        }
        if now >= credential.expires_at {
            return ValidationOutcome::Expired;
        }
        ValidationOutcome::Valid
    }

    /// Issuance journal in order.
    pub fn journal(&self) -> Vec<Credential> {
        self.inner.lock().expect("broker lock poisoned").journal.clone()
    }
}

impl Default for CredentialBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_capped_by_broker_maximum() {
        let broker = CredentialBroker::with_max_ttl(60_000);
        let (cred, _) = broker.issue("sbx-1", vec!["fs.read".into()], 999_999_999, 0);
        assert_eq!(cred.expires_at, 60_000);
    }

    #[test]
    fn validation_reports_precise_reason() {
        let broker = CredentialBroker::with_max_ttl(60_000);
        let (cred, token) = broker.issue("sbx-1", vec![], 60_000, 0);

        assert_eq!(broker.validate(&cred.token_id, 1), ValidationOutcome::Valid);
        assert_eq!(broker.validate("cred-unknown", 1), ValidationOutcome::NotFound);
        assert_eq!(broker.validate(&cred.token_id, 60_000), ValidationOutcome::Expired);

        broker.revoke(&cred.token_id, 2);
        assert_eq!(broker.validate(&cred.token_id, 3), ValidationOutcome::Revoked);

        // The secret never appears in the stored record.
        assert_ne!(cred.token_hash, token);
        assert_eq!(cred.token_hash, sha256_hex(token.as_bytes()));
    }

    #[test]
    fn every_issuance_is_journaled() {
        let broker = CredentialBroker::new();
        broker.issue("sbx-1", vec![], 1000, 0);
        broker.issue("sbx-2", vec![], 1000, 0);
        assert_eq!(broker.journal().len(), 2);
    }
}
