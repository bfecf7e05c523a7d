use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tracing::debug;

use helm_core::{Lamport, TenantId};

/// Key lifecycle events. The registry is event-sourced rather than
/// mutated in place so that a signature asserted valid at lamport L stays
/// verifiable long after later revocations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrustEventType {
    KeyAdded,
    KeyRevoked,
    KeyRotated,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrustEvent {
    pub event_type: TrustEventType,
    pub tenant: TenantId,
    pub key_id: String,
    /// Hex Ed25519 public key. Empty for revocations.
    pub public_key: String,
    /// Stamped by the tenant's proof graph; orders events causally.
    pub lamport: Lamport,
}

/// Event-sourced per-tenant authorized-key state.
#[derive(Default)]
pub struct TrustRegistry {
    events: Mutex<HashMap<TenantId, Vec<TrustEvent>>>,
}

impl TrustRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold an event into the stream. Events arrive in lamport order from
    /// the proof graph; the registry keeps them sorted defensively anyway.
    pub fn apply(&self, event: TrustEvent) {
        let mut events = self.events.lock().expect("trust registry lock poisoned");
        let stream = events.entry(event.tenant.clone()).or_default();
        debug!(tenant = %event.tenant, key_id = %event.key_id, event = ?event.event_type, lamport = event.lamport, "trust event");
        stream.push(event);
        stream.sort_by_key(|e| e.lamport);
    }

    /// Point-in-time resolution: fold every event with `lamport <= at`
    /// into the authorized key map (key id → public key).
    pub fn resolve_authorized_keys(
        &self,
        tenant: &TenantId,
        at: Lamport,
    ) -> BTreeMap<String, String> {
        let events = self.events.lock().expect("trust registry lock poisoned");
        let mut keys = BTreeMap::new();
        let Some(stream) = events.get(tenant) else {
            return keys;
        };
        for event in stream.iter().filter(|e| e.lamport <= at) {
            match event.event_type {
                TrustEventType::KeyAdded => {
                    keys.insert(event.key_id.clone(), event.public_key.clone());
                }
                TrustEventType::KeyRevoked => {
                    keys.remove(&event.key_id);
                }
                TrustEventType::KeyRotated => {
                    keys.insert(event.key_id.clone(), event.public_key.clone());
                }
            }
        }
        keys
    }

    /// Authorized keys as of the latest applied event.
    pub fn current_keys(&self, tenant: &TenantId) -> BTreeMap<String, String> {
        self.resolve_authorized_keys(tenant, Lamport::MAX)
    }

    pub fn is_authorized(&self, tenant: &TenantId, key_id: &str, at: Lamport) -> bool {
        self.resolve_authorized_keys(tenant, at).contains_key(key_id)
    }
}
