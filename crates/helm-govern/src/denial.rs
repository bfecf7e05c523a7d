use std::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use helm_core::{DenialReason, DenialReceipt, HelmError, Principal, TenantId, Timestamp};

/// Append-only ledger of refusals. Every denial in the kernel lands here
/// exactly once, in order, with a sequential receipt id and a sealed
/// content hash.
#[derive(Default)]
pub struct DenialLedger {
    inner: Mutex<LedgerInner>,
}

#[derive(Default)]
struct LedgerInner {
    receipts: Vec<DenialReceipt>,
    seq: u64,
}

impl DenialLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint, seal, and retain a receipt for one refusal.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        denied_at: Timestamp,
        principal: Principal,
        tenant: Option<TenantId>,
        action: &str,
        reason: DenialReason,
        details: &str,
        policy_ref: Option<String>,
        run_id: Option<Uuid>,
    ) -> Result<DenialReceipt, HelmError> {
        let mut inner = self.inner.lock().expect("denial ledger lock poisoned");
        inner.seq += 1;
        let receipt = DenialReceipt {
            receipt_id: format!("denial-{}", inner.seq),
            denied_at,
            principal,
            tenant,
            action: action.to_string(),
            reason,
            details: details.to_string(),
            policy_ref,
            envelope_ref: None,
            run_id,
            content_hash: String::new(),
        }
        .seal()?;
        info!(receipt_id = %receipt.receipt_id, reason = %reason, action, "denial recorded");
        inner.receipts.push(receipt.clone());
        Ok(receipt)
    }

    pub fn get(&self, receipt_id: &str) -> Option<DenialReceipt> {
        let inner = self.inner.lock().expect("denial ledger lock poisoned");
        inner.receipts.iter().find(|r| r.receipt_id == receipt_id).cloned()
    }

    pub fn by_reason(&self, reason: DenialReason) -> Vec<DenialReceipt> {
        let inner = self.inner.lock().expect("denial ledger lock poisoned");
        inner.receipts.iter().filter(|r| r.reason == reason).cloned().collect()
    }

    pub fn by_principal(&self, principal: &Principal) -> Vec<DenialReceipt> {
        let inner = self.inner.lock().expect("denial ledger lock poisoned");
        inner.receipts.iter().filter(|r| &r.principal == principal).cloned().collect()
    }

    pub fn by_tenant(&self, tenant: &TenantId) -> Vec<DenialReceipt> {
        let inner = self.inner.lock().expect("denial ledger lock poisoned");
        inner
            .receipts
            .iter()
            .filter(|r| r.tenant.as_ref() == Some(tenant))
            .cloned()
            .collect()
    }

    /// All receipts in denial order.
    pub fn all(&self) -> Vec<DenialReceipt> {
        let inner = self.inner.lock().expect("denial ledger lock poisoned");
        inner.receipts.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("denial ledger lock poisoned").receipts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ledger: &DenialLedger, reason: DenialReason, principal: &str) -> DenialReceipt {
        ledger
            .record(
                1_700_000_000_000,
                Principal::new(principal),
                Some(TenantId::new("acme")),
                "fs.write",
                reason,
                "denied in test",
                None,
                None,
            )
            .unwrap()
    }

    #[test]
    fn receipts_are_sequential_and_sealed() {
        let ledger = DenialLedger::new();
        let a = record(&ledger, DenialReason::Budget, "agent-1");
        let b = record(&ledger, DenialReason::Policy, "agent-1");
        assert_eq!(a.receipt_id, "denial-1");
        assert_eq!(b.receipt_id, "denial-2");
        assert!(a.verify_content_hash().unwrap());
    }

    #[test]
    fn queries_filter_correctly() {
        let ledger = DenialLedger::new();
        record(&ledger, DenialReason::Budget, "agent-1");
        record(&ledger, DenialReason::Policy, "agent-2");
        record(&ledger, DenialReason::Budget, "agent-2");

        assert_eq!(ledger.by_reason(DenialReason::Budget).len(), 2);
        assert_eq!(ledger.by_principal(&Principal::new("agent-2")).len(), 2);
        assert_eq!(ledger.by_tenant(&TenantId::new("acme")).len(), 3);
        assert_eq!(ledger.by_tenant(&TenantId::new("other")).len(), 0);
    }
}
