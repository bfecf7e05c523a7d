use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, warn};

use helm_core::{HelmError, TenantId, Timestamp};

/// Per-tenant spend row in minor currency units. Daily and monthly buckets
/// are limited independently.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Budget {
    pub tenant: TenantId,
    pub daily_limit: u64,
    pub monthly_limit: u64,
    pub daily_used: u64,
    pub monthly_used: u64,
    pub last_updated: Timestamp,
}

impl Budget {
    pub fn new(tenant: TenantId, daily_limit: u64, monthly_limit: u64) -> Self {
        Self {
            tenant,
            daily_limit,
            monthly_limit,
            daily_used: 0,
            monthly_used: 0,
            last_updated: 0,
        }
    }

    /// Remaining never reports negative.
    pub fn daily_remaining(&self) -> u64 {
        self.daily_limit.saturating_sub(self.daily_used)
    }

    pub fn monthly_remaining(&self) -> u64 {
        self.monthly_limit.saturating_sub(self.monthly_used)
    }
}

/// In-memory budget accounting with atomic check-and-reserve semantics.
///
/// The check is a read-modify-reject under one mutex: a passing check
/// increments both buckets before the lock drops, so two concurrent
/// reservations can never both fit into the same remaining headroom.
/// Reservations are never rolled back implicitly; callers compensate for
/// actual cost via `record_spend`.
#[derive(Default)]
pub struct BudgetBook {
    rows: Mutex<HashMap<TenantId, Budget>>,
}

impl BudgetBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a tenant's limits. Usage counters are preserved
    /// when the row already exists.
    pub fn set_limits(&self, tenant: &TenantId, daily: u64, monthly: u64) {
        let mut rows = self.rows.lock().expect("budget lock poisoned");
        rows.entry(tenant.clone())
            .and_modify(|b| {
                b.daily_limit = daily;
                b.monthly_limit = monthly;
            })
            .or_insert_with(|| Budget::new(tenant.clone(), daily, monthly));
    }

    /// Atomically check headroom and reserve `cost` in both buckets.
    /// Unknown tenants are denied, never allowed by default.
    pub fn check_and_reserve(
        &self,
        tenant: &TenantId,
        cost: u64,
        now: Timestamp,
    ) -> Result<(), HelmError> {
        let mut rows = self.rows.lock().expect("budget lock poisoned");
        let row = rows
            .get_mut(tenant)
            .ok_or_else(|| HelmError::UnknownTenant(tenant.to_string()))?;

        if row.daily_used + cost > row.daily_limit {
            warn!(tenant = %tenant, cost, used = row.daily_used, limit = row.daily_limit, "daily budget exhausted");
            return Err(HelmError::BudgetExhausted {
                bucket: "daily",
                used: row.daily_used,
                cost,
                limit: row.daily_limit,
            });
        }
        if row.monthly_used + cost > row.monthly_limit {
            warn!(tenant = %tenant, cost, used = row.monthly_used, limit = row.monthly_limit, "monthly budget exhausted");
            return Err(HelmError::BudgetExhausted {
                bucket: "monthly",
                used: row.monthly_used,
                cost,
                limit: row.monthly_limit,
            });
        }

        row.daily_used += cost;
        row.monthly_used += cost;
        row.last_updated = now;
        debug!(tenant = %tenant, cost, "budget reserved");
        Ok(())
    }

    /// Record spend observed after the fact (compensation path). Saturates
    /// at the bucket ceiling rather than failing: actual cost is a fact,
    /// not a request.
    pub fn record_spend(&self, tenant: &TenantId, cost: u64, now: Timestamp) -> Result<(), HelmError> {
        let mut rows = self.rows.lock().expect("budget lock poisoned");
        let row = rows
            .get_mut(tenant)
            .ok_or_else(|| HelmError::UnknownTenant(tenant.to_string()))?;
        row.daily_used = row.daily_used.saturating_add(cost);
        row.monthly_used = row.monthly_used.saturating_add(cost);
        row.last_updated = now;
        Ok(())
    }

    pub fn get(&self, tenant: &TenantId) -> Result<Budget, HelmError> {
        let rows = self.rows.lock().expect("budget lock poisoned");
        rows.get(tenant)
            .cloned()
            .ok_or_else(|| HelmError::UnknownTenant(tenant.to_string()))
    }

    /// Roll the daily bucket. Called by the scheduler at day boundaries;
    /// never implicit.
    pub fn reset_daily(&self, tenant: &TenantId, now: Timestamp) -> Result<(), HelmError> {
        let mut rows = self.rows.lock().expect("budget lock poisoned");
        let row = rows
            .get_mut(tenant)
            .ok_or_else(|| HelmError::UnknownTenant(tenant.to_string()))?;
        row.daily_used = 0;
        row.last_updated = now;
        Ok(())
    }

    /// Roll the monthly bucket.
    pub fn reset_monthly(&self, tenant: &TenantId, now: Timestamp) -> Result<(), HelmError> {
        let mut rows = self.rows.lock().expect("budget lock poisoned");
        let row = rows
            .get_mut(tenant)
            .ok_or_else(|| HelmError::UnknownTenant(tenant.to_string()))?;
        row.monthly_used = 0;
        row.last_updated = now;
        Ok(())
    }
}
