//! Tenant resource ledger — soft GBS and egress quotas.
//!
//! The ledger holds a baseline (the tenant's limits plus the cumulative
//! usage archived in its latest snapshot) and compares the tenant's live
//! cumulative usage against it. The baseline is refreshed periodically,
//! independent of traffic, so bursts between refreshes are bounded by the
//! limit but not prevented.

use std::sync::{Arc, PoisonError, RwLock};

use fngate_state::{StateResult, StateStore, TenantLimits, UsageSnapshot};

use crate::stats::TenantUsage;

/// Limits and archived offsets in effect for a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Baseline {
    /// 0 is unbounded.
    pub gbs_limit: f64,
    pub gbs_offset: f64,
    /// 0 is unbounded.
    pub bytes_limit: u64,
    pub bytes_offset: u64,
}

impl Baseline {
    pub fn new(limits: &TenantLimits, snapshot: &UsageSnapshot) -> Self {
        Self {
            gbs_limit: limits.gbs,
            gbs_offset: snapshot.gbs,
            bytes_limit: limits.bytes_out,
            bytes_offset: snapshot.bytes_out,
        }
    }

    /// Whether `gbs`/`bytes_out` (live cumulative values) exceed either quota.
    pub fn exceeded_by(&self, gbs: f64, bytes_out: u64) -> bool {
        let gbs_over = self.gbs_limit > 0.0 && gbs - self.gbs_offset > self.gbs_limit;
        let bytes_over =
            self.bytes_limit > 0 && bytes_out.saturating_sub(self.bytes_offset) > self.bytes_limit;
        gbs_over || bytes_over
    }
}

pub struct ResourceLedger {
    baseline: RwLock<Baseline>,
    usage: Arc<TenantUsage>,
}

impl ResourceLedger {
    /// A ledger with unbounded limits until the first refresh.
    pub fn new(usage: Arc<TenantUsage>) -> Self {
        Self {
            baseline: RwLock::new(Baseline::default()),
            usage,
        }
    }

    pub fn exceeded(&self) -> bool {
        let usage = self.usage.snapshot();
        self.baseline().exceeded_by(usage.gbs, usage.bytes_out)
    }

    pub fn baseline(&self) -> Baseline {
        *self.baseline.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_baseline(&self, baseline: Baseline) {
        *self.baseline.write().unwrap_or_else(PoisonError::into_inner) = baseline;
    }

    /// Re-read limits and the latest snapshot of `tenant`. On error the
    /// previous baseline stays in effect.
    pub fn refresh(&self, store: &StateStore, tenant: &str) -> StateResult<TenantLimits> {
        let limits = store.get_tenant_limits(tenant)?;
        let snapshot = store.latest_usage_snapshot(tenant)?;
        self.set_baseline(Baseline::new(&limits, &snapshot));
        Ok(limits)
    }
}
