//! Cached per-function and per-tenant runtime state.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use fngate_autoscale::Scaler;
use fngate_metrics::CallOutcome;
use fngate_state::{Cookie, FunctionConfig, StateResult, StateStore, TenantId};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::endpoints::EndpointTable;
use crate::ledger::ResourceLedger;
use crate::ratelimit::{LimiterSlot, RateLimiter};
use crate::stats::{CallCost, FnStats, TenantUsage};

// ── Tenant ────────────────────────────────────────────────────────

pub struct TenantRuntime {
    pub tenant: TenantId,
    limiter: LimiterSlot,
    pub ledger: ResourceLedger,
    pub usage: Arc<TenantUsage>,
}

impl TenantRuntime {
    /// Build from the tenant's stored limits, latest usage snapshot and
    /// cumulative stats.
    pub fn load(store: &StateStore, tenant: &str) -> StateResult<Self> {
        let usage = Arc::new(TenantUsage::load(store, tenant)?);
        let ledger = ResourceLedger::new(Arc::clone(&usage));
        let limits = ledger.refresh(store, tenant)?;

        Ok(Self {
            tenant: tenant.to_string(),
            limiter: LimiterSlot::new(limits.rate_limit),
            ledger,
            usage,
        })
    }

    pub fn limiter(&self) -> Option<Arc<RateLimiter>> {
        self.limiter.current()
    }

    /// Re-read limits and baseline; the rate limit is applied in place.
    pub fn refresh(&self, store: &StateStore) -> StateResult<()> {
        let limits = self.ledger.refresh(store, &self.tenant)?;
        self.limiter.apply(limits.rate_limit);
        Ok(())
    }

    /// Refresh every `period` until shutdown. Failures keep the previous
    /// limits in effect.
    pub async fn run_refresher(
        self: Arc<Self>,
        store: StateStore,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        debug!(tenant = %self.tenant, period_secs = period.as_secs(), "tenant refresher started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(period) => {
                    if let Err(e) = self.refresh(&store) {
                        warn!(tenant = %self.tenant, error = %e, "tenant limits refresh failed");
                    }
                }
                _ = shutdown.changed() => {
                    debug!(tenant = %self.tenant, "tenant refresher shutting down");
                    break;
                }
            }
        }
    }
}

// ── Function ──────────────────────────────────────────────────────

pub struct FnRuntime {
    pub cookie: Cookie,
    config: RwLock<Arc<FunctionConfig>>,
    pub table: Arc<EndpointTable>,
    pub scaler: Scaler,
    limiter: LimiterSlot,
    pub tenant: Arc<TenantRuntime>,
    pub stats: FnStats,
}

impl FnRuntime {
    pub fn new(
        config: FunctionConfig,
        scaler: Scaler,
        tenant: Arc<TenantRuntime>,
        stats: FnStats,
    ) -> Self {
        Self {
            cookie: config.cookie.clone(),
            limiter: LimiterSlot::new(config.rate_limit),
            config: RwLock::new(Arc::new(config)),
            table: Arc::new(EndpointTable::new()),
            scaler,
            tenant,
            stats,
        }
    }

    pub fn config(&self) -> Arc<FunctionConfig> {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn limiter(&self) -> Option<Arc<RateLimiter>> {
        self.limiter.current()
    }

    /// Swap in a re-read config. The rate limit is updated in place and a
    /// version change flushes the endpoint table.
    pub fn apply_config(&self, config: FunctionConfig) {
        self.limiter.apply(config.rate_limit);

        let previous = {
            let mut slot = self.config.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *slot, Arc::new(config))
        };
        let current = self.config();
        if previous.version != current.version {
            info!(
                cookie = %self.cookie,
                from = %previous.version,
                to = %current.version,
                "function version changed, flushing endpoints"
            );
            self.table.flush();
        }
    }

    /// Account one completed call against the function and its tenant.
    pub fn record_call(&self, outcome: CallOutcome, cost: &CallCost) {
        self.stats.record(outcome, cost);
        self.tenant.usage.add(cost);
    }
}
