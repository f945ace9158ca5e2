//! Live call statistics.
//!
//! Counters start from the persisted record, are bumped once per
//! completed call, and are written back by the periodic flusher. Tenant
//! usage doubles as the live side of the tenant's resource ledger.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fngate_metrics::CallOutcome;
use fngate_state::{Cookie, FnStatsRecord, StateResult, StateStore, TenantStatsRecord};

/// Resources consumed by one call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallCost {
    pub run_time: Duration,
    pub memory_mb: u64,
    pub bytes_out: u64,
}

impl CallCost {
    /// GB-seconds: allocated memory in GB times run time in seconds.
    pub fn gbs(&self) -> f64 {
        self.memory_mb as f64 / 1024.0 * self.run_time.as_secs_f64()
    }
}

/// Live statistics of one function.
pub struct FnStats {
    record: Mutex<FnStatsRecord>,
    dirty: AtomicBool,
}

impl FnStats {
    /// Start from the persisted record of `cookie`.
    pub fn load(store: &StateStore, cookie: &Cookie) -> StateResult<Self> {
        let record = store.get_fn_stats(cookie)?;
        Ok(Self {
            record: Mutex::new(record),
            dirty: AtomicBool::new(false),
        })
    }

    fn lock(&self) -> MutexGuard<'_, FnStatsRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, outcome: CallOutcome, cost: &CallCost) {
        let mut r = self.lock();
        r.called += 1;
        match outcome {
            CallOutcome::Success => {}
            CallOutcome::Error => r.errors += 1,
            CallOutcome::Timeout => r.timeouts += 1,
        }
        r.last_call = epoch_secs();
        r.run_time_us += cost.run_time.as_micros() as u64;
        r.gbs += cost.gbs();
        r.bytes_out += cost.bytes_out;
        self.dirty.store(true, Ordering::Release);
    }

    pub fn snapshot(&self) -> FnStatsRecord {
        self.lock().clone()
    }

    /// Persist the counters if anything changed since the last flush.
    pub fn flush(&self, store: &StateStore) -> StateResult<bool> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }
        let record = self.snapshot();
        if let Err(e) = store.put_fn_stats(&record) {
            self.dirty.store(true, Ordering::Release);
            return Err(e);
        }
        Ok(true)
    }
}

/// Live cumulative usage of one tenant.
pub struct TenantUsage {
    record: Mutex<TenantStatsRecord>,
    dirty: AtomicBool,
}

impl TenantUsage {
    pub fn load(store: &StateStore, tenant: &str) -> StateResult<Self> {
        Ok(Self::from_record(store.get_tenant_stats(tenant)?))
    }

    pub fn from_record(record: TenantStatsRecord) -> Self {
        Self {
            record: Mutex::new(record),
            dirty: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TenantStatsRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, cost: &CallCost) {
        let mut r = self.lock();
        r.calls += 1;
        r.gbs += cost.gbs();
        r.bytes_out += cost.bytes_out;
        self.dirty.store(true, Ordering::Release);
    }

    pub fn snapshot(&self) -> TenantStatsRecord {
        self.lock().clone()
    }

    pub fn flush(&self, store: &StateStore) -> StateResult<bool> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }
        let record = self.snapshot();
        if let Err(e) = store.put_tenant_stats(&record) {
            self.dirty.store(true, Ordering::Release);
            return Err(e);
        }
        Ok(true)
    }
}

pub(crate) fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cost(ms: u64, memory_mb: u64, bytes_out: u64) -> CallCost {
        CallCost {
            run_time: Duration::from_millis(ms),
            memory_mb,
            bytes_out,
        }
    }

    #[test]
    fn gbs_is_memory_times_time() {
        let c = cost(2_000, 512, 0);
        assert!((c.gbs() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn fn_stats_count_outcomes() {
        let store = StateStore::open_in_memory().unwrap();
        let cookie = Cookie::new("acme", "p", "f");
        let stats = FnStats::load(&store, &cookie).unwrap();

        stats.record(CallOutcome::Success, &cost(10, 128, 5));
        stats.record(CallOutcome::Error, &cost(10, 128, 0));
        stats.record(CallOutcome::Timeout, &cost(10, 128, 0));

        let r = stats.snapshot();
        assert_eq!(r.called, 3);
        assert_eq!(r.errors, 1);
        assert_eq!(r.timeouts, 1);
        assert_eq!(r.bytes_out, 5);
        assert_eq!(r.run_time_us, 30_000);
        assert!(r.last_call > 0);
    }

    #[test]
    fn fn_stats_resume_from_store() {
        let store = StateStore::open_in_memory().unwrap();
        let cookie = Cookie::new("acme", "p", "f");
        store
            .put_fn_stats(&FnStatsRecord {
                cookie: cookie.clone(),
                called: 41,
                ..Default::default()
            })
            .unwrap();

        let stats = FnStats::load(&store, &cookie).unwrap();
        stats.record(CallOutcome::Success, &cost(1, 64, 0));
        assert_eq!(stats.snapshot().called, 42);
    }

    #[test]
    fn flush_writes_only_when_dirty() {
        let store = StateStore::open_in_memory().unwrap();
        let cookie = Cookie::new("acme", "p", "f");
        let stats = FnStats::load(&store, &cookie).unwrap();

        assert!(!stats.flush(&store).unwrap());
        stats.record(CallOutcome::Success, &cost(1, 64, 0));
        assert!(stats.flush(&store).unwrap());
        assert!(!stats.flush(&store).unwrap());
        assert_eq!(store.get_fn_stats(&cookie).unwrap().called, 1);
    }

    #[test]
    fn tenant_usage_accumulates_and_flushes() {
        let store = StateStore::open_in_memory().unwrap();
        let usage = TenantUsage::load(&store, "acme").unwrap();

        usage.add(&cost(1_000, 1024, 100));
        usage.add(&cost(1_000, 1024, 50));
        let r = usage.snapshot();
        assert_eq!(r.calls, 2);
        assert_eq!(r.bytes_out, 150);
        assert!((r.gbs - 2.0).abs() < 1e-9);

        assert!(usage.flush(&store).unwrap());
        assert_eq!(store.get_tenant_stats("acme").unwrap().calls, 2);
    }
}
