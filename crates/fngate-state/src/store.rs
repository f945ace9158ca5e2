//! StateStore — redb-backed state persistence for fngate.
//!
//! Provides typed CRUD operations over functions, pod endpoints, tenant
//! limits, usage snapshots, and statistics. All values are JSON-serialized
//! into redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::cookie::Cookie;
use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type Table = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        for table in [
            FUNCTIONS,
            ENDPOINTS,
            TENANT_LIMITS,
            USAGE_SNAPSHOTS,
            FN_STATS,
            TENANT_STATS,
        ] {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic row access ─────────────────────────────────────────

    fn put<T: Serialize>(&self, table: Table, key: &str, value: &T) -> StateResult<()> {
        let value = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            t.insert(key, value.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, table: Table, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        match t.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn delete(&self, table: Table, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            existed = t.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    /// All rows whose key starts with `prefix`, in key order.
    fn scan<T: DeserializeOwned>(&self, table: Table, prefix: &str) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in t.range(prefix..).map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(prefix) {
                break;
            }
            results.push(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
        }
        Ok(results)
    }

    // ── Functions ──────────────────────────────────────────────────

    /// Insert or update a function configuration.
    pub fn put_function(&self, config: &FunctionConfig) -> StateResult<()> {
        self.put(FUNCTIONS, config.cookie.as_str(), config)?;
        debug!(cookie = %config.cookie, name = %config.name, "function stored");
        Ok(())
    }

    /// Get a function configuration by cookie.
    pub fn get_function(&self, cookie: &Cookie) -> StateResult<Option<FunctionConfig>> {
        self.get(FUNCTIONS, cookie.as_str())
    }

    /// List all function configurations.
    pub fn list_functions(&self) -> StateResult<Vec<FunctionConfig>> {
        self.scan(FUNCTIONS, "")
    }

    /// Delete a function configuration. Returns true if it existed.
    pub fn delete_function(&self, cookie: &Cookie) -> StateResult<bool> {
        let existed = self.delete(FUNCTIONS, cookie.as_str())?;
        debug!(%cookie, existed, "function deleted");
        Ok(existed)
    }

    // ── Endpoints ──────────────────────────────────────────────────

    /// Record a pod endpoint for a function (insert or replace).
    pub fn add_endpoint(&self, endpoint: &Endpoint) -> StateResult<()> {
        self.put(ENDPOINTS, &endpoint.table_key(), endpoint)?;
        debug!(cookie = %endpoint.cookie, pod = %endpoint.pod, addr = %endpoint.addr(), "endpoint added");
        Ok(())
    }

    /// Forget a pod endpoint. Returns true if it existed.
    pub fn remove_endpoint(&self, cookie: &Cookie, pod: &str) -> StateResult<bool> {
        let existed = self.delete(ENDPOINTS, &format!("{cookie}:{pod}"))?;
        debug!(%cookie, pod, existed, "endpoint removed");
        Ok(existed)
    }

    /// Forget every endpoint of a function. Returns number deleted.
    pub fn remove_all_endpoints(&self, cookie: &Cookie) -> StateResult<u32> {
        let prefix = format!("{cookie}:");
        // Collect keys in a read transaction first.
        let keys: Vec<String> = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(ENDPOINTS).map_err(map_err!(Table))?;
            let mut keys = Vec::new();
            for entry in table.range(prefix.as_str()..).map_err(map_err!(Read))? {
                let (key, _) = entry.map_err(map_err!(Read))?;
                let k = key.value();
                if !k.starts_with(&prefix) {
                    break;
                }
                keys.push(k.to_string());
            }
            keys
        };
        // Delete in a write transaction.
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count = keys.len() as u32;
        {
            let mut table = txn.open_table(ENDPOINTS).map_err(map_err!(Table))?;
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%cookie, count, "all endpoints removed");
        Ok(count)
    }

    /// List every endpoint recorded for a function.
    pub fn list_endpoints(&self, cookie: &Cookie) -> StateResult<Vec<Endpoint>> {
        self.scan(ENDPOINTS, &format!("{cookie}:"))
    }

    // ── Tenants ────────────────────────────────────────────────────

    /// Insert or update a tenant's limits.
    pub fn put_tenant_limits(&self, limits: &TenantLimits) -> StateResult<()> {
        self.put(TENANT_LIMITS, &limits.tenant, limits)
    }

    /// Get a tenant's limits. Tenants without a record get unbounded limits.
    pub fn get_tenant_limits(&self, tenant: &str) -> StateResult<TenantLimits> {
        Ok(self
            .get(TENANT_LIMITS, tenant)?
            .unwrap_or_else(|| TenantLimits {
                tenant: tenant.to_string(),
                ..Default::default()
            }))
    }

    /// Archive a usage snapshot.
    pub fn put_usage_snapshot(&self, snapshot: &UsageSnapshot) -> StateResult<()> {
        self.put(USAGE_SNAPSHOTS, &snapshot.table_key(), snapshot)
    }

    /// Latest archived usage snapshot of a tenant. Tenants that were
    /// never archived get a zero baseline.
    pub fn latest_usage_snapshot(&self, tenant: &str) -> StateResult<UsageSnapshot> {
        let prefix = format!("{tenant}:");
        let start = format!("{prefix}{:020}", 0);
        let end = format!("{prefix}{}", "9".repeat(20));
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(USAGE_SNAPSHOTS).map_err(map_err!(Table))?;

        // Tenant ids may contain ':', so only `{tenant}:{epoch:020}` keys
        // belong to this tenant.
        for entry in table
            .range(start.as_str()..=end.as_str())
            .map_err(map_err!(Read))?
            .rev()
        {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let epoch = &key.value()[prefix.len()..];
            if epoch.len() == 20 && epoch.bytes().all(|b| b.is_ascii_digit()) {
                return serde_json::from_slice(value.value()).map_err(map_err!(Deserialize));
            }
        }
        Ok(UsageSnapshot {
            tenant: tenant.to_string(),
            ..Default::default()
        })
    }

    // ── Stats ──────────────────────────────────────────────────────

    /// Insert or update a function's cumulative stats.
    pub fn put_fn_stats(&self, stats: &FnStatsRecord) -> StateResult<()> {
        self.put(FN_STATS, stats.cookie.as_str(), stats)
    }

    /// Get a function's cumulative stats (zeroed if never written).
    pub fn get_fn_stats(&self, cookie: &Cookie) -> StateResult<FnStatsRecord> {
        Ok(self
            .get(FN_STATS, cookie.as_str())?
            .unwrap_or_else(|| FnStatsRecord {
                cookie: cookie.clone(),
                ..Default::default()
            }))
    }

    /// Drop a function's stats. Returns true if they existed.
    pub fn delete_fn_stats(&self, cookie: &Cookie) -> StateResult<bool> {
        self.delete(FN_STATS, cookie.as_str())
    }

    /// Insert or update a tenant's cumulative stats.
    pub fn put_tenant_stats(&self, stats: &TenantStatsRecord) -> StateResult<()> {
        self.put(TENANT_STATS, &stats.tenant, stats)
    }

    /// Get a tenant's cumulative stats (zeroed if never written).
    pub fn get_tenant_stats(&self, tenant: &str) -> StateResult<TenantStatsRecord> {
        Ok(self
            .get(TENANT_STATS, tenant)?
            .unwrap_or_else(|| TenantStatsRecord {
                tenant: tenant.to_string(),
                ..Default::default()
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_function(tenant: &str, name: &str) -> FunctionConfig {
        let mut config = FunctionConfig::new(tenant, "default", name, &format!("dep-{name}"));
        config.rate_limit = Some(RateLimit { burst: 5, rate: 10 });
        config.memory_mb = 128;
        config
    }

    fn test_endpoint(cookie: &Cookie, pod: &str, ip: &str) -> Endpoint {
        Endpoint {
            cookie: cookie.clone(),
            pod: pod.to_string(),
            address: ip.to_string(),
            port: 8687,
            version: "1".to_string(),
        }
    }

    // ── Function CRUD ──────────────────────────────────────────────

    #[test]
    fn function_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let config = test_function("acme", "resize");

        store.put_function(&config).unwrap();
        let retrieved = store.get_function(&config.cookie).unwrap();

        assert_eq!(retrieved, Some(config));
    }

    #[test]
    fn function_get_nonexistent_returns_none() {
        let store = StateStore::open_in_memory().unwrap();
        let result = store.get_function(&Cookie::new("no", "such", "fn")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn function_list_and_delete() {
        let store = StateStore::open_in_memory().unwrap();
        let a = test_function("acme", "a");
        store.put_function(&a).unwrap();
        store.put_function(&test_function("acme", "b")).unwrap();
        store.put_function(&test_function("other", "c")).unwrap();

        assert_eq!(store.list_functions().unwrap().len(), 3);

        assert!(store.delete_function(&a.cookie).unwrap());
        assert!(!store.delete_function(&a.cookie).unwrap());
        assert_eq!(store.list_functions().unwrap().len(), 2);
    }

    // ── Endpoints ──────────────────────────────────────────────────

    #[test]
    fn endpoints_are_scoped_by_cookie() {
        let store = StateStore::open_in_memory().unwrap();
        let a = Cookie::new("acme", "default", "a");
        let b = Cookie::new("acme", "default", "b");

        store.add_endpoint(&test_endpoint(&a, "pod-1", "10.0.0.1")).unwrap();
        store.add_endpoint(&test_endpoint(&a, "pod-2", "10.0.0.2")).unwrap();
        store.add_endpoint(&test_endpoint(&b, "pod-3", "10.0.0.3")).unwrap();

        assert_eq!(store.list_endpoints(&a).unwrap().len(), 2);
        assert_eq!(store.list_endpoints(&b).unwrap().len(), 1);
    }

    #[test]
    fn add_endpoint_replaces_same_pod() {
        let store = StateStore::open_in_memory().unwrap();
        let c = Cookie::new("acme", "default", "a");

        store.add_endpoint(&test_endpoint(&c, "pod-1", "10.0.0.1")).unwrap();
        store.add_endpoint(&test_endpoint(&c, "pod-1", "10.0.0.9")).unwrap();

        let eps = store.list_endpoints(&c).unwrap();
        assert_eq!(eps.len(), 1);
        assert_eq!(eps[0].address, "10.0.0.9");
    }

    #[test]
    fn remove_endpoint_single_and_all() {
        let store = StateStore::open_in_memory().unwrap();
        let a = Cookie::new("acme", "default", "a");
        let b = Cookie::new("acme", "default", "b");
        store.add_endpoint(&test_endpoint(&a, "pod-1", "10.0.0.1")).unwrap();
        store.add_endpoint(&test_endpoint(&a, "pod-2", "10.0.0.2")).unwrap();
        store.add_endpoint(&test_endpoint(&a, "pod-3", "10.0.0.3")).unwrap();
        store.add_endpoint(&test_endpoint(&b, "pod-4", "10.0.0.4")).unwrap();

        assert!(store.remove_endpoint(&a, "pod-1").unwrap());
        assert!(!store.remove_endpoint(&a, "pod-1").unwrap());
        assert_eq!(store.list_endpoints(&a).unwrap().len(), 2);

        assert_eq!(store.remove_all_endpoints(&a).unwrap(), 2);
        assert!(store.list_endpoints(&a).unwrap().is_empty());
        // b untouched
        assert_eq!(store.list_endpoints(&b).unwrap().len(), 1);
    }

    #[test]
    fn remove_all_endpoints_stops_at_neighbouring_cookie() {
        let store = StateStore::open_in_memory().unwrap();
        let first = Cookie::from_raw("c1");
        let second = Cookie::from_raw("c2");
        let third = Cookie::from_raw("c3");
        for cookie in [&first, &second, &third] {
            store.add_endpoint(&test_endpoint(cookie, "pod-1", "10.0.0.1")).unwrap();
            store.add_endpoint(&test_endpoint(cookie, "pod-2", "10.0.0.2")).unwrap();
        }

        assert_eq!(store.remove_all_endpoints(&second).unwrap(), 2);
        assert!(store.list_endpoints(&second).unwrap().is_empty());
        assert_eq!(store.list_endpoints(&first).unwrap().len(), 2);
        assert_eq!(store.list_endpoints(&third).unwrap().len(), 2);
    }

    // ── Tenants ────────────────────────────────────────────────────

    #[test]
    fn tenant_limits_default_to_unbounded() {
        let store = StateStore::open_in_memory().unwrap();
        let limits = store.get_tenant_limits("acme").unwrap();
        assert_eq!(limits.tenant, "acme");
        assert_eq!(limits.gbs, 0.0);
        assert_eq!(limits.bytes_out, 0);
        assert!(limits.rate_limit.is_none());
    }

    #[test]
    fn tenant_limits_roundtrip() {
        let store = StateStore::open_in_memory().unwrap();
        let limits = TenantLimits {
            tenant: "acme".to_string(),
            rate_limit: Some(RateLimit { burst: 100, rate: 50 }),
            gbs: 3600.0,
            bytes_out: 1 << 30,
        };
        store.put_tenant_limits(&limits).unwrap();
        assert_eq!(store.get_tenant_limits("acme").unwrap(), limits);
    }

    #[test]
    fn latest_usage_snapshot_picks_newest_epoch() {
        let store = StateStore::open_in_memory().unwrap();
        for (epoch, gbs) in [(900u64, 1.0), (10_000, 3.0), (1_000, 2.0)] {
            store
                .put_usage_snapshot(&UsageSnapshot {
                    tenant: "acme".to_string(),
                    epoch,
                    gbs,
                    bytes_out: epoch,
                })
                .unwrap();
        }
        // Another tenant whose name shares a prefix.
        store
            .put_usage_snapshot(&UsageSnapshot {
                tenant: "acme2".to_string(),
                epoch: 99_999,
                gbs: 99.0,
                bytes_out: 0,
            })
            .unwrap();

        let latest = store.latest_usage_snapshot("acme").unwrap();
        assert_eq!(latest.epoch, 10_000);
        assert_eq!(latest.gbs, 3.0);
    }

    #[test]
    fn latest_usage_snapshot_ignores_tenants_nested_under_the_id() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .put_usage_snapshot(&UsageSnapshot {
                tenant: "a".to_string(),
                epoch: 500,
                gbs: 1.0,
                bytes_out: 0,
            })
            .unwrap();
        for tenant in ["a:b", "a:1"] {
            store
                .put_usage_snapshot(&UsageSnapshot {
                    tenant: tenant.to_string(),
                    epoch: 900,
                    gbs: 99.0,
                    bytes_out: 0,
                })
                .unwrap();
        }

        let latest = store.latest_usage_snapshot("a").unwrap();
        assert_eq!(latest.tenant, "a");
        assert_eq!(latest.epoch, 500);
        assert_eq!(store.latest_usage_snapshot("a:1").unwrap().gbs, 99.0);
    }

    #[test]
    fn latest_usage_snapshot_defaults_to_zero() {
        let store = StateStore::open_in_memory().unwrap();
        let snap = store.latest_usage_snapshot("nobody").unwrap();
        assert_eq!(snap.tenant, "nobody");
        assert_eq!(snap.gbs, 0.0);
        assert_eq!(snap.bytes_out, 0);
    }

    // ── Stats ──────────────────────────────────────────────────────

    #[test]
    fn fn_stats_roundtrip_and_delete() {
        let store = StateStore::open_in_memory().unwrap();
        let cookie = Cookie::new("acme", "default", "a");

        assert_eq!(store.get_fn_stats(&cookie).unwrap().called, 0);

        let stats = FnStatsRecord {
            cookie: cookie.clone(),
            called: 10,
            errors: 1,
            timeouts: 2,
            last_call: 1234,
            run_time_us: 5_000,
            gbs: 0.5,
            bytes_out: 2048,
        };
        store.put_fn_stats(&stats).unwrap();
        assert_eq!(store.get_fn_stats(&cookie).unwrap(), stats);

        assert!(store.delete_fn_stats(&cookie).unwrap());
        assert_eq!(store.get_fn_stats(&cookie).unwrap().called, 0);
    }

    #[test]
    fn tenant_stats_roundtrip() {
        let store = StateStore::open_in_memory().unwrap();
        let stats = TenantStatsRecord {
            tenant: "acme".to_string(),
            calls: 3,
            gbs: 1.5,
            bytes_out: 300,
        };
        store.put_tenant_stats(&stats).unwrap();
        assert_eq!(store.get_tenant_stats("acme").unwrap(), stats);
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");
        let config = test_function("prod", "api");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.put_function(&config).unwrap();
            store
                .add_endpoint(&test_endpoint(&config.cookie, "pod-1", "10.0.0.1"))
                .unwrap();
        }

        // Reopen the same database file.
        let store = StateStore::open(&db_path).unwrap();
        let stored = store.get_function(&config.cookie).unwrap();
        assert_eq!(stored.unwrap().name, "api");
        assert_eq!(store.list_endpoints(&config.cookie).unwrap().len(), 1);
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();
        let cookie = Cookie::new("a", "b", "c");

        assert!(store.list_functions().unwrap().is_empty());
        assert!(store.list_endpoints(&cookie).unwrap().is_empty());
        assert_eq!(store.remove_all_endpoints(&cookie).unwrap(), 0);
        assert!(!store.remove_endpoint(&cookie, "nope").unwrap());
        assert!(!store.delete_function(&cookie).unwrap());
    }
}
