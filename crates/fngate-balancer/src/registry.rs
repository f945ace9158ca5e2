//! Registry — process-wide cache of function and tenant runtimes.
//!
//! Entries are created on first lookup and live until explicitly torn
//! down (functions) or until the registry shuts down (tenants). Creation
//! reads the store outside the map lock and then inserts with
//! create-if-absent semantics: concurrent creators all get the winner's
//! instance and only the winner starts background work.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex, PoisonError};

use fngate_autoscale::{Orchestrator, Scaler};
use fngate_state::{Cookie, Endpoint, FnStatsRecord, StateStore, TenantId};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::GateConfig;
use crate::error::{BalancerError, BalancerResult};
use crate::ratelimit::RateLimiter;
use crate::runtime::{FnRuntime, TenantRuntime};
use crate::stats::FnStats;

/// Pod lifecycle event pushed by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PodEvent {
    /// A pod passed readiness and can take calls.
    Ready(Endpoint),
    /// A pod was removed or became unready.
    Gone { cookie: Cookie, pod: String },
}

impl PodEvent {
    pub fn cookie(&self) -> &Cookie {
        match self {
            Self::Ready(e) => &e.cookie,
            Self::Gone { cookie, .. } => cookie,
        }
    }
}

/// Diagnostic view of a cached function.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionInfo {
    pub cookie: Cookie,
    pub tenant: TenantId,
    pub version: String,
    pub deployment: String,
    pub goal: u32,
    pub acked_replicas: u32,
    pub scaler_running: bool,
    pub scaler_phase: String,
    pub endpoints: usize,
    pub selected: u32,
    pub completed: u32,
    pub stats: FnStatsRecord,
}

pub struct Registry {
    store: StateStore,
    orchestrator: Arc<dyn Orchestrator>,
    config: GateConfig,
    global: Option<RateLimiter>,
    /// Function runtimes: cookie → runtime.
    functions: RwLock<HashMap<Cookie, Arc<FnRuntime>>>,
    /// Tenant runtimes: tenant → runtime.
    tenants: RwLock<HashMap<TenantId, Arc<TenantRuntime>>>,
    refreshers: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Registry {
    pub fn new(store: StateStore, orchestrator: Arc<dyn Orchestrator>, config: GateConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            global: config.limits.global_rate.map(RateLimiter::new),
            store,
            orchestrator,
            config,
            functions: RwLock::new(HashMap::new()),
            tenants: RwLock::new(HashMap::new()),
            refreshers: Mutex::new(Vec::new()),
            shutdown_tx,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn global_limiter(&self) -> Option<&RateLimiter> {
        self.global.as_ref()
    }

    /// A receiver that flips to `true` when the registry shuts down.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    // ── Lookup ─────────────────────────────────────────────────────

    /// Get the runtime of `cookie`, building it from the store on first use.
    pub async fn function(&self, cookie: &Cookie) -> BalancerResult<Arc<FnRuntime>> {
        if let Some(rt) = self.functions.read().await.get(cookie) {
            return Ok(Arc::clone(rt));
        }

        let config = self
            .store
            .get_function(cookie)?
            .ok_or_else(|| BalancerError::FunctionNotFound(cookie.clone()))?;
        let tenant = self.tenant(&config.tenant).await?;
        let stats = FnStats::load(&self.store, cookie)?;
        let scaler = Scaler::new(
            config.deployment.clone(),
            Arc::clone(&self.orchestrator),
            self.config.scaler_timeouts(),
            self.config.scaling.max_replicas,
        );
        let candidate = Arc::new(FnRuntime::new(config, scaler, tenant, stats));

        let mut functions = self.functions.write().await;
        let rt = match functions.entry(cookie.clone()) {
            Entry::Occupied(e) => Arc::clone(e.get()),
            Entry::Vacant(e) => {
                debug!(%cookie, "function runtime created");
                Arc::clone(e.insert(candidate))
            }
        };
        Ok(rt)
    }

    /// Get the runtime of `tenant`, building it and starting its limits
    /// refresher on first use.
    pub async fn tenant(&self, tenant: &str) -> BalancerResult<Arc<TenantRuntime>> {
        if let Some(rt) = self.tenants.read().await.get(tenant) {
            return Ok(Arc::clone(rt));
        }

        let candidate = Arc::new(TenantRuntime::load(&self.store, tenant)?);

        let mut tenants = self.tenants.write().await;
        let rt = match tenants.entry(tenant.to_string()) {
            Entry::Occupied(e) => Arc::clone(e.get()),
            Entry::Vacant(e) => {
                let rt = Arc::clone(e.insert(candidate));
                let handle = tokio::spawn(Arc::clone(&rt).run_refresher(
                    self.store.clone(),
                    self.config.limits.refresh_period,
                    self.shutdown_tx.subscribe(),
                ));
                self.refreshers
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(handle);
                debug!(%tenant, "tenant runtime created");
                rt
            }
        };
        Ok(rt)
    }

    /// The cached runtime of `cookie`, without creating one.
    pub async fn cached(&self, cookie: &Cookie) -> Option<Arc<FnRuntime>> {
        self.functions.read().await.get(cookie).cloned()
    }

    // ── Administrative hooks ───────────────────────────────────────

    /// Mirror a pod lifecycle change into the store and flush the cached
    /// table of the function, if any. Tables are refilled lazily.
    pub async fn notify_pod_event(&self, event: &PodEvent) -> BalancerResult<()> {
        match event {
            PodEvent::Ready(endpoint) => {
                self.store.add_endpoint(endpoint)?;
                debug!(cookie = %endpoint.cookie, pod = %endpoint.pod, "pod ready");
            }
            PodEvent::Gone { cookie, pod } => {
                self.store.remove_endpoint(cookie, pod)?;
                debug!(%cookie, %pod, "pod gone");
            }
        }
        self.flush_endpoints(event.cookie()).await;
        Ok(())
    }

    /// Flush the cached endpoint table of `cookie`. Returns whether the
    /// function was cached.
    pub async fn flush_endpoints(&self, cookie: &Cookie) -> bool {
        match self.cached(cookie).await {
            Some(rt) => {
                rt.table.flush();
                true
            }
            None => false,
        }
    }

    /// Raise the scaling goal of `cookie`. Returns the resulting goal.
    pub async fn grow(&self, cookie: &Cookie, goal: u32) -> BalancerResult<u32> {
        let rt = self.function(cookie).await?;
        rt.scaler.grow(goal);
        Ok(rt.scaler.goal())
    }

    /// Remove a function: drop its runtime, stop its scaler, and delete
    /// its config, endpoints and stats from the store. Returns whether
    /// anything existed.
    pub async fn teardown(&self, cookie: &Cookie) -> BalancerResult<bool> {
        let cached = self.functions.write().await.remove(cookie);
        if let Some(rt) = &cached {
            rt.table.flush();
            rt.scaler.stop();
        }

        let removed_config = self.store.delete_function(cookie)?;
        let removed_endpoints = self.store.remove_all_endpoints(cookie)?;
        self.store.delete_fn_stats(cookie)?;

        info!(%cookie, endpoints = removed_endpoints, "function torn down");
        Ok(cached.is_some() || removed_config || removed_endpoints > 0)
    }

    /// Re-read the config of a cached function and apply it in place.
    /// Returns false if the function is not cached.
    pub async fn reload_function(&self, cookie: &Cookie) -> BalancerResult<bool> {
        let Some(rt) = self.cached(cookie).await else {
            return Ok(false);
        };
        let config = self
            .store
            .get_function(cookie)?
            .ok_or_else(|| BalancerError::FunctionNotFound(cookie.clone()))?;
        rt.apply_config(config);
        debug!(%cookie, "function config reloaded");
        Ok(true)
    }

    /// Restart scaling workers for deployments that are above one replica,
    /// so they are relaxed back down. Returns the number of workers started.
    pub async fn resume_scaling(&self) -> BalancerResult<u32> {
        let mut resumed = 0;
        for config in self.store.list_functions()? {
            let replicas = match self.orchestrator.current_replicas(&config.deployment).await {
                Ok(n) => n,
                Err(e) => {
                    warn!(cookie = %config.cookie, deployment = %config.deployment, error = %e, "cannot read replicas");
                    continue;
                }
            };
            if replicas <= 1 {
                continue;
            }
            let rt = self.function(&config.cookie).await?;
            if rt.scaler.grow(replicas) {
                info!(cookie = %config.cookie, replicas, "resumed scaling worker");
                resumed += 1;
            }
        }
        Ok(resumed)
    }

    // ── Stats ──────────────────────────────────────────────────────

    /// Write dirty function and tenant stats to the store.
    pub async fn flush_stats(&self) -> BalancerResult<usize> {
        let functions: Vec<Arc<FnRuntime>> = self.functions.read().await.values().cloned().collect();
        let tenants: Vec<Arc<TenantRuntime>> = self.tenants.read().await.values().cloned().collect();

        let mut written = 0;
        for rt in functions {
            if rt.stats.flush(&self.store)? {
                written += 1;
            }
        }
        for rt in tenants {
            if rt.usage.flush(&self.store)? {
                written += 1;
            }
        }
        Ok(written)
    }

    /// Flush stats every `[stats].flush_period` until shutdown.
    pub async fn run_stats_flusher(&self, mut shutdown: watch::Receiver<bool>) {
        let period = self.config.stats.flush_period;
        info!(period_secs = period.as_secs(), "stats flusher started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(period) => {
                    match self.flush_stats().await {
                        Ok(n) if n > 0 => debug!(records = n, "stats flushed"),
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "stats flush failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("stats flusher shutting down");
                    break;
                }
            }
        }
    }

    /// `(cached functions, running scalers)`.
    pub async fn gauges(&self) -> (u64, u64) {
        let functions = self.functions.read().await;
        let running = functions.values().filter(|rt| rt.scaler.is_running()).count();
        (functions.len() as u64, running as u64)
    }

    pub async fn info(&self, cookie: &Cookie) -> Option<FunctionInfo> {
        let rt = self.cached(cookie).await?;
        let config = rt.config();
        let (selected, completed) = rt.table.counters();
        Some(FunctionInfo {
            cookie: rt.cookie.clone(),
            tenant: config.tenant.clone(),
            version: config.version.clone(),
            deployment: config.deployment.clone(),
            goal: rt.scaler.goal(),
            acked_replicas: rt.scaler.acked(),
            scaler_running: rt.scaler.is_running(),
            scaler_phase: format!("{:?}", rt.scaler.phase()),
            endpoints: rt.table.len(),
            selected,
            completed,
            stats: rt.stats.snapshot(),
        })
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Stop every scaling worker and tenant refresher and flush stats.
    pub async fn shutdown(&self) -> BalancerResult<()> {
        info!("registry shutting down");
        let _ = self.shutdown_tx.send(true);

        for rt in self.functions.read().await.values() {
            rt.scaler.stop();
        }

        let handles: Vec<JoinHandle<()>> = self
            .refreshers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "tenant refresher task failed");
            }
        }

        self.flush_stats().await?;
        Ok(())
    }
}
