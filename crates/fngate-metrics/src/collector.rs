//! Gate metrics collector.
//!
//! Gate-wide counters are plain atomics. Per-function buckets live in a
//! map keyed by cookie; their latency samples are kept in a bounded
//! window so percentiles reflect recent traffic.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Latency samples retained per function.
const LATENCY_WINDOW: usize = 1024;

/// Outcome of a call that reached a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Timeout,
    Error,
}

impl CallOutcome {
    pub const ALL: [CallOutcome; 3] = [Self::Success, Self::Timeout, Self::Error];

    pub fn label(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Timeout => "timeout",
            Self::Error => "error",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Reason a call was rejected before reaching a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    Unavailable,
    RateLimited,
    QuotaExceeded,
    NoCapacity,
    Unauthorized,
}

impl Denial {
    pub const ALL: [Denial; 5] = [
        Self::Unavailable,
        Self::RateLimited,
        Self::QuotaExceeded,
        Self::NoCapacity,
        Self::Unauthorized,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Unavailable => "unavailable",
            Self::RateLimited => "rate_limited",
            Self::QuotaExceeded => "quota_exceeded",
            Self::NoCapacity => "no_capacity",
            Self::Unauthorized => "unauthorized",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Per-function metrics bucket.
struct FunctionMetrics {
    calls: AtomicU64,
    errors: AtomicU64,
    timeouts: AtomicU64,
    /// Most recent call latencies in microseconds.
    latencies: Mutex<VecDeque<u64>>,
}

impl FunctionMetrics {
    fn new() -> Self {
        Self {
            calls: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            latencies: Mutex::new(VecDeque::with_capacity(LATENCY_WINDOW)),
        }
    }
}

/// Point-in-time view of one function's metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSnapshot {
    pub cookie: String,
    pub calls: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub latency_p50_ms: f64,
    pub latency_p99_ms: f64,
}

/// Point-in-time view of all gate metrics.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GateSnapshot {
    /// Calls by outcome, indexed like [`CallOutcome::ALL`].
    pub calls: [u64; 3],
    /// Rejections by reason, indexed like [`Denial::ALL`].
    pub denials: [u64; 5],
    pub functions_cached: u64,
    pub scalers_running: u64,
    pub functions: Vec<FunctionSnapshot>,
}

impl GateSnapshot {
    pub fn calls(&self, outcome: CallOutcome) -> u64 {
        self.calls[outcome.index()]
    }

    pub fn denials(&self, denial: Denial) -> u64 {
        self.denials[denial.index()]
    }
}

/// Collects gate metrics. Shared behind an `Arc` by the dispatcher, the
/// registry, and the `/metrics` handler.
pub struct GateMetrics {
    calls: [AtomicU64; 3],
    denials: [AtomicU64; 5],
    functions_cached: AtomicU64,
    scalers_running: AtomicU64,
    /// Per-function metrics: cookie → bucket.
    functions: RwLock<HashMap<String, Arc<FunctionMetrics>>>,
}

impl Default for GateMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GateMetrics {
    pub fn new() -> Self {
        Self {
            calls: Default::default(),
            denials: Default::default(),
            functions_cached: AtomicU64::new(0),
            scalers_running: AtomicU64::new(0),
            functions: RwLock::new(HashMap::new()),
        }
    }

    /// Record a call that reached a sandbox.
    pub async fn record_call(&self, cookie: &str, outcome: CallOutcome, latency_us: u64) {
        self.calls[outcome.index()].fetch_add(1, Ordering::Relaxed);

        let bucket = {
            let functions = self.functions.read().await;
            functions.get(cookie).cloned()
        };
        let bucket = match bucket {
            Some(b) => b,
            None => {
                let mut functions = self.functions.write().await;
                functions
                    .entry(cookie.to_string())
                    .or_insert_with(|| Arc::new(FunctionMetrics::new()))
                    .clone()
            }
        };

        bucket.calls.fetch_add(1, Ordering::Relaxed);
        match outcome {
            CallOutcome::Success => {}
            CallOutcome::Timeout => {
                bucket.timeouts.fetch_add(1, Ordering::Relaxed);
            }
            CallOutcome::Error => {
                bucket.errors.fetch_add(1, Ordering::Relaxed);
            }
        }

        let mut latencies = bucket.latencies.lock().await;
        if latencies.len() == LATENCY_WINDOW {
            latencies.pop_front();
        }
        latencies.push_back(latency_us);
    }

    /// Record a call rejected before dispatch.
    pub fn record_denial(&self, denial: Denial) {
        self.denials[denial.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// Update the cache-size gauges.
    pub fn set_gauges(&self, functions_cached: u64, scalers_running: u64) {
        self.functions_cached
            .store(functions_cached, Ordering::Relaxed);
        self.scalers_running
            .store(scalers_running, Ordering::Relaxed);
    }

    /// Drop a function's bucket once it is torn down.
    pub async fn forget_function(&self, cookie: &str) {
        if self.functions.write().await.remove(cookie).is_some() {
            debug!(%cookie, "dropped function metrics");
        }
    }

    pub fn calls(&self, outcome: CallOutcome) -> u64 {
        self.calls[outcome.index()].load(Ordering::Relaxed)
    }

    pub fn denials(&self, denial: Denial) -> u64 {
        self.denials[denial.index()].load(Ordering::Relaxed)
    }

    /// Take a snapshot of all counters. Counters are never reset.
    pub async fn snapshot(&self) -> GateSnapshot {
        let functions = self.functions.read().await;
        let mut per_fn = Vec::with_capacity(functions.len());

        for (cookie, m) in functions.iter() {
            let samples: Vec<u64> = m.latencies.lock().await.iter().copied().collect();
            let (p50, p99) = compute_percentiles(&samples);
            per_fn.push(FunctionSnapshot {
                cookie: cookie.clone(),
                calls: m.calls.load(Ordering::Relaxed),
                errors: m.errors.load(Ordering::Relaxed),
                timeouts: m.timeouts.load(Ordering::Relaxed),
                latency_p50_ms: p50,
                latency_p99_ms: p99,
            });
        }
        per_fn.sort_by(|a, b| a.cookie.cmp(&b.cookie));

        GateSnapshot {
            calls: std::array::from_fn(|i| self.calls[i].load(Ordering::Relaxed)),
            denials: std::array::from_fn(|i| self.denials[i].load(Ordering::Relaxed)),
            functions_cached: self.functions_cached.load(Ordering::Relaxed),
            scalers_running: self.scalers_running.load(Ordering::Relaxed),
            functions: per_fn,
        }
    }
}

/// Compute P50 and P99 latency from unsorted samples.
///
/// Returns (p50_ms, p99_ms). If empty, returns (0.0, 0.0).
fn compute_percentiles(latencies: &[u64]) -> (f64, f64) {
    if latencies.is_empty() {
        return (0.0, 0.0);
    }

    let mut sorted = latencies.to_vec();
    sorted.sort_unstable();

    let last = sorted.len() - 1;
    let p50 = sorted[((sorted.len() as f64 * 0.50) as usize).min(last)] as f64 / 1000.0;
    let p99 = sorted[((sorted.len() as f64 * 0.99) as usize).min(last)] as f64 / 1000.0;

    (p50, p99)
}
