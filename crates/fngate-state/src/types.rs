//! Domain types for the fngate state store.
//!
//! These types represent the persisted state of functions, their pod
//! endpoints, tenant limits, usage snapshots, and statistics. All types
//! are serializable to/from JSON for storage in redb tables.

use serde::{Deserialize, Serialize};

use crate::cookie::Cookie;

/// Tenant identifier.
pub type TenantId = String;

// ── Functions ─────────────────────────────────────────────────────

/// Token-bucket parameters: `burst` tokens of capacity, refilled at
/// `rate` tokens per second.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RateLimit {
    pub burst: u32,
    pub rate: u32,
}

/// Persisted configuration of a deployed function.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionConfig {
    pub cookie: Cookie,
    pub tenant: TenantId,
    pub project: String,
    pub name: String,
    /// Currently running code version. Endpoints of other versions are
    /// not routed to.
    pub version: String,
    /// Orchestrator deployment backing this function.
    pub deployment: String,
    /// Per-function call rate limit. `None` disables the tier.
    pub rate_limit: Option<RateLimit>,
    /// Memory allocated to each pod, in megabytes.
    pub memory_mb: u64,
    /// Maximum call duration in milliseconds. 0 uses the gate default.
    pub timeout_ms: u64,
    /// Reference to an auth context that must verify every call.
    pub auth_ref: Option<String>,
}

impl FunctionConfig {
    /// Build a config with the cookie derived from tenant/project/name.
    pub fn new(tenant: &str, project: &str, name: &str, deployment: &str) -> Self {
        Self {
            cookie: Cookie::new(tenant, project, name),
            tenant: tenant.to_string(),
            project: project.to_string(),
            name: name.to_string(),
            version: "0".to_string(),
            deployment: deployment.to_string(),
            rate_limit: None,
            memory_mb: 64,
            timeout_ms: 0,
            auth_ref: None,
        }
    }
}

// ── Endpoints ─────────────────────────────────────────────────────

/// Network address of one running sandbox pod of a function.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub cookie: Cookie,
    /// Orchestrator pod identifier.
    pub pod: String,
    pub address: String,
    pub port: u16,
    /// Code version this pod runs.
    pub version: String,
}

impl Endpoint {
    /// `address:port` string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Build the composite key for the endpoints table.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.cookie, self.pod)
    }
}

// ── Tenants ───────────────────────────────────────────────────────

/// Limits configured for a tenant. Zero quotas are unbounded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TenantLimits {
    pub tenant: TenantId,
    /// Tenant-wide call rate limit. `None` disables the tier.
    pub rate_limit: Option<RateLimit>,
    /// GB-seconds allowed between two usage snapshots.
    pub gbs: f64,
    /// Bytes allowed to leave functions between two usage snapshots.
    pub bytes_out: u64,
}

/// Archived usage of a tenant at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct UsageSnapshot {
    pub tenant: TenantId,
    /// Unix timestamp (seconds) the snapshot was taken at.
    pub epoch: u64,
    pub gbs: f64,
    pub bytes_out: u64,
}

impl UsageSnapshot {
    /// Build the composite key for the usage snapshots table.
    ///
    /// The epoch is zero-padded so that lexicographic order is time order.
    pub fn table_key(&self) -> String {
        format!("{}:{:020}", self.tenant, self.epoch)
    }
}

// ── Stats ─────────────────────────────────────────────────────────

/// Cumulative call statistics of a function.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FnStatsRecord {
    pub cookie: Cookie,
    pub called: u64,
    pub errors: u64,
    pub timeouts: u64,
    /// Unix timestamp (seconds) of the last completed call.
    pub last_call: u64,
    /// Total sandbox run time in microseconds.
    pub run_time_us: u64,
    pub gbs: f64,
    pub bytes_out: u64,
}

/// Cumulative usage of a tenant across all its functions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TenantStatsRecord {
    pub tenant: TenantId,
    pub calls: u64,
    pub gbs: f64,
    pub bytes_out: u64,
}
