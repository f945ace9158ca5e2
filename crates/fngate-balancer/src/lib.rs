//! fngate-balancer — the call gate of the fngate control plane.
//!
//! Admits calls through three token-bucket tiers and a tenant resource
//! ledger, picks a pod endpoint round-robin, feeds observed demand to the
//! function's scaler, and hands the call to an [`Invoker`].
//!
//! # Architecture
//!
//! ```text
//! Dispatcher::dispatch(cookie, call)
//!   │
//!   ├── Registry::function(cookie) ─▶ FnRuntime (cached, created once)
//!   │                                   ├── LimiterSlot      (function tier)
//!   │                                   ├── EndpointTable    (round robin)
//!   │                                   ├── Scaler           (fngate-autoscale)
//!   │                                   ├── FnStats
//!   │                                   └── TenantRuntime (cached, created once)
//!   │                                         ├── LimiterSlot (tenant tier)
//!   │                                         ├── ResourceLedger
//!   │                                         └── refresher task
//!   ├── admit(function, tenant, global)  → 429 on denial, rolled back
//!   ├── ledger.exceeded()                → 423
//!   ├── table.select() + scaler.grow()   → 503 when no pods
//!   ├── AuthVerifier (optional)          → 401
//!   └── Invoker::invoke() under timeout  → 504 / 500 / sandbox status
//! ```

pub mod config;
pub mod dispatch;
pub mod endpoints;
pub mod error;
pub mod ledger;
pub mod ratelimit;
pub mod registry;
pub mod runtime;
pub mod stats;

pub use config::GateConfig;
pub use dispatch::{
    AuthVerifier, CallRequest, CallResponse, Dispatcher, InvokeError, InvokeRequest, InvokeResult,
    Invoker,
};
pub use endpoints::{EndpointTable, Selection};
pub use error::{BalancerError, BalancerResult, ConfigError, DispatchError};
pub use ledger::ResourceLedger;
pub use ratelimit::{LimiterSlot, RateLimiter, Tier, admit};
pub use registry::{FunctionInfo, PodEvent, Registry};
pub use runtime::{FnRuntime, TenantRuntime};
