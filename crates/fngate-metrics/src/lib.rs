//! fngate-metrics — observability for the call gate.
//!
//! Counts gate calls by outcome, rejections by reason, and keeps a
//! sliding latency window per function. Gauges for the number of cached
//! functions and running scaling workers are set by the owner of those
//! structures.
//!
//! # Architecture
//!
//! ```text
//! GateMetrics
//!   ├── record_call()   ← once per invoked call
//!   ├── record_denial() ← once per rejected call
//!   ├── set_gauges()    ← periodically, by the registry
//!   └── snapshot()      → GateSnapshot
//!
//! Prometheus exposition
//!   └── render_prometheus(&GateSnapshot) → text/plain for /metrics
//! ```

pub mod collector;
pub mod prometheus;

pub use collector::{CallOutcome, Denial, FunctionSnapshot, GateMetrics, GateSnapshot};
pub use prometheus::render_prometheus;
