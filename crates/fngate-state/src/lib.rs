//! fngate-state — persistent state for the fngate control plane.
//!
//! Backed by [redb](https://docs.rs/redb), holds everything the balancer
//! needs to survive a restart: function configurations, the durable
//! pod-endpoint table, tenant limits, archived usage snapshots, and
//! cumulative call statistics.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{cookie}:{pod}`, `{tenant}:{epoch}`) enable prefix
//! scans for related records.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod cookie;
pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use cookie::Cookie;
pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
