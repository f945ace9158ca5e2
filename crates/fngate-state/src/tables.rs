//! redb table definitions for the fngate state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Function configurations keyed by `{cookie}`.
pub const FUNCTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("functions");

/// Pod endpoints keyed by `{cookie}:{pod}`.
pub const ENDPOINTS: TableDefinition<&str, &[u8]> = TableDefinition::new("endpoints");

/// Tenant limits keyed by `{tenant}`.
pub const TENANT_LIMITS: TableDefinition<&str, &[u8]> = TableDefinition::new("tenant_limits");

/// Archived usage snapshots keyed by `{tenant}:{epoch:020}`.
pub const USAGE_SNAPSHOTS: TableDefinition<&str, &[u8]> = TableDefinition::new("usage_snapshots");

/// Cumulative function statistics keyed by `{cookie}`.
pub const FN_STATS: TableDefinition<&str, &[u8]> = TableDefinition::new("fn_stats");

/// Cumulative tenant statistics keyed by `{tenant}`.
pub const TENANT_STATS: TableDefinition<&str, &[u8]> = TableDefinition::new("tenant_stats");
