//! Function cookies — stable opaque identifiers for a function.
//!
//! A cookie is the lowercase hex SHA-256 of `{tenant}/{project}/{name}`.
//! Every per-function structure (config record, endpoint rows, runtime
//! cache entry, stats) is keyed by it.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Opaque identifier for a (tenant, project, function) triple.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cookie(String);

impl Cookie {
    /// Derive the cookie for a function.
    pub fn new(tenant: &str, project: &str, name: &str) -> Self {
        let digest = Sha256::digest(format!("{tenant}/{project}/{name}").as_bytes());
        Self(hex::encode(digest))
    }

    /// Wrap an already-computed cookie string (e.g. taken from a URL).
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Cookie {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
