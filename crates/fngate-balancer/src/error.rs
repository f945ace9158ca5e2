//! Balancer error types.

use fngate_metrics::Denial;
use fngate_state::{Cookie, StateError};
use thiserror::Error;

/// Errors raised by the registry and endpoint table.
#[derive(Debug, Error)]
pub enum BalancerError {
    #[error("function not found: {0}")]
    FunctionNotFound(Cookie),

    #[error("no pods available for function: {0}")]
    NoCapacity(Cookie),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

pub type BalancerResult<T> = Result<T, BalancerError>;

/// Outcome of a rejected or failed call, mapped to an HTTP-like status.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("function unavailable")]
    Unavailable,

    #[error("too many requests")]
    RateLimited,

    #[error("resource quota exceeded")]
    QuotaExceeded,

    #[error("no pods available")]
    NoCapacity,

    #[error("unauthorized")]
    Unauthorized,

    #[error("invocation timed out")]
    InvocationTimeout,

    #[error("invocation failed: {0}")]
    Invocation(String),

    /// The sandbox reported a negative status code.
    #[error("{message}")]
    Sandbox { status: u16, message: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Unavailable | Self::NoCapacity => 503,
            Self::RateLimited => 429,
            Self::QuotaExceeded => 423,
            Self::Unauthorized => 401,
            Self::InvocationTimeout => 504,
            Self::Invocation(_) | Self::Internal(_) => 500,
            Self::Sandbox { status, .. } if (400..=599).contains(status) => *status,
            Self::Sandbox { .. } => 500,
        }
    }

    /// Short label used in logs and JSON error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable => "unavailable",
            Self::RateLimited => "rate_limited",
            Self::QuotaExceeded => "quota_exceeded",
            Self::NoCapacity => "no_capacity",
            Self::Unauthorized => "unauthorized",
            Self::InvocationTimeout => "timeout",
            Self::Invocation(_) => "invocation",
            Self::Sandbox { .. } => "sandbox",
            Self::Internal(_) => "internal",
        }
    }

    /// The admission denial this error represents, if any.
    pub fn denial(&self) -> Option<Denial> {
        match self {
            Self::Unavailable => Some(Denial::Unavailable),
            Self::RateLimited => Some(Denial::RateLimited),
            Self::QuotaExceeded => Some(Denial::QuotaExceeded),
            Self::NoCapacity => Some(Denial::NoCapacity),
            Self::Unauthorized => Some(Denial::Unauthorized),
            _ => None,
        }
    }
}

/// Errors loading the gate configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration: {0:?}")]
    InvalidDuration(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(DispatchError::Unavailable.status_code(), 503);
        assert_eq!(DispatchError::RateLimited.status_code(), 429);
        assert_eq!(DispatchError::QuotaExceeded.status_code(), 423);
        assert_eq!(DispatchError::NoCapacity.status_code(), 503);
        assert_eq!(DispatchError::Unauthorized.status_code(), 401);
        assert_eq!(DispatchError::InvocationTimeout.status_code(), 504);
        assert_eq!(DispatchError::Invocation("x".into()).status_code(), 500);
    }

    #[test]
    fn sandbox_status_passes_through_when_valid() {
        let e = DispatchError::Sandbox { status: 404, message: "nope".into() };
        assert_eq!(e.status_code(), 404);
        assert_eq!(e.to_string(), "nope");

        let odd = DispatchError::Sandbox { status: 7, message: "?".into() };
        assert_eq!(odd.status_code(), 500);
    }

    #[test]
    fn only_admission_failures_are_denials() {
        assert_eq!(DispatchError::RateLimited.denial(), Some(Denial::RateLimited));
        assert_eq!(DispatchError::NoCapacity.denial(), Some(Denial::NoCapacity));
        assert_eq!(DispatchError::InvocationTimeout.denial(), None);
        assert_eq!(DispatchError::Invocation("x".into()).denial(), None);
    }
}
