//! Dispatcher — the call path.
//!
//! Each call runs, in order: runtime lookup, tiered rate-limit admission,
//! resource quota check, endpoint selection (feeding demand to the
//! scaler), optional auth verification, and invocation under the call
//! timeout. Calls that reach a sandbox are accounted exactly once.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fngate_autoscale::BoxFuture;
use fngate_metrics::{CallOutcome, GateMetrics};
use fngate_state::{Cookie, Endpoint};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::{BalancerError, DispatchError};
use crate::ratelimit::admit;
use crate::registry::Registry;
use crate::stats::CallCost;

/// An inbound call, as handed over by the HTTP layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallRequest {
    pub method: String,
    pub args: BTreeMap<String, String>,
    pub content_type: Option<String>,
    pub authorization: Option<String>,
    pub body: String,
}

/// What is sent to a sandbox pod.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvokeRequest {
    pub cookie: Cookie,
    pub event: String,
    pub method: String,
    pub args: BTreeMap<String, String>,
    pub content_type: Option<String>,
    pub body: String,
    /// Call budget in milliseconds.
    pub timeout_ms: u64,
}

/// What a sandbox pod reports back.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InvokeResult {
    /// Negative values are failures; `-code` is the HTTP-like status.
    pub code: i32,
    #[serde(rename = "return", default)]
    pub ret: String,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    /// Sandbox-measured run time.
    #[serde(default)]
    pub time_us: u64,
}

#[derive(Debug, Error, PartialEq)]
pub enum InvokeError {
    #[error("invocation timed out")]
    Timeout,

    #[error("{0}")]
    Failed(String),
}

/// Transport to sandbox pods.
pub trait Invoker: Send + Sync {
    fn invoke<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        request: &'a InvokeRequest,
    ) -> BoxFuture<'a, Result<InvokeResult, InvokeError>>;
}

/// Verifies a call against a function's auth context.
pub trait AuthVerifier: Send + Sync {
    fn verify<'a>(&'a self, auth_ref: &'a str, call: &'a CallRequest) -> BoxFuture<'a, bool>;
}

/// Successful call result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallResponse {
    pub code: i32,
    pub body: String,
    pub stdout: String,
    pub stderr: String,
    pub time_us: u64,
}

pub struct Dispatcher {
    registry: Arc<Registry>,
    invoker: Arc<dyn Invoker>,
    auth: Option<Arc<dyn AuthVerifier>>,
    metrics: Arc<GateMetrics>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>, invoker: Arc<dyn Invoker>, metrics: Arc<GateMetrics>) -> Self {
        Self {
            registry,
            invoker,
            auth: None,
            metrics,
        }
    }

    /// Set the verifier used for functions with an auth context.
    pub fn with_auth(mut self, auth: Arc<dyn AuthVerifier>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<GateMetrics> {
        &self.metrics
    }

    /// Run one call through the gate.
    pub async fn dispatch(&self, cookie: &Cookie, call: CallRequest) -> Result<CallResponse, DispatchError> {
        let result = self.run(cookie, call).await;
        if let Err(e) = &result {
            if let Some(denial) = e.denial() {
                self.metrics.record_denial(denial);
            }
            debug!(%cookie, kind = e.kind(), "call failed");
        }
        result
    }

    async fn run(&self, cookie: &Cookie, call: CallRequest) -> Result<CallResponse, DispatchError> {
        let rt = match self.registry.function(cookie).await {
            Ok(rt) => rt,
            Err(BalancerError::FunctionNotFound(_)) => return Err(DispatchError::Unavailable),
            Err(e) => {
                warn!(%cookie, error = %e, "cannot load function runtime");
                return Err(DispatchError::Unavailable);
            }
        };

        let function_limiter = rt.limiter();
        let tenant_limiter = rt.tenant.limiter();
        if let Err(tier) = admit(
            function_limiter.as_deref(),
            tenant_limiter.as_deref(),
            self.registry.global_limiter(),
        ) {
            debug!(%cookie, ?tier, "rate limited");
            return Err(DispatchError::RateLimited);
        }

        if rt.tenant.ledger.exceeded() {
            return Err(DispatchError::QuotaExceeded);
        }

        let config = rt.config();
        let selection = match rt.table.select(self.registry.store(), cookie, &config.version) {
            Ok(s) => s,
            Err(BalancerError::NoCapacity(_)) => return Err(DispatchError::NoCapacity),
            Err(e) => {
                warn!(%cookie, error = %e, "endpoint lookup failed");
                return Err(DispatchError::Internal(e.to_string()));
            }
        };
        rt.scaler.grow(selection.in_flight);

        if let Some(auth_ref) = &config.auth_ref {
            let verified = match &self.auth {
                Some(verifier) => verifier.verify(auth_ref, &call).await,
                None => false,
            };
            if !verified {
                return Err(DispatchError::Unauthorized);
            }
        }

        let timeout = self.registry.config().call_timeout(config.timeout_ms);
        let request = InvokeRequest {
            cookie: cookie.clone(),
            event: "call".to_string(),
            method: call.method,
            args: call.args,
            content_type: call.content_type,
            body: call.body,
            timeout_ms: timeout.as_millis() as u64,
        };

        let started = Instant::now();
        let reply = tokio::time::timeout(timeout, self.invoker.invoke(&selection.endpoint, &request)).await;
        let elapsed = started.elapsed();
        drop(selection);

        let (result, outcome, run_time) = match reply {
            Err(_) | Ok(Err(InvokeError::Timeout)) => {
                (Err(DispatchError::InvocationTimeout), CallOutcome::Timeout, elapsed)
            }
            Ok(Err(InvokeError::Failed(msg))) => {
                (Err(DispatchError::Invocation(msg)), CallOutcome::Error, elapsed)
            }
            Ok(Ok(r)) => {
                let run_time = if r.time_us > 0 {
                    Duration::from_micros(r.time_us)
                } else {
                    elapsed
                };
                if r.code < 0 {
                    let status = u16::try_from(r.code.unsigned_abs()).unwrap_or(500);
                    let err = DispatchError::Sandbox { status, message: r.ret };
                    (Err(err), CallOutcome::Error, run_time)
                } else {
                    let response = CallResponse {
                        code: r.code,
                        body: r.ret,
                        stdout: r.stdout,
                        stderr: r.stderr,
                        time_us: r.time_us,
                    };
                    (Ok(response), CallOutcome::Success, run_time)
                }
            }
        };

        let bytes_out = match &result {
            Ok(r) => r.body.len() as u64,
            Err(_) => 0,
        };
        rt.record_call(
            outcome,
            &CallCost {
                run_time,
                memory_mb: config.memory_mb,
                bytes_out,
            },
        );
        self.metrics
            .record_call(cookie.as_str(), outcome, elapsed.as_micros() as u64)
            .await;

        result
    }
}
