//! HTTP handlers.
//!
//! Calls return the sandbox's return value as the response body. Admin
//! routes use the `{success, data, error}` JSON envelope.

use std::collections::BTreeMap;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use fngate_balancer::{BalancerError, CallRequest, DispatchError, PodEvent};
use fngate_state::Cookie;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<&'static str>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
            kind: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
            kind: None,
        }),
    )
        .into_response()
}

fn balancer_error(e: BalancerError) -> Response {
    match e {
        BalancerError::FunctionNotFound(_) => {
            error_response("function not found", StatusCode::NOT_FOUND)
        }
        other => error_response(&other.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

fn dispatch_error(e: &DispatchError) -> Response {
    let status = StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(e.to_string()),
            kind: Some(e.kind()),
        }),
    )
        .into_response()
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

// ── Calls ──────────────────────────────────────────────────────

/// GET|POST /call/{cookie}
///
/// The body is forwarded as text; non-UTF-8 bodies are rejected.
pub async fn call(
    State(state): State<ApiState>,
    Path(cookie): Path<String>,
    Query(args): Query<BTreeMap<String, String>>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let body = match String::from_utf8(body.to_vec()) {
        Ok(body) => body,
        Err(_) => return error_response("call body must be UTF-8", StatusCode::BAD_REQUEST),
    };
    let request = CallRequest {
        method: method.to_string(),
        args,
        content_type: header_str(&headers, header::CONTENT_TYPE),
        authorization: header_str(&headers, header::AUTHORIZATION),
        body,
    };

    match state
        .dispatcher
        .dispatch(&Cookie::from_raw(cookie), request)
        .await
    {
        Ok(resp) => (
            StatusCode::OK,
            [("x-fngate-time-us", resp.time_us.to_string())],
            resp.body,
        )
            .into_response(),
        Err(e) => dispatch_error(&e),
    }
}

// ── Administration ─────────────────────────────────────────────

/// POST /admin/pods
pub async fn pod_event(State(state): State<ApiState>, Json(event): Json<PodEvent>) -> Response {
    match state.dispatcher.registry().notify_pod_event(&event).await {
        Ok(()) => ApiResponse::ok("accepted").into_response(),
        Err(e) => {
            warn!(cookie = %event.cookie(), error = %e, "pod event failed");
            balancer_error(e)
        }
    }
}

/// Grow request body.
#[derive(Debug, Serialize, Deserialize)]
pub struct GrowRequest {
    pub goal: u32,
}

/// POST /admin/functions/{cookie}/grow
pub async fn grow(
    State(state): State<ApiState>,
    Path(cookie): Path<String>,
    Json(req): Json<GrowRequest>,
) -> Response {
    let cookie = Cookie::from_raw(cookie);
    match state.dispatcher.registry().grow(&cookie, req.goal).await {
        Ok(goal) => ApiResponse::ok(serde_json::json!({
            "cookie": cookie,
            "goal": goal,
        }))
        .into_response(),
        Err(e) => balancer_error(e),
    }
}

/// DELETE /admin/functions/{cookie}
pub async fn teardown(State(state): State<ApiState>, Path(cookie): Path<String>) -> Response {
    let cookie = Cookie::from_raw(cookie);
    match state.dispatcher.registry().teardown(&cookie).await {
        Ok(true) => {
            state.dispatcher.metrics().forget_function(cookie.as_str()).await;
            ApiResponse::ok("deleted").into_response()
        }
        Ok(false) => error_response("function not found", StatusCode::NOT_FOUND),
        Err(e) => balancer_error(e),
    }
}

/// POST /admin/functions/{cookie}/reload
pub async fn reload(State(state): State<ApiState>, Path(cookie): Path<String>) -> Response {
    let cookie = Cookie::from_raw(cookie);
    match state.dispatcher.registry().reload_function(&cookie).await {
        Ok(reloaded) => ApiResponse::ok(serde_json::json!({ "reloaded": reloaded })).into_response(),
        Err(e) => balancer_error(e),
    }
}

/// GET /admin/functions/{cookie}
pub async fn function_info(State(state): State<ApiState>, Path(cookie): Path<String>) -> Response {
    match state
        .dispatcher
        .registry()
        .info(&Cookie::from_raw(cookie))
        .await
    {
        Some(info) => ApiResponse::ok(info).into_response(),
        None => error_response("function not cached", StatusCode::NOT_FOUND),
    }
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let (cached, running) = state.dispatcher.registry().gauges().await;
    let metrics = state.dispatcher.metrics();
    metrics.set_gauges(cached, running);

    let body = fngate_metrics::render_prometheus(&metrics.snapshot().await);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
