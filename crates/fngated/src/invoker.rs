//! HTTP invoker — forwards calls to sandbox pods.
//!
//! The call is POSTed as JSON to `/v1/run/{cookie}` on the pod; the pod
//! answers with `{code, return, stdout, stderr, time_us}`.

use std::time::Duration;

use fngate_autoscale::BoxFuture;
use fngate_balancer::{InvokeError, InvokeRequest, InvokeResult, Invoker};
use fngate_state::Endpoint;
use http::Method;
use tracing::debug;

use crate::client::send_json;

#[derive(Debug, Default, Clone, Copy)]
pub struct HttpInvoker;

impl HttpInvoker {
    pub fn new() -> Self {
        Self
    }

    async fn run(
        &self,
        endpoint: &Endpoint,
        request: &InvokeRequest,
    ) -> Result<InvokeResult, InvokeError> {
        let body = serde_json::to_vec(request).map_err(|e| InvokeError::Failed(e.to_string()))?;
        let path = format!("/v1/run/{}", request.cookie);
        let addr = endpoint.addr();
        let budget = Duration::from_millis(request.timeout_ms);

        let reply = match tokio::time::timeout(budget, send_json(&addr, Method::POST, &path, Some(body))).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                debug!(pod = %endpoint.pod, %addr, error = %e, "invocation transport failed");
                return Err(InvokeError::Failed(format!("{e:#}")));
            }
            Err(_) => return Err(InvokeError::Timeout),
        };

        if !reply.status.is_success() {
            return Err(InvokeError::Failed(format!(
                "pod {} replied {}",
                endpoint.pod, reply.status
            )));
        }
        serde_json::from_slice(&reply.body)
            .map_err(|e| InvokeError::Failed(format!("malformed sandbox reply: {e}")))
    }
}

impl Invoker for HttpInvoker {
    fn invoke<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        request: &'a InvokeRequest,
    ) -> BoxFuture<'a, Result<InvokeResult, InvokeError>> {
        Box::pin(self.run(endpoint, request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::net::SocketAddr;

    use axum::extract::Path;
    use axum::routing::post;
    use axum::{Json, Router};
    use fngate_state::Cookie;

    async fn serve(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    fn endpoint(addr: SocketAddr) -> Endpoint {
        Endpoint {
            cookie: Cookie::from_raw("c1"),
            pod: "p1".to_string(),
            address: addr.ip().to_string(),
            port: addr.port(),
            version: "0".to_string(),
        }
    }

    fn request(timeout_ms: u64) -> InvokeRequest {
        InvokeRequest {
            cookie: Cookie::from_raw("c1"),
            event: "call".to_string(),
            method: "POST".to_string(),
            args: BTreeMap::from([("name".to_string(), "fn".to_string())]),
            content_type: Some("text/plain".to_string()),
            body: "ping".to_string(),
            timeout_ms,
        }
    }

    #[tokio::test]
    async fn posts_call_and_decodes_reply() {
        let router = Router::new().route(
            "/v1/run/{cookie}",
            post(|Path(cookie): Path<String>, Json(req): Json<InvokeRequest>| async move {
                Json(serde_json::json!({
                    "code": 0,
                    "return": format!("{cookie}:{}:{}", req.body, req.args["name"]),
                    "time_us": 7,
                }))
            }),
        );
        let addr = serve(router).await;

        let result = HttpInvoker::new()
            .invoke(&endpoint(addr), &request(1000))
            .await
            .unwrap();
        assert_eq!(result.code, 0);
        assert_eq!(result.ret, "c1:ping:fn");
        assert_eq!(result.time_us, 7);
    }

    #[tokio::test]
    async fn slow_pod_times_out() {
        let router = Router::new().route(
            "/v1/run/{cookie}",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        );
        let addr = serve(router).await;

        let err = HttpInvoker::new()
            .invoke(&endpoint(addr), &request(50))
            .await
            .unwrap_err();
        assert_eq!(err, InvokeError::Timeout);
    }

    #[tokio::test]
    async fn non_success_status_is_failure() {
        let router = Router::new().route(
            "/v1/run/{cookie}",
            post(|| async { (http::StatusCode::BAD_GATEWAY, "nope") }),
        );
        let addr = serve(router).await;

        let err = HttpInvoker::new()
            .invoke(&endpoint(addr), &request(1000))
            .await
            .unwrap_err();
        assert!(matches!(err, InvokeError::Failed(_)));
    }
}
