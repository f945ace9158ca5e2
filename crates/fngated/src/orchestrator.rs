//! HTTP orchestrator adapter.
//!
//! ```text
//! POST {base}/deployments/{id}/replicas  {"replicas": N}  → {"replicas": acked}
//! GET  {base}/deployments/{id}/replicas                   → {"replicas": current}
//! ```

use std::time::Duration;

use anyhow::{Context, bail};
use fngate_autoscale::{BoxFuture, Orchestrator};
use http::{Method, Uri};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::{Reply, send_json};

/// Upper bound for one orchestrator request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize, Deserialize)]
struct Replicas {
    replicas: u32,
}

#[derive(Debug, Clone)]
pub struct HttpOrchestrator {
    authority: String,
    base_path: String,
}

impl HttpOrchestrator {
    /// `url` is the orchestrator base, e.g. `http://orchestrator:9000/api`.
    pub fn new(url: &str) -> anyhow::Result<Self> {
        let uri: Uri = url
            .parse()
            .with_context(|| format!("invalid orchestrator url {url:?}"))?;
        match uri.scheme_str() {
            Some("http") => {}
            other => bail!("unsupported orchestrator scheme {other:?}"),
        }
        let authority = uri
            .authority()
            .with_context(|| format!("orchestrator url {url:?} has no host"))?;
        let authority = match authority.port_u16() {
            Some(_) => authority.to_string(),
            None => format!("{}:80", authority.host()),
        };

        Ok(Self {
            authority,
            base_path: uri.path().trim_end_matches('/').to_string(),
        })
    }

    fn replicas_path(&self, deployment: &str) -> String {
        format!("{}/deployments/{deployment}/replicas", self.base_path)
    }

    async fn exchange(&self, method: Method, path: &str, body: Option<Vec<u8>>) -> anyhow::Result<u32> {
        let Reply { status, body } =
            tokio::time::timeout(REQUEST_TIMEOUT, send_json(&self.authority, method, path, body))
                .await
                .with_context(|| format!("orchestrator request {path} timed out"))??;
        if !status.is_success() {
            bail!("orchestrator replied {status} for {path}");
        }
        let reply: Replicas = serde_json::from_slice(&body).context("malformed orchestrator reply")?;
        Ok(reply.replicas)
    }
}

impl Orchestrator for HttpOrchestrator {
    fn set_replicas<'a>(&'a self, deployment: &'a str, replicas: u32) -> BoxFuture<'a, anyhow::Result<u32>> {
        Box::pin(async move {
            let body = serde_json::to_vec(&Replicas { replicas })?;
            let acked = self
                .exchange(Method::POST, &self.replicas_path(deployment), Some(body))
                .await?;
            debug!(deployment, requested = replicas, acked, "replicas set");
            Ok(acked)
        })
    }

    fn current_replicas<'a>(&'a self, deployment: &'a str) -> BoxFuture<'a, anyhow::Result<u32>> {
        Box::pin(async move {
            self.exchange(Method::GET, &self.replicas_path(deployment), None)
                .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use axum::extract::{Path, State};
    use axum::routing::get;
    use axum::{Json, Router};

    type Deployments = Arc<Mutex<HashMap<String, u32>>>;

    /// Fake orchestrator that caps every deployment at 3 replicas.
    async fn serve(deployments: Deployments) -> String {
        let router = Router::new()
            .route(
                "/api/deployments/{id}/replicas",
                get(
                    |State(d): State<Deployments>, Path(id): Path<String>| async move {
                        let n = d.lock().unwrap().get(&id).copied().unwrap_or(0);
                        Json(Replicas { replicas: n })
                    },
                )
                .post(
                    |State(d): State<Deployments>,
                     Path(id): Path<String>,
                     Json(req): Json<Replicas>| async move {
                        let acked = req.replicas.min(3);
                        d.lock().unwrap().insert(id, acked);
                        Json(Replicas { replicas: acked })
                    },
                ),
            )
            .with_state(deployments);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/api/")
    }

    #[test]
    fn parses_base_url() {
        let orch = HttpOrchestrator::new("http://orchestrator/api/").unwrap();
        assert_eq!(orch.authority, "orchestrator:80");
        assert_eq!(orch.replicas_path("dep"), "/api/deployments/dep/replicas");

        let orch = HttpOrchestrator::new("http://10.0.0.1:9000").unwrap();
        assert_eq!(orch.authority, "10.0.0.1:9000");
        assert_eq!(orch.replicas_path("dep"), "/deployments/dep/replicas");
    }

    #[test]
    fn rejects_non_http_urls() {
        assert!(HttpOrchestrator::new("https://orchestrator").is_err());
        assert!(HttpOrchestrator::new("not a url").is_err());
    }

    #[tokio::test]
    async fn set_and_read_replicas() {
        let deployments = Deployments::default();
        let orch = HttpOrchestrator::new(&serve(deployments.clone()).await).unwrap();

        assert_eq!(orch.current_replicas("dep-a").await.unwrap(), 0);
        assert_eq!(orch.set_replicas("dep-a", 2).await.unwrap(), 2);
        assert_eq!(orch.current_replicas("dep-a").await.unwrap(), 2);

        // Partial acknowledgement is passed through.
        assert_eq!(orch.set_replicas("dep-a", 5).await.unwrap(), 3);
        assert_eq!(deployments.lock().unwrap()["dep-a"], 3);
    }

    #[tokio::test]
    async fn unreachable_orchestrator_is_an_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let orch = HttpOrchestrator::new(&format!("http://{addr}")).unwrap();
        assert!(orch.set_replicas("dep", 1).await.is_err());
    }
}
