//! Minimal JSON-over-HTTP/1 client shared by the invoker and the
//! orchestrator adapter. One connection per request.

use anyhow::Context;
use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tracing::debug;

const USER_AGENT: &str = concat!("fngated/", env!("CARGO_PKG_VERSION"));

pub struct Reply {
    pub status: StatusCode,
    pub body: Bytes,
}

/// Send `body` (JSON, if any) to `http://{authority}{path}` and read the
/// whole response. The caller bounds the exchange with a timeout.
pub async fn send_json(
    authority: &str,
    method: Method,
    path: &str,
    body: Option<Vec<u8>>,
) -> anyhow::Result<Reply> {
    let stream = TcpStream::connect(authority)
        .await
        .with_context(|| format!("connect to {authority}"))?;

    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .with_context(|| format!("http handshake with {authority}"))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(error = %e, "connection closed with error");
        }
    });

    let mut builder = http::Request::builder()
        .method(method)
        .uri(path)
        .header("host", authority)
        .header("user-agent", USER_AGENT);
    if body.is_some() {
        builder = builder.header("content-type", "application/json");
    }
    let req = builder.body(Full::new(Bytes::from(body.unwrap_or_default())))?;

    let resp = sender
        .send_request(req)
        .await
        .with_context(|| format!("request to {authority}{path}"))?;
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .context("read response body")?
        .to_bytes();

    Ok(Reply { status, body })
}
