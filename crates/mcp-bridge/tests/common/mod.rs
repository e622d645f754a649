//! Shared helpers for API tests: a recording mock upstream and an app wired
//! to it through the real pooled client.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use mcp_bridge::api::{AppState, create_router};
use mcp_bridge::config::AppConfig;

pub const UPSTREAM_SESSION: &str = "upstream-session";
pub const STATIC_KEY: &str = "secret-key";
pub const UPSTREAM_EVENT: &str = "event: message\ndata: hello\n\n";

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

type Log = Arc<Mutex<Vec<RecordedRequest>>>;

pub struct MockUpstream {
    pub addr: SocketAddr,
    log: Log,
}

impl MockUpstream {
    pub async fn spawn() -> Self {
        let log: Log = Arc::default();
        let app = Router::new().fallback(handle).with_state(Arc::clone(&log));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, log }
    }

    pub fn mcp_url(&self) -> String {
        format!("http://{}/mcp", self.addr)
    }

    /// Streaming endpoint whose body breaks after one event.
    pub fn broken_sse_url(&self) -> String {
        format!("http://{}/broken/sse", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.log.lock().unwrap().clone()
    }
}

async fn handle(
    State(log): State<Log>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    log.lock().unwrap().push(RecordedRequest {
        method: method.clone(),
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        headers,
        body: body.clone(),
    });

    match (method, uri.path()) {
        (Method::GET, "/sse") => (
            [(header::CONTENT_TYPE, "text/event-stream")],
            UPSTREAM_EVENT,
        )
            .into_response(),
        (Method::POST, "/mcp") => {
            let request: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
            if request["method"] == "initialize" {
                (
                    [("mcp-session-id", UPSTREAM_SESSION)],
                    Json(json!({
                        "jsonrpc": "2.0",
                        "id": request["id"],
                        "result": {"serverInfo": {"name": "Mock", "version": "0.1"}}
                    })),
                )
                    .into_response()
            } else {
                Json(json!({
                    "jsonrpc": "2.0",
                    "id": request["id"],
                    "result": {"echo": request}
                }))
                .into_response()
            }
        }
        (Method::GET, "/broken/sse") => {
            let first = futures::stream::once(async {
                Ok::<_, std::io::Error>(Bytes::from_static(UPSTREAM_EVENT.as_bytes()))
            });
            let broken = futures::stream::once(async {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                Err(std::io::Error::other("upstream went away"))
            });
            (
                [(header::CONTENT_TYPE, "text/event-stream")],
                Body::from_stream(first.chain(broken)),
            )
                .into_response()
        }
        (Method::POST, "/sse/message") => (StatusCode::ACCEPTED, "Accepted").into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Router forwarding to `upstream_url`, with one static upstream header.
pub fn test_app(upstream_url: &str) -> Router {
    test_app_with_stream(upstream_url, None)
}

/// Like [`test_app`], with the streaming endpoint set explicitly.
pub fn test_app_with_stream(upstream_url: &str, sse_url: Option<String>) -> Router {
    let mut config = AppConfig::default();
    config.upstream.url = upstream_url.to_string();
    config.upstream.sse_url = sse_url;
    config
        .upstream
        .headers
        .insert("X-Api-Key".to_string(), STATIC_KEY.to_string());
    let state = AppState::from_config(&config, CancellationToken::new()).unwrap();
    create_router(state)
}

/// An address nothing listens on.
pub async fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/mcp")
}
