//! Pooled HTTP client for the upstream service.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::http::{HeaderMap, header};
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use reqwest::{Client, Response, Url};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::config::{APP_NAME, UpstreamSettings};
use crate::session::SESSION_HEADER;

use super::error::{UpstreamError, UpstreamResult};
use super::headers::handshake_headers;
use super::types::{ByteStream, ForwardedResponse, InitializeOutcome, UpstreamStream};
use super::{UpstreamApi, within_timeout};

const MAX_REDIRECTS: usize = 5;
const MAX_ERROR_BODY: usize = 512;

/// HTTP client shared by every downstream connection.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: Client,
    settings: Arc<UpstreamSettings>,
}

impl UpstreamClient {
    pub fn new(settings: Arc<UpstreamSettings>) -> UpstreamResult<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(settings.max_sockets)
            .pool_idle_timeout(settings.keep_alive)
            .tcp_keepalive(settings.keep_alive)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| UpstreamError::Client(e.to_string()))?;

        Ok(Self { client, settings })
    }

    async fn send_initialize(&self, extra_headers: &HeaderMap) -> UpstreamResult<Response> {
        let body = initialize_request(chrono::Utc::now().timestamp_millis());
        let request = self
            .client
            .post(self.settings.url.clone())
            .headers(handshake_headers(extra_headers))
            .json(&body)
            .send();
        within_timeout(self.settings.timeout, async {
            request.await.map_err(UpstreamError::from)
        })
        .await
    }
}

/// JSON-RPC `initialize` request body.
pub fn initialize_request(id_millis: i64) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": format!("init-{id_millis}"),
        "method": "initialize",
        "params": {
            "clientInfo": {
                "name": APP_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": {},
        },
    })
}

#[async_trait]
impl UpstreamApi for UpstreamClient {
    async fn initialize(&self, extra_headers: &HeaderMap) -> InitializeOutcome {
        let started = Instant::now();
        let response = match self.send_initialize(extra_headers).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "initialize request failed");
                return InitializeOutcome::failed(0, e.to_string());
            }
        };

        let status = response.status();
        let content_type = content_type(response.headers()).unwrap_or_default();
        let session_id = session_id(response.headers());

        let mut result = None;
        let mut error = None;
        if content_type.contains("application/json") {
            match response.json::<Value>().await {
                Ok(value) => result = Some(value),
                Err(e) => error = Some(format!("invalid initialize response: {e}")),
            }
        } else if session_id.is_none() && !content_type.contains("text/event-stream") {
            // Plain-text bodies usually explain the rejection.
            error = response
                .text()
                .await
                .ok()
                .map(|text| truncate(text.trim(), MAX_ERROR_BODY))
                .filter(|text| !text.is_empty());
        }
        if !status.is_success() && error.is_none() {
            error = Some(format!("upstream responded {status}"));
        }

        info!(
            status = status.as_u16(),
            duration_ms = started.elapsed().as_millis() as u64,
            session_id = session_id.as_deref().unwrap_or(""),
            "initialize completed"
        );

        InitializeOutcome {
            ok: status.is_success(),
            status: status.as_u16(),
            session_id,
            result,
            error,
        }
    }

    async fn open_stream(&self, url: &Url, headers: HeaderMap) -> UpstreamResult<UpstreamStream> {
        debug!(%url, "opening upstream stream");
        let response = self.client.get(url.clone()).headers(headers).send().await?;

        Ok(UpstreamStream {
            status: response.status(),
            content_type: content_type(response.headers()),
            body: body_stream(response),
        })
    }

    async fn post_json(
        &self,
        url: &Url,
        headers: HeaderMap,
        body: Bytes,
    ) -> UpstreamResult<ForwardedResponse> {
        debug!(%url, bytes = body.len(), "forwarding upstream request");
        let response = self
            .client
            .post(url.clone())
            .headers(headers)
            .body(body)
            .send()
            .await?;

        Ok(ForwardedResponse {
            status: response.status(),
            content_type: content_type(response.headers()),
            session_id: session_id(response.headers()),
            body: body_stream(response),
        })
    }
}

fn content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase())
}

fn session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn body_stream(response: Response) -> ByteStream {
    response
        .bytes_stream()
        .map_err(|e| UpstreamError::Stream(e.to_string()))
        .boxed()
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn initialize_request_shape() {
        let body = initialize_request(1_700_000_000_000);
        assert_eq!(body["jsonrpc"], "2.0");
        assert_eq!(body["id"], "init-1700000000000");
        assert_eq!(body["method"], "initialize");
        assert_eq!(body["params"]["clientInfo"]["name"], APP_NAME);
        assert!(body["params"]["capabilities"].is_object());
    }

    #[test]
    fn session_id_is_case_insensitive_and_trimmed() {
        let mut headers = HeaderMap::new();
        headers.insert("Mcp-Session-Id", HeaderValue::from_static(" abc "));
        assert_eq!(session_id(&headers).as_deref(), Some("abc"));

        headers.insert("mcp-session-id", HeaderValue::from_static(""));
        assert!(session_id(&headers).is_none());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("héllo", 2), "h...");
    }

    #[test]
    fn client_builds_from_default_settings() {
        let settings =
            UpstreamSettings::from_config(&crate::config::UpstreamConfig::default()).unwrap();
        assert!(UpstreamClient::new(Arc::new(settings)).is_ok());
    }
}
