//! HTTP request handlers.

use std::collections::HashMap;
use std::convert::Infallible;
use std::time::Instant;

use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use futures::StreamExt;
use reqwest::Url;
use serde::Serialize;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::forwarder::StreamRequest;
use crate::session::{SESSION_HEADER, SESSION_QUERY, SessionHint, resolve_session};
use crate::upstream::{headers::unary_request_headers, merge_query, message_url, within_timeout};

use super::error::{ApiError, ApiResult};
use super::state::AppState;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Health check response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub upstream: String,
    pub upstream_sse: String,
    pub cors_origin: String,
    pub upstream_cfg: UpstreamSummary,
    pub time: String,
}

/// Upstream settings as reported by `/health`. Header values are omitted.
#[derive(Debug, Serialize)]
pub struct UpstreamSummary {
    pub timeout_ms: u64,
    #[serde(rename = "keepAlive_ms")]
    pub keep_alive_ms: u64,
    #[serde(rename = "maxSockets")]
    pub max_sockets: usize,
    pub headers: Vec<String>,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let settings = &state.settings;
    let mut header_names: Vec<String> = settings
        .static_headers
        .keys()
        .map(|name| name.as_str().to_string())
        .collect();
    header_names.sort();

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        upstream: settings.url.to_string(),
        upstream_sse: settings.sse_url.to_string(),
        cors_origin: state.cors_origin.clone(),
        upstream_cfg: UpstreamSummary {
            timeout_ms: settings.timeout.map_or(0, |t| t.as_millis() as u64),
            keep_alive_ms: settings.keep_alive.as_millis() as u64,
            max_sockets: settings.max_sockets,
            headers: header_names,
        },
        time: chrono::Utc::now().to_rfc3339(),
    })
}

/// Open a forwarded event stream (`GET /sse`, `GET /mcp`).
pub async fn stream_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<Vec<(String, String)>>,
) -> ApiResult<Response> {
    let request = StreamRequest::new(request_id(&headers), &headers, query);
    let rx = state.forwarder.open(request, &state.shutdown);
    let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("x-accel-buffering", "no")
        .body(body)
        .map_err(|e| ApiError::internal(format!("building stream response: {e}")))
}

/// `POST /mcp`: forward a JSON-RPC request to the unary endpoint.
pub async fn forward_mcp(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<Vec<(String, String)>>,
    body: Bytes,
) -> ApiResult<Response> {
    let hint = resolve_session(&headers, &query_lookup(&query));
    let url = merge_query(&state.settings.url, &query);
    forward_unary(&state, url, &headers, &hint, body).await
}

/// `POST /sse/{*subpath}`: legacy message endpoint addressed by query.
pub async fn forward_sse_message(
    State(state): State<AppState>,
    Path(subpath): Path<String>,
    headers: HeaderMap,
    Query(query): Query<Vec<(String, String)>>,
    body: Bytes,
) -> ApiResult<Response> {
    let hint = resolve_session(&headers, &query_lookup(&query));
    let mut url = merge_query(&message_url(&state.settings.sse_url, &subpath)?, &query);
    let addressed = query.iter().any(|(k, _)| k == SESSION_QUERY);
    if let (Some(session_id), false) = (hint.session_id.as_deref(), addressed) {
        url.query_pairs_mut().append_pair(SESSION_QUERY, session_id);
    }
    forward_unary(&state, url, &headers, &hint, body).await
}

pub async fn not_found() -> ApiError {
    ApiError::not_found("Not Found")
}

async fn forward_unary(
    state: &AppState,
    url: Url,
    headers: &HeaderMap,
    hint: &SessionHint,
    body: Bytes,
) -> ApiResult<Response> {
    let request_id = request_id(headers);
    let started = Instant::now();
    let payload = normalize_json_body(body)?;
    let upstream_headers =
        unary_request_headers(&state.settings.static_headers, hint.session_id.as_deref());

    info!(
        %request_id,
        upstream = %url,
        session_id = hint.session_id.as_deref().unwrap_or(""),
        "forwarding request"
    );
    let forwarded = within_timeout(
        state.settings.timeout,
        state.upstream.post_json(&url, upstream_headers, payload),
    )
    .await
    .map_err(|e| {
        warn!(
            %request_id,
            error = %e,
            duration_ms = started.elapsed().as_millis() as u64,
            "forward failed"
        );
        ApiError::from(e)
    })?;

    info!(
        %request_id,
        status = forwarded.status.as_u16(),
        content_type = forwarded.content_type.as_deref().unwrap_or(""),
        duration_ms = started.elapsed().as_millis() as u64,
        "upstream responded"
    );

    let mut builder = Response::builder().status(forwarded.status).header(
        header::CONTENT_TYPE,
        forwarded.content_type.as_deref().unwrap_or("application/json"),
    );
    let session_id = forwarded
        .session_id
        .as_deref()
        .or(hint.session_id.as_deref())
        .and_then(|id| HeaderValue::from_str(id).ok());
    if let Some(session_id) = session_id {
        builder = builder.header(SESSION_HEADER, session_id);
    }

    builder
        .body(Body::from_stream(forwarded.body))
        .map_err(|e| ApiError::internal(format!("building forwarded response: {e}")))
}

/// Validate a JSON body. An empty body becomes `{}`.
fn normalize_json_body(body: Bytes) -> ApiResult<Bytes> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Bytes::from_static(b"{}"));
    }
    serde_json::from_slice::<serde::de::IgnoredAny>(&body)
        .map_err(|e| ApiError::bad_request(format!("Invalid JSON body: {e}")))?;
    Ok(body)
}

fn query_lookup(query: &[(String, String)]) -> HashMap<String, String> {
    query.iter().cloned().collect()
}

fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}
