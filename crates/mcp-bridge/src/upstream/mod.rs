//! Upstream MCP service access.
//!
//! [`UpstreamApi`] is the seam between the forwarding logic and the network;
//! [`UpstreamClient`] is the pooled HTTP implementation used in production.

mod client;
mod error;
pub mod headers;
mod types;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;
use bytes::Bytes;
use reqwest::Url;

pub use client::{UpstreamClient, initialize_request};
pub use error::{UpstreamError, UpstreamResult};
pub use types::{ByteStream, ForwardedResponse, InitializeOutcome, UpstreamStream};

pub const USER_AGENT: &str = concat!("mcp-bridge/", env!("CARGO_PKG_VERSION"));

/// Minimal upstream API abstraction for testability.
#[async_trait]
pub trait UpstreamApi: Send + Sync {
    /// Perform the MCP `initialize` handshake against the unary endpoint.
    async fn initialize(&self, extra_headers: &HeaderMap) -> InitializeOutcome;

    /// Open a streaming GET. Resolves once response headers arrive; the
    /// status is returned as-is.
    async fn open_stream(&self, url: &Url, headers: HeaderMap) -> UpstreamResult<UpstreamStream>;

    /// POST a JSON-RPC payload and stream back whatever the upstream answers.
    async fn post_json(
        &self,
        url: &Url,
        headers: HeaderMap,
        body: Bytes,
    ) -> UpstreamResult<ForwardedResponse>;
}

/// Bound `fut` by `timeout` when one is configured.
pub async fn within_timeout<T, F>(timeout: Option<Duration>, fut: F) -> UpstreamResult<T>
where
    F: Future<Output = UpstreamResult<T>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| UpstreamError::Timeout {
                timeout_ms: limit.as_millis() as u64,
            })?,
        None => fut.await,
    }
}

/// Copy downstream query parameters onto an upstream URL. A downstream key
/// replaces any value the base URL already carries for it.
pub fn merge_query(base: &Url, overrides: &[(String, String)]) -> Url {
    if overrides.is_empty() {
        return base.clone();
    }

    let mut merged: Vec<(String, String)> = Vec::with_capacity(overrides.len());
    for (key, value) in overrides {
        match merged.iter_mut().find(|(k, _)| k == key) {
            Some(existing) => existing.1 = value.clone(),
            None => merged.push((key.clone(), value.clone())),
        }
    }
    let kept: Vec<(String, String)> = base
        .query_pairs()
        .filter(|(k, _)| !merged.iter().any(|(o, _)| o == k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut url = base.clone();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept.iter().chain(merged.iter()));
    url
}

/// Legacy message endpoint for a subpath: `<origin>/sse/<subpath>` on the
/// streaming endpoint's origin.
pub fn message_url(sse_url: &Url, subpath: &str) -> UpstreamResult<Url> {
    let trimmed = subpath.trim_start_matches('/');
    if trimmed.is_empty() || trimmed.split('/').any(|seg| seg == "..") {
        return Err(UpstreamError::InvalidUrl(format!(
            "unsupported message path {subpath:?}"
        )));
    }
    let mut url = sse_url.clone();
    url.set_query(None);
    url.set_fragment(None);
    url.set_path(&format!("/sse/{trimmed}"));
    Ok(url)
}
