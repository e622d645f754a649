//! Upstream request and response types.

use std::fmt;

use axum::http::StatusCode;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde_json::Value;

use super::error::UpstreamError;

/// Raw upstream body bytes, in arrival order.
pub type ByteStream = BoxStream<'static, Result<Bytes, UpstreamError>>;

/// Result of the `initialize` handshake.
///
/// Never an error: failures are described by `ok`, `status` and `error` so
/// the caller can report them downstream and carry on without a session.
#[derive(Debug, Clone, Default)]
pub struct InitializeOutcome {
    pub ok: bool,
    /// HTTP status, 0 when no response arrived
    pub status: u16,
    pub session_id: Option<String>,
    /// Parsed JSON body when the upstream answered with JSON
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl InitializeOutcome {
    pub fn failed(status: u16, error: impl Into<String>) -> Self {
        Self {
            ok: false,
            status,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// `"<name> v<version>"` from `result.serverInfo`, if both are present.
    pub fn server_label(&self) -> Option<String> {
        let info = self.result.as_ref()?.get("result")?.get("serverInfo")?;
        let name = info.get("name")?.as_str()?;
        let version = info.get("version")?.as_str()?;
        Some(format!("{name} v{version}"))
    }
}

/// An opened upstream event stream.
pub struct UpstreamStream {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: ByteStream,
}

impl fmt::Debug for UpstreamStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamStream")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Response to a forwarded unary request. The body is streamed through
/// unchanged.
pub struct ForwardedResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub session_id: Option<String>,
    pub body: ByteStream,
}

impl fmt::Debug for ForwardedResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForwardedResponse")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}
