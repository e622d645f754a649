//! Upstream error types.

use thiserror::Error;

/// Result type for upstream operations.
pub type UpstreamResult<T> = Result<T, UpstreamError>;

/// Errors that can occur talking to the upstream service.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The pooled HTTP client could not be constructed.
    #[error("failed to build upstream HTTP client: {0}")]
    Client(String),

    /// HTTP request failed before a response arrived (connect, TLS, protocol).
    #[error("upstream request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// No response headers within the configured timeout.
    #[error("upstream timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// A target URL could not be built.
    #[error("invalid upstream url: {0}")]
    InvalidUrl(String),

    /// The response body broke after headers arrived.
    #[error("upstream stream error: {0}")]
    Stream(String),
}
