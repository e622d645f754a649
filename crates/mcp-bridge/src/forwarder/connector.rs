//! One attempt to open the upstream event stream.

use std::time::Duration;

use axum::http::{HeaderMap, StatusCode};
use reqwest::Url;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::upstream::{UpstreamApi, UpstreamError, UpstreamStream};

/// Why a connect attempt produced no usable stream.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The attempt scope was cancelled.
    #[error("downstream closed")]
    Cancelled,

    #[error("upstream timeout after {}ms", .0.as_millis())]
    TimedOut(Duration),

    #[error("upstream responded {0}")]
    Rejected(StatusCode),

    #[error(transparent)]
    Failed(#[from] UpstreamError),
}

/// Open the stream, racing the request against `scope` and, when set,
/// `timeout`. The timeout covers the wait for response headers only; once
/// headers arrive the stream may stay open indefinitely.
pub async fn connect(
    upstream: &dyn UpstreamApi,
    url: &Url,
    headers: HeaderMap,
    scope: &CancellationToken,
    timeout: Option<Duration>,
) -> Result<UpstreamStream, ConnectError> {
    let open = async {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, upstream.open_stream(url, headers))
                .await
                .map_err(|_| ConnectError::TimedOut(limit))
                .and_then(|opened| opened.map_err(ConnectError::from)),
            None => upstream
                .open_stream(url, headers)
                .await
                .map_err(ConnectError::from),
        }
    };

    let stream = tokio::select! {
        biased;
        _ = scope.cancelled() => return Err(ConnectError::Cancelled),
        opened = open => opened?,
    };

    if !stream.status.is_success() {
        return Err(ConnectError::Rejected(stream.status));
    }
    Ok(stream)
}
