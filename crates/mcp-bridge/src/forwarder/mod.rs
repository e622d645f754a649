//! Streaming session forwarder.
//!
//! Each downstream event-stream connection gets its own task running a small
//! state machine:
//!
//! ```text
//! Connecting --ok--> Streaming --eof/err--> Backoff --timer--> Connecting
//!     |                                        ^
//!     +--------------err/timeout/non-2xx-------+
//! ```
//!
//! Every state moves to `Closed` once the downstream goes away. `Closed` is
//! absorbing. Heartbeats run on a separate task from the moment the stream
//! opens, so reconnect gaps stay alive too.

mod backoff;
mod connector;
mod downstream;
pub mod frame;
mod heartbeat;
mod relay;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use bytes::Bytes;
use reqwest::Url;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::UpstreamSettings;
use crate::session::{SessionHint, resolve_session};
use crate::upstream::{UpstreamApi, UpstreamStream, headers, merge_query};

pub use backoff::{Backoff, MAX_DELAY, next_delay};
pub use connector::{ConnectError, connect};
pub use downstream::Downstream;
pub use frame::Notice;
pub use heartbeat::DEFAULT_INTERVAL as DEFAULT_HEARTBEAT_INTERVAL;
pub use relay::{RelayOutcome, relay};

/// Observable connection state, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Streaming,
    Backoff,
    Closed,
}

enum Phase {
    Connecting,
    Streaming(Attempt),
    Backoff(Duration),
    Closed,
}

impl Phase {
    fn state(&self) -> ConnectionState {
        match self {
            Phase::Connecting => ConnectionState::Connecting,
            Phase::Streaming(_) => ConnectionState::Streaming,
            Phase::Backoff(_) => ConnectionState::Backoff,
            Phase::Closed => ConnectionState::Closed,
        }
    }
}

/// A live upstream stream plus the scope that owns it. Dropping the attempt
/// cancels the scope and releases the connection.
struct Attempt {
    stream: UpstreamStream,
    _scope: DropGuard,
}

/// What a downstream stream request asked for.
#[derive(Debug, Clone, Default)]
pub struct StreamRequest {
    pub request_id: String,
    pub hint: SessionHint,
    /// Downstream query parameters, copied onto the upstream URL
    pub query: Vec<(String, String)>,
}

impl StreamRequest {
    pub fn new(
        request_id: impl Into<String>,
        headers: &HeaderMap,
        query: Vec<(String, String)>,
    ) -> Self {
        let lookup: HashMap<String, String> = query.iter().cloned().collect();
        Self {
            request_id: request_id.into(),
            hint: resolve_session(headers, &lookup),
            query,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ForwarderOptions {
    pub heartbeat_interval: Duration,
}

impl Default for ForwarderOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

/// Shared, cheap-to-clone factory for per-connection forwarding tasks.
#[derive(Clone)]
pub struct StreamForwarder {
    upstream: Arc<dyn UpstreamApi>,
    settings: Arc<UpstreamSettings>,
    options: ForwarderOptions,
}

impl StreamForwarder {
    pub fn new(
        upstream: Arc<dyn UpstreamApi>,
        settings: Arc<UpstreamSettings>,
        options: ForwarderOptions,
    ) -> Self {
        Self {
            upstream,
            settings,
            options,
        }
    }

    /// Start forwarding for one downstream client. The returned receiver is
    /// the downstream body; dropping it closes the connection. `shutdown`
    /// cancels every stream opened under it.
    pub fn open(
        &self,
        request: StreamRequest,
        shutdown: &CancellationToken,
    ) -> mpsc::Receiver<Bytes> {
        let (downstream, rx) = Downstream::channel(shutdown.child_token());
        let span = info_span!("stream", request_id = %request.request_id);
        tokio::spawn(self.clone().run(request, downstream).instrument(span));
        rx
    }

    /// Drive one downstream connection until it closes.
    pub async fn run(self, request: StreamRequest, downstream: Downstream) {
        let started = Instant::now();
        let _close_watch = downstream.watch_close();
        let _heartbeat = heartbeat::spawn(downstream.clone(), self.options.heartbeat_interval);

        let sse_url = merge_query(&self.settings.sse_url, &request.query);
        info!(
            upstream = %sse_url,
            session_id = request.hint.session_id.as_deref().unwrap_or(""),
            last_event_id = request.hint.last_event_id.as_deref().unwrap_or(""),
            "downstream stream connected"
        );

        downstream
            .notify(Notice::Ready {
                upstream_sse_url: sse_url.to_string(),
            })
            .await;

        let session = self.bootstrap(request.hint, &downstream).await;
        if !downstream.is_closed() {
            let headers = headers::stream_request_headers(&self.settings.static_headers, &session);
            self.reconnect_loop(&sse_url, &headers, &downstream).await;
        }

        downstream.close();
        info!(
            duration_ms = started.elapsed().as_millis() as u64,
            "downstream stream closed"
        );
    }

    /// Obtain a session through the `initialize` handshake when the client
    /// named none. Failure is reported downstream; streaming proceeds
    /// without a session either way.
    async fn bootstrap(&self, hint: SessionHint, downstream: &Downstream) -> SessionHint {
        if hint.has_session() {
            return hint;
        }

        downstream.notify(Notice::BootstrapStarted).await;
        let outcome = tokio::select! {
            biased;
            _ = downstream.closed().cancelled() => return hint,
            outcome = self.upstream.initialize(&self.settings.static_headers) => outcome,
        };

        match outcome.session_id.clone() {
            Some(session_id) if outcome.ok => {
                info!(%session_id, "auto session created");
                downstream
                    .notify(Notice::SessionCreated {
                        session_id: session_id.clone(),
                    })
                    .await;
                if let Some(server) = outcome.server_label() {
                    downstream.notify(Notice::ServerInfo { server }).await;
                }
                SessionHint {
                    session_id: Some(session_id),
                    ..hint
                }
            }
            _ => {
                warn!(
                    status = outcome.status,
                    error = outcome.error.as_deref().unwrap_or(""),
                    "auto initialize failed"
                );
                downstream
                    .notify(Notice::BootstrapFailed {
                        status: outcome.status,
                        error: outcome.error,
                    })
                    .await;
                downstream.notify(Notice::CredentialsHint).await;
                hint
            }
        }
    }

    async fn reconnect_loop(&self, url: &Url, headers: &HeaderMap, downstream: &Downstream) {
        let mut backoff = Backoff::default();
        let mut phase = Phase::Connecting;

        loop {
            let from = phase.state();
            phase = match phase {
                Phase::Connecting => self.connect_phase(url, headers, downstream, &mut backoff).await,
                Phase::Streaming(attempt) => Self::stream_phase(attempt, downstream, &mut backoff).await,
                Phase::Backoff(delay) => {
                    tokio::select! {
                        biased;
                        _ = downstream.closed().cancelled() => Phase::Closed,
                        _ = tokio::time::sleep(delay) => Phase::Connecting,
                    }
                }
                Phase::Closed => break,
            };

            if downstream.is_closed() {
                phase = Phase::Closed;
            }
            debug!(?from, to = ?phase.state(), attempt = backoff.attempt(), "connection state");
        }
    }

    async fn connect_phase(
        &self,
        url: &Url,
        headers: &HeaderMap,
        downstream: &Downstream,
        backoff: &mut Backoff,
    ) -> Phase {
        let scope = downstream.closed().child_token();
        let opened = connect(
            self.upstream.as_ref(),
            url,
            headers.clone(),
            &scope,
            self.settings.timeout,
        )
        .await;

        match opened {
            Ok(stream) => {
                backoff.reset();
                info!(
                    status = stream.status.as_u16(),
                    content_type = stream.content_type.as_deref().unwrap_or(""),
                    "upstream connected"
                );
                downstream
                    .notify(Notice::UpstreamConnected {
                        status: stream.status.as_u16(),
                        content_type: stream.content_type.clone(),
                    })
                    .await;
                Phase::Streaming(Attempt {
                    stream,
                    _scope: scope.drop_guard(),
                })
            }
            Err(ConnectError::Cancelled) => Phase::Closed,
            Err(e) => {
                scope.cancel();
                let (attempt, delay) = backoff.next();
                error!(error = %e, attempt, delay_ms = delay.as_millis() as u64, "upstream connect failed");
                downstream
                    .notify(Notice::UpstreamError {
                        reason: e.to_string(),
                        attempt,
                        next_delay_ms: delay.as_millis() as u64,
                    })
                    .await;
                Phase::Backoff(delay)
            }
        }
    }

    async fn stream_phase(attempt: Attempt, downstream: &Downstream, backoff: &mut Backoff) -> Phase {
        let Attempt {
            mut stream,
            _scope: scope,
        } = attempt;
        let outcome = relay(&mut stream.body, downstream).await;
        drop(stream);
        drop(scope);

        if downstream.is_closed() {
            return Phase::Closed;
        }
        match outcome {
            RelayOutcome::DownstreamClosed => Phase::Closed,
            RelayOutcome::UpstreamEnded { bytes } => {
                let (attempt, delay) = backoff.next();
                let next_delay_ms = delay.as_millis() as u64;
                warn!(bytes, attempt, delay_ms = next_delay_ms, "upstream stream ended");
                downstream
                    .notify(Notice::UpstreamDisconnected {
                        attempt,
                        next_delay_ms,
                    })
                    .await;
                Phase::Backoff(delay)
            }
            RelayOutcome::UpstreamFailed(e) => {
                let (attempt, delay) = backoff.next();
                let next_delay_ms = delay.as_millis() as u64;
                error!(error = %e, attempt, delay_ms = next_delay_ms, "upstream stream failed");
                downstream
                    .notify(Notice::UpstreamError {
                        reason: e.to_string(),
                        attempt,
                        next_delay_ms,
                    })
                    .await;
                Phase::Backoff(delay)
            }
        }
    }
}
