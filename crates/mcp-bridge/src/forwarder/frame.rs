//! Event-stream wire frames written to downstream clients.

use bytes::Bytes;
use serde_json::{Value, json};

pub const HEARTBEAT: &str = ": heartbeat\n\n";

/// `event: <name>` followed by one `data:` line per payload line.
pub fn event(name: &str, data: &str) -> Bytes {
    let mut frame = String::with_capacity(name.len() + data.len() + 16);
    frame.push_str("event: ");
    frame.push_str(name);
    frame.push('\n');
    for line in data.split('\n') {
        frame.push_str("data: ");
        frame.push_str(line.strip_suffix('\r').unwrap_or(line));
        frame.push('\n');
    }
    frame.push('\n');
    Bytes::from(frame)
}

/// Keep-alive comment frame; ignored by event-stream parsers.
pub fn heartbeat() -> Bytes {
    Bytes::from_static(HEARTBEAT.as_bytes())
}

/// Control events the bridge injects into a downstream stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Ready {
        upstream_sse_url: String,
    },
    BootstrapStarted,
    SessionCreated {
        session_id: String,
    },
    ServerInfo {
        server: String,
    },
    BootstrapFailed {
        status: u16,
        error: Option<String>,
    },
    CredentialsHint,
    UpstreamConnected {
        status: u16,
        content_type: Option<String>,
    },
    UpstreamDisconnected {
        attempt: u32,
        next_delay_ms: u64,
    },
    UpstreamError {
        reason: String,
        attempt: u32,
        next_delay_ms: u64,
    },
}

impl Notice {
    pub fn event_name(&self) -> &'static str {
        match self {
            Notice::Ready { .. } => "ready",
            Notice::BootstrapFailed { .. } | Notice::UpstreamDisconnected { .. } => "warn",
            Notice::UpstreamError { .. } => "error",
            _ => "info",
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            Notice::Ready { upstream_sse_url } => json!({ "upstreamSseUrl": upstream_sse_url }),
            Notice::BootstrapStarted => {
                json!({ "msg": "no_session_provided_attempting_initialize" })
            }
            Notice::SessionCreated { session_id } => {
                json!({ "msg": "auto_session_created", "sessionId": session_id })
            }
            Notice::ServerInfo { server } => json!({ "msg": "server_info", "server": server }),
            Notice::BootstrapFailed { status, error } => {
                json!({ "msg": "auto_initialize_failed", "status": status, "error": error })
            }
            Notice::CredentialsHint => {
                json!({ "msg": "if_upstream_requires_credentials_set_env_vars" })
            }
            Notice::UpstreamConnected {
                status,
                content_type,
            } => json!({
                "msg": "upstream_connected",
                "status": status,
                "contentType": content_type.as_deref().unwrap_or(""),
            }),
            Notice::UpstreamDisconnected {
                attempt,
                next_delay_ms,
            } => json!({
                "msg": "upstream_disconnected",
                "attempt": attempt,
                "nextDelayMs": next_delay_ms,
            }),
            Notice::UpstreamError {
                reason,
                attempt,
                next_delay_ms,
            } => json!({
                "msg": "upstream_error",
                "reason": reason,
                "attempt": attempt,
                "nextDelayMs": next_delay_ms,
            }),
        }
    }

    pub fn to_frame(&self) -> Bytes {
        event(self.event_name(), &self.payload().to_string())
    }
}
