//! Outbound header assembly.
//!
//! Upstream request headers are built from an ordered list of stages merged
//! left to right. A header named in a later stage replaces every value an
//! earlier stage set for that name; names are compared case-insensitively.

use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use tracing::warn;

use crate::session::{LAST_EVENT_ID_HEADER, SESSION_HEADER, SessionHint};

use super::USER_AGENT;

pub const ACCEPT_EVENT_STREAM: &str = "text/event-stream";
pub const ACCEPT_JSON_OR_EVENT_STREAM: &str = "application/json, text/event-stream";
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Header groups in precedence order: protocol defaults, static config,
/// then session-derived values (the handshake puts defaults last).
#[derive(Debug, Clone, Default)]
pub struct HeaderStages {
    stages: Vec<HeaderMap>,
}

impl HeaderStages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, headers: HeaderMap) -> Self {
        self.stages.push(headers);
        self
    }

    pub fn merge(&self) -> HeaderMap {
        let mut merged = HeaderMap::new();
        for headers in &self.stages {
            for name in headers.keys() {
                merged.remove(name);
                for value in headers.get_all(name) {
                    merged.append(name.clone(), value.clone());
                }
            }
        }
        merged
    }
}

/// Defaults for the long-lived streaming GET.
pub fn stream_defaults() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::ACCEPT, HeaderValue::from_static(ACCEPT_EVENT_STREAM));
    headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
    headers
}

/// Defaults for unary JSON-RPC POSTs, including the handshake.
pub fn unary_defaults() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static(ACCEPT_JSON_OR_EVENT_STREAM),
    );
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_JSON));
    headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
    headers
}

pub fn session_headers(session_id: Option<&str>, last_event_id: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    insert_opaque(&mut headers, SESSION_HEADER, session_id);
    insert_opaque(&mut headers, LAST_EVENT_ID_HEADER, last_event_id);
    headers
}

/// Headers for the upstream streaming connection.
pub fn stream_request_headers(static_headers: &HeaderMap, session: &SessionHint) -> HeaderMap {
    HeaderStages::new()
        .stage(stream_defaults())
        .stage(static_headers.clone())
        .stage(session_headers(
            session.session_id.as_deref(),
            session.last_event_id.as_deref(),
        ))
        .merge()
}

/// Headers for a forwarded unary request.
pub fn unary_request_headers(static_headers: &HeaderMap, session_id: Option<&str>) -> HeaderMap {
    HeaderStages::new()
        .stage(unary_defaults())
        .stage(static_headers.clone())
        .stage(session_headers(session_id, None))
        .merge()
}

/// Headers for the initialize handshake. Protocol defaults are applied last
/// so content negotiation stays JSON regardless of caller headers.
pub fn handshake_headers(extra_headers: &HeaderMap) -> HeaderMap {
    HeaderStages::new()
        .stage(extra_headers.clone())
        .stage(unary_defaults())
        .merge()
}

fn insert_opaque(headers: &mut HeaderMap, name: &'static str, value: Option<&str>) {
    let Some(value) = value else {
        return;
    };
    match HeaderValue::from_str(value) {
        Ok(v) => {
            headers.insert(HeaderName::from_static(name), v);
        }
        Err(_) => warn!(header = name, "dropping session value that is not a valid header"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn static_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer static"));
        headers.insert("mcp-session-id", HeaderValue::from_static("static-session"));
        headers.insert("accept", HeaderValue::from_static("application/x-custom"));
        headers
    }

    #[test]
    fn later_stages_override_earlier() {
        let session = SessionHint {
            session_id: Some("live-session".to_string()),
            last_event_id: Some("17".to_string()),
        };
        let merged = stream_request_headers(&static_headers(), &session);

        assert_eq!(merged["mcp-session-id"], "live-session");
        assert_eq!(merged["last-event-id"], "17");
        assert_eq!(merged["authorization"], "Bearer static");
        assert_eq!(merged["accept"], "application/x-custom");
        assert_eq!(merged["user-agent"], USER_AGENT);
        assert_eq!(merged.get_all("mcp-session-id").iter().count(), 1);
    }

    #[test]
    fn absent_session_leaves_static_values() {
        let merged = stream_request_headers(&static_headers(), &SessionHint::default());
        assert_eq!(merged["mcp-session-id"], "static-session");
        assert!(merged.get("last-event-id").is_none());
    }

    #[test]
    fn stream_defaults_request_event_stream() {
        let merged = stream_request_headers(&HeaderMap::new(), &SessionHint::default());
        assert_eq!(merged["accept"], ACCEPT_EVENT_STREAM);
    }

    #[test]
    fn handshake_keeps_json_content_type() {
        let mut extra = HeaderMap::new();
        extra.insert("content-type", HeaderValue::from_static("text/plain"));
        extra.insert("x-api-key", HeaderValue::from_static("k"));
        let merged = handshake_headers(&extra);
        assert_eq!(merged["content-type"], CONTENT_TYPE_JSON);
        assert_eq!(merged["x-api-key"], "k");
    }

    #[test]
    fn merge_replaces_all_values_of_a_name() {
        let mut first = HeaderMap::new();
        first.append("x-tag", HeaderValue::from_static("a"));
        first.append("x-tag", HeaderValue::from_static("b"));
        let mut second = HeaderMap::new();
        second.insert("X-Tag", HeaderValue::from_static("c"));

        let merged = HeaderStages::new().stage(first).stage(second).merge();
        let values: Vec<_> = merged.get_all("x-tag").iter().collect();
        assert_eq!(values, vec!["c"]);
    }

    #[test]
    fn invalid_session_values_are_dropped() {
        let headers = session_headers(Some("bad\nvalue"), Some("ok"));
        assert!(headers.get("mcp-session-id").is_none());
        assert_eq!(headers["last-event-id"], "ok");
    }
}
