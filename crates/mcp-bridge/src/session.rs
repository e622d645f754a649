//! Session identity carried by downstream requests.
//!
//! The upstream issues session ids; the bridge only carries them. Each
//! downstream request may name a session and a resumption point either in
//! headers or, for clients that cannot set headers (EventSource), in the
//! query string.

use std::collections::HashMap;

use axum::http::HeaderMap;

pub const SESSION_HEADER: &str = "mcp-session-id";
pub const LAST_EVENT_ID_HEADER: &str = "last-event-id";

pub const SESSION_QUERY: &str = "sessionId";
pub const SESSION_QUERY_ALIAS: &str = "session";
pub const LAST_EVENT_ID_QUERY: &str = "lastEventId";

/// Session identity resolved from one inbound request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionHint {
    pub session_id: Option<String>,
    pub last_event_id: Option<String>,
}

impl SessionHint {
    pub fn has_session(&self) -> bool {
        self.session_id.is_some()
    }
}

/// Resolve the session id and last-event marker for a request.
///
/// Header values take precedence over query parameters. Empty values count
/// as absent.
pub fn resolve_session(headers: &HeaderMap, query: &HashMap<String, String>) -> SessionHint {
    let session_id = header_value(headers, SESSION_HEADER)
        .or_else(|| query_value(query, SESSION_QUERY))
        .or_else(|| query_value(query, SESSION_QUERY_ALIAS));
    let last_event_id = header_value(headers, LAST_EVENT_ID_HEADER)
        .or_else(|| query_value(query, LAST_EVENT_ID_QUERY));

    SessionHint {
        session_id,
        last_event_id,
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn query_value(query: &HashMap<String, String>, name: &str) -> Option<String> {
    query
        .get(name)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
