//! API route definitions.

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, HeaderValue, Method, header};
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::LatencyUnit;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::session::{LAST_EVENT_ID_HEADER, SESSION_HEADER};

use super::handlers;
use super::state::AppState;

/// Maximum accepted JSON-RPC request body.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.cors_origin);

    // Tracing layer with request IDs and timing
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(
            DefaultOnResponse::new()
                .level(Level::INFO)
                .latency_unit(LatencyUnit::Millis),
        );

    Router::new()
        .route("/health", get(handlers::health))
        .route("/sse", get(handlers::stream_events))
        .route(
            "/mcp",
            get(handlers::stream_events).post(handlers::forward_mcp),
        )
        .route("/sse/{*subpath}", post(handlers::forward_sse_message))
        .fallback(handlers::not_found)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .layer(trace_layer)
        .with_state(state)
}

/// Build CORS layer from the configured origin setting.
fn build_cors_layer(cors_origin: &str) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::OPTIONS];

    let allowed_headers = [
        header::CONTENT_TYPE,
        header::ACCEPT,
        header::AUTHORIZATION,
        header::ORIGIN,
        HeaderName::from_static(SESSION_HEADER),
        HeaderName::from_static(LAST_EVENT_ID_HEADER),
        HeaderName::from_static("x-requested-with"),
    ];

    let exposed_headers = [
        HeaderName::from_static(SESSION_HEADER),
        header::CONTENT_TYPE,
        HeaderName::from_static(LAST_EVENT_ID_HEADER),
    ];

    let base = CorsLayer::new()
        .allow_methods(methods)
        .allow_headers(allowed_headers)
        .expose_headers(exposed_headers);

    let trimmed = cors_origin.trim();
    if trimmed == "*" {
        return base.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = trimmed
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Invalid CORS origin '{}': {}", origin, e);
                None
            }
        })
        .collect();

    if origins.is_empty() {
        tracing::warn!("CORS: No valid origins configured, denying all cross-origin requests");
        return base.allow_origin(AllowOrigin::exact(HeaderValue::from_static("null")));
    }

    tracing::info!("CORS: Allowing origins: {:?}", origins);
    base.allow_origin(origins)
}
