//! HTTP API module.
//!
//! Downstream-facing endpoints: the event stream, unary JSON-RPC forwarding
//! and health.

mod error;
mod handlers;
mod routes;
mod state;

pub use error::{ApiError, ApiResult, ErrorResponse, UPSTREAM_FAILURE_RPC_CODE};
pub use routes::create_router;
pub use state::AppState;
