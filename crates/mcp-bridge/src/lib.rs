//! MCP Bridge Library
//!
//! Re-exposes a single remote MCP (JSON-RPC over HTTP / event-stream) service
//! to downstream clients, normalizing session identity and keeping long-lived
//! event streams alive across upstream failures.

pub mod api;
pub mod config;
pub mod forwarder;
pub mod session;
pub mod upstream;
