//! Application state shared across handlers.

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, UpstreamSettings};
use crate::forwarder::{ForwarderOptions, StreamForwarder};
use crate::upstream::{UpstreamApi, UpstreamClient};

#[derive(Clone)]
pub struct AppState {
    pub forwarder: StreamForwarder,
    pub upstream: Arc<dyn UpstreamApi>,
    pub settings: Arc<UpstreamSettings>,
    /// Allowed CORS origin(s), as configured
    pub cors_origin: String,
    /// Parent of every downstream stream; cancelled on shutdown.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Build state backed by the pooled HTTP client.
    pub fn from_config(config: &AppConfig, shutdown: CancellationToken) -> Result<Self> {
        let settings = Arc::new(UpstreamSettings::from_config(&config.upstream)?);
        let client = UpstreamClient::new(Arc::clone(&settings))?;
        let options = ForwarderOptions {
            heartbeat_interval: config.heartbeat_interval(),
        };
        Ok(Self::new(
            Arc::new(client),
            settings,
            options,
            config.server.cors_origin.clone(),
            shutdown,
        ))
    }

    pub fn new(
        upstream: Arc<dyn UpstreamApi>,
        settings: Arc<UpstreamSettings>,
        options: ForwarderOptions,
        cors_origin: String,
        shutdown: CancellationToken,
    ) -> Self {
        let forwarder = StreamForwarder::new(Arc::clone(&upstream), Arc::clone(&settings), options);
        Self {
            forwarder,
            upstream,
            settings,
            cors_origin,
            shutdown,
        }
    }
}
