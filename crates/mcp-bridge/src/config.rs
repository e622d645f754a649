//! Process configuration.
//!
//! `AppConfig` is the serialized shape (TOML file, `MCP_BRIDGE_*` environment,
//! CLI overrides). It is built once at startup and resolved into the
//! validated [`UpstreamSettings`] the forwarder and handlers consume.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use config::{Config, Environment, File, FileFormat};
use log::warn;
use reqwest::Url;
use serde::{Deserialize, Serialize};

pub const APP_NAME: &str = "mcp-bridge";

/// Environment prefix for config overrides, e.g. `MCP_BRIDGE_UPSTREAM__URL`.
pub const ENV_PREFIX: &str = "MCP_BRIDGE";

pub const DEFAULT_UPSTREAM_URL: &str = "https://mcp.deepwiki.com/mcp";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub forwarder: ForwarderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Allowed CORS origin(s): "*" or a comma-separated list
    pub cors_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            cors_origin: "*".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Unary JSON-RPC endpoint (also used for the initialize handshake)
    pub url: String,
    /// Streaming endpoint. Derived from `url` (`/mcp` -> `/sse`) when unset.
    pub sse_url: Option<String>,
    /// Static headers attached to every upstream request
    pub headers: BTreeMap<String, String>,
    /// Timeout until upstream response headers arrive. 0 disables.
    pub timeout_ms: u64,
    /// Idle keep-alive for pooled upstream connections
    pub keep_alive_ms: u64,
    /// Maximum idle pooled connections per upstream host
    pub max_sockets: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_UPSTREAM_URL.to_string(),
            sse_url: None,
            headers: BTreeMap::new(),
            timeout_ms: 0,
            keep_alive_ms: 15_000,
            max_sockets: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwarderConfig {
    /// Interval between keep-alive comment frames on downstream streams
    pub heartbeat_interval_ms: u64,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 15_000,
        }
    }
}

/// Values supplied on the `serve` command line (or their legacy env vars).
#[derive(Debug, Clone, Default)]
pub struct ServeOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub upstream_url: Option<String>,
    pub upstream_sse_url: Option<String>,
    pub upstream_headers_json: Option<String>,
    pub upstream_timeout_ms: Option<u64>,
    pub upstream_keep_alive_ms: Option<u64>,
    pub upstream_max_sockets: Option<usize>,
    pub cors_origin: Option<String>,
}

impl AppConfig {
    /// Apply CLI overrides on top of file and environment values.
    pub fn with_overrides(mut self, overrides: ServeOverrides) -> Self {
        if let Some(host) = overrides.host {
            self.server.host = host;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(origin) = overrides.cors_origin {
            self.server.cors_origin = origin;
        }
        if let Some(url) = overrides.upstream_url {
            self.upstream.url = url;
        }
        if let Some(sse_url) = overrides.upstream_sse_url.filter(|s| !s.trim().is_empty()) {
            self.upstream.sse_url = Some(sse_url);
        }
        if let Some(raw) = overrides.upstream_headers_json {
            self.upstream.headers.extend(parse_headers_json(&raw));
        }
        if let Some(timeout_ms) = overrides.upstream_timeout_ms {
            self.upstream.timeout_ms = timeout_ms;
        }
        if let Some(keep_alive_ms) = overrides.upstream_keep_alive_ms {
            self.upstream.keep_alive_ms = keep_alive_ms;
        }
        if let Some(max_sockets) = overrides.upstream_max_sockets {
            self.upstream.max_sockets = max_sockets;
        }
        self
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.forwarder.heartbeat_interval_ms.max(1))
    }
}

/// Load configuration from an optional TOML file and the environment.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let built = Config::builder()
        .set_default("logging.level", "info")?
        .add_source(
            File::from(path)
                .format(FileFormat::Toml)
                .required(false),
        )
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("reading configuration from {}", path.display()))?;

    built
        .try_deserialize()
        .context("deserializing configuration")
}

pub fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {parent:?}"))?;
    }

    let toml = toml::to_string_pretty(&AppConfig::default())
        .context("serializing default config to TOML")?;
    let mut body = format!("# Configuration for {APP_NAME}\n# File: {}\n\n", path.display());
    body.push_str(&toml);
    std::fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
}

/// Parse a JSON object of static headers. Non-string values are dropped;
/// malformed JSON yields no headers.
pub fn parse_headers_json(raw: &str) -> BTreeMap<String, String> {
    if raw.trim().is_empty() {
        return BTreeMap::new();
    }
    match serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(raw) {
        Ok(map) => map
            .into_iter()
            .filter_map(|(k, v)| match v {
                serde_json::Value::String(s) => Some((k, s)),
                _ => None,
            })
            .collect(),
        Err(e) => {
            warn!("Failed to parse upstream headers JSON: {}", e);
            BTreeMap::new()
        }
    }
}

/// Validated upstream settings shared by every downstream connection.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    pub url: Url,
    pub sse_url: Url,
    pub static_headers: HeaderMap,
    pub timeout: Option<Duration>,
    pub keep_alive: Duration,
    pub max_sockets: usize,
}

impl UpstreamSettings {
    pub fn from_config(cfg: &UpstreamConfig) -> Result<Self> {
        let url = Url::parse(&cfg.url)
            .map_err(|e| anyhow!("invalid upstream url {:?}: {}", cfg.url, e))?;
        let sse_url = match cfg.sse_url.as_deref().map(str::trim) {
            Some(explicit) if !explicit.is_empty() => Url::parse(explicit)
                .map_err(|e| anyhow!("invalid upstream sse url {:?}: {}", explicit, e))?,
            _ => derive_sse_url(&url),
        };

        Ok(Self {
            url,
            sse_url,
            static_headers: static_header_map(&cfg.headers),
            timeout: (cfg.timeout_ms > 0).then(|| Duration::from_millis(cfg.timeout_ms)),
            keep_alive: Duration::from_millis(cfg.keep_alive_ms),
            max_sockets: cfg.max_sockets,
        })
    }
}

/// Infer the streaming endpoint from the unary one. A path ending in `/mcp`
/// becomes `<origin>/sse` with the query kept, the same base the legacy
/// message endpoint uses. Anything else is used unchanged.
pub fn derive_sse_url(url: &Url) -> Url {
    let mut derived = url.clone();
    if url.path().ends_with("/mcp") {
        derived.set_path("/sse");
        derived.set_fragment(None);
    }
    derived
}

fn static_header_map(headers: &BTreeMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let parsed_name = HeaderName::from_bytes(name.as_bytes());
        let parsed_value = HeaderValue::from_str(value);
        match (parsed_name, parsed_value) {
            (Ok(n), Ok(v)) => {
                map.insert(n, v);
            }
            _ => warn!("Skipping invalid static upstream header {:?}", name),
        }
    }
    map
}
