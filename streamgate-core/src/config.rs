use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub security: SecurityConfig,
    pub pow: PowConfig,
    pub relay: RelayConfig,
    pub upstream: UpstreamConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Absolute base URL clients reach this gateway at. Rewritten playlist
    /// URIs are built against it, so it must match the outward-facing address.
    pub public_base_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            public_base_url: "http://localhost:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Origins allowed to embed the gateway. Matched exactly against the
    /// Origin header, or as a prefix of the Referer.
    pub allowed_origins: Vec<String>,
    /// Domains outbound proxy routes may fetch from. A target host must be
    /// an exact match or a true subdomain of one of these.
    pub allowed_proxy_domains: Vec<String>,
    /// Requests per window allowed on the segment route, per client.
    pub segment_rate_limit: u32,
    pub rate_window_seconds: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:3000".to_string()],
            allowed_proxy_domains: vec![],
            segment_rate_limit: 120,
            rate_window_seconds: 10,
        }
    }
}

/// Proof-of-work parameters.
///
/// The secret and threshold mirror values owned by the upstream provider and
/// recovered by inspection; they have changed before and will change again,
/// so they are configuration rather than constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PowConfig {
    pub secret: String,
    /// A candidate digest is accepted when its leading 32 bits, read
    /// big-endian, are strictly below this value.
    pub threshold: u32,
    pub max_iterations: u64,
}

impl Default for PowConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            threshold: 0x00ff_ffff,
            max_iterations: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Optional relay endpoint for upstreams that block this gateway's own
    /// egress addresses. When unset all fetches go direct.
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the credential-gated primary provider (embed pages,
    /// server discovery).
    pub primary_base: String,
    /// Domain streams of the primary provider are served from. Manifest
    /// URLs are built as `https://{server}.{domain}/{server}/{key}/mono.m3u8`.
    pub primary_stream_domain: String,
    /// Overrides per-server host construction with a single base URL,
    /// `{base}/{server}/{key}/mono.m3u8`. For mirrors serving all stream
    /// servers from one host.
    pub primary_stream_base: Option<String>,
    /// Path on the primary site listing channels, used for dynamic embed
    /// name discovery.
    pub directory_path: String,
    /// Path of the server discovery endpoint on the primary site.
    pub server_lookup_path: String,
    /// Base URL of the token-issuing secondary provider.
    pub secondary_base: String,
    /// Known stream server names for the primary provider, brute-forced when
    /// discovery fails.
    pub known_servers: Vec<String>,
    /// Driver names to exclude from the fallback chain.
    pub skip_drivers: Vec<String>,
    /// Per-channel backend identifiers.
    pub channels: Vec<ChannelEntry>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            primary_base: "https://dvalna.ru".to_string(),
            primary_stream_domain: "dvalna.ru".to_string(),
            primary_stream_base: None,
            directory_path: "/24-7-channels.php".to_string(),
            server_lookup_path: "/server_lookup.php".to_string(),
            secondary_base: "https://vividmosaic.net".to_string(),
            known_servers: vec![
                "top1".to_string(),
                "top2".to_string(),
                "ddy6".to_string(),
                "wind".to_string(),
                "zeko".to_string(),
                "nfs".to_string(),
            ],
            skip_drivers: vec![],
            channels: vec![],
        }
    }
}

/// Static backend identifiers for one public channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelEntry {
    pub id: u32,
    /// Direct no-auth manifest URL, when one is known.
    pub direct_url: Option<String>,
    /// Embed name on the secondary provider.
    pub embed_name: Option<String>,
    /// Country suffix the secondary provider keys embeds by.
    pub embed_country: Option<String>,
    /// Internal channel key on the primary provider.
    pub provider_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from an optional file plus `STREAMGATE_*`
    /// environment overrides (e.g. `STREAMGATE_SERVER__PORT=9000`).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(
            Environment::with_prefix("STREAMGATE")
                .separator("__")
                .list_separator(","),
        );

        builder.build()?.try_deserialize()
    }
}
