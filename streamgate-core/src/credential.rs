//! Signed-credential negotiation with the primary provider.
//!
//! The provider embeds a signed, short-lived credential in its player pages.
//! The broker scrapes it out, decodes the payload to learn the provider's
//! true internal channel key and the expiry claim, and caches the result.
//! Embed pages are tried in a fixed preference order: current naming scheme,
//! legacy naming scheme, then dynamic discovery via the channel directory
//! page.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::cache::TtlCache;
use crate::config::UpstreamConfig;
use crate::relay::RelayClient;

const CREDENTIAL_TTL: Duration = Duration::from_secs(600);
/// Credentials are dropped this long before their own expiry claim, so a
/// credential handed to a player never dies mid-use.
const EXPIRY_MARGIN: Duration = Duration::from_secs(30);
const EMBED_TIMEOUT: Duration = Duration::from_secs(6);
const DIRECTORY_TIMEOUT: Duration = Duration::from_secs(8);

/// A decoded credential for one channel on the primary provider.
#[derive(Debug, Clone)]
pub struct Credential {
    /// The raw signed token, forwarded verbatim to upstream endpoints.
    pub token: String,
    /// The provider's internal channel key recovered from the payload.
    pub channel_key: String,
    pub expires_at: DateTime<Utc>,
}

/// Where embed and directory HTML comes from. Swappable so extraction logic
/// is testable without live scraping.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn embed_page(&self, embed_name: &str) -> anyhow::Result<String>;
    async fn directory_page(&self) -> anyhow::Result<String>;
}

/// Production source: fetches pages from the primary site via the relay.
pub struct HttpCredentialSource {
    relay: Arc<RelayClient>,
    primary_base: String,
    directory_path: String,
}

impl HttpCredentialSource {
    pub fn new(relay: Arc<RelayClient>, config: &UpstreamConfig) -> Self {
        Self {
            relay,
            primary_base: config.primary_base.trim_end_matches('/').to_string(),
            directory_path: config.directory_path.clone(),
        }
    }
}

#[async_trait]
impl CredentialSource for HttpCredentialSource {
    async fn embed_page(&self, embed_name: &str) -> anyhow::Result<String> {
        let url = format!("{}/embed/{embed_name}", self.primary_base);
        let response = self
            .relay
            .fetch(&url, Some(&format!("{}/", self.primary_base)), None, EMBED_TIMEOUT)
            .await?;
        if !response.status().is_success() {
            anyhow::bail!("embed page {embed_name} returned {}", response.status());
        }
        Ok(response.text().await?)
    }

    async fn directory_page(&self) -> anyhow::Result<String> {
        let url = format!("{}{}", self.primary_base, self.directory_path);
        let response = self
            .relay
            .fetch(&url, Some(&format!("{}/", self.primary_base)), None, DIRECTORY_TIMEOUT)
            .await?;
        if !response.status().is_success() {
            anyhow::bail!("directory page returned {}", response.status());
        }
        Ok(response.text().await?)
    }
}

#[derive(Deserialize)]
struct CredentialClaims {
    key: String,
    exp: i64,
}

/// Scrapes, decodes, and caches credentials; also keeps a reverse index from
/// internal channel keys back to cached credentials, for key-fetch requests
/// that only carry the internal key.
#[derive(Clone)]
pub struct CredentialBroker {
    source: Arc<dyn CredentialSource>,
    cache: TtlCache<String, Credential>,
    reverse: TtlCache<String, String>,
    token_pattern: Regex,
}

impl CredentialBroker {
    pub fn new(source: Arc<dyn CredentialSource>) -> Self {
        Self {
            source,
            cache: TtlCache::new(CREDENTIAL_TTL, 1024),
            reverse: TtlCache::new(CREDENTIAL_TTL, 1024),
            // Three base64url segments: header.payload.signature.
            token_pattern: Regex::new(r"[A-Za-z0-9_-]{8,}\.[A-Za-z0-9_-]{8,}\.[A-Za-z0-9_-]{8,}")
                .expect("static pattern"),
        }
    }

    /// Obtain a credential for a public channel id, from cache or by
    /// scraping. Returns `None` when every naming scheme fails; each failure
    /// is logged and the chain continues.
    pub async fn fetch_credential(&self, channel_id: u32) -> Option<Credential> {
        let cache_key = format!("channel:{channel_id}");
        if let Some(credential) = self.cache.get(&cache_key) {
            return Some(credential);
        }

        // Static naming schemes first, in preference order. The directory
        // scrape only runs when both fail, so the common case never pays
        // its latency.
        let static_names = [format!("premium{channel_id}"), format!("stream-{channel_id}")];
        for embed_name in &static_names {
            if let Some(credential) = self.try_embed(channel_id, embed_name, &cache_key).await {
                return Some(credential);
            }
        }

        if let Some(discovered) = self.discover_name(channel_id).await {
            if !static_names.contains(&discovered) {
                if let Some(credential) =
                    self.try_embed(channel_id, &discovered, &cache_key).await
                {
                    return Some(credential);
                }
            }
        }

        warn!(channel_id, "credential unavailable from any embed naming scheme");
        None
    }

    async fn try_embed(
        &self,
        channel_id: u32,
        embed_name: &str,
        cache_key: &str,
    ) -> Option<Credential> {
        match self.source.embed_page(embed_name).await {
            Ok(html) => {
                if let Some(credential) = self.extract_credential(&html) {
                    debug!(channel_id, embed_name, "credential resolved");
                    self.store(cache_key, &credential);
                    return Some(credential);
                }
                debug!(channel_id, embed_name, "embed page carried no credential");
                None
            }
            Err(e) => {
                debug!(channel_id, embed_name, error = %e, "embed page fetch failed");
                None
            }
        }
    }

    /// Look up a cached credential by the provider's internal channel key.
    /// Used by the key route, which only sees the internal key inside the
    /// upstream key URL. Never triggers a fetch: if the credential is gone,
    /// the playlist that referenced it is stale anyway.
    pub fn credential_for_key(&self, channel_key: &str) -> Option<Credential> {
        let cache_key = self.reverse.get(&channel_key.to_string())?;
        self.cache.get(&cache_key)
    }

    async fn discover_name(&self, channel_id: u32) -> Option<String> {
        let html = match self.source.directory_page().await {
            Ok(html) => html,
            Err(e) => {
                debug!(channel_id, error = %e, "directory page fetch failed");
                return None;
            }
        };
        let pattern = Regex::new(&format!(
            r#"data-id="{channel_id}"[^>]*data-embed="([A-Za-z0-9_-]+)""#
        ))
        .ok()?;
        pattern
            .captures(&html)
            .map(|caps| caps[1].to_string())
    }

    /// Find the signed token in an embed page and decode its payload
    /// segment to recover the internal channel key and expiry.
    fn extract_credential(&self, html: &str) -> Option<Credential> {
        for token in self.token_pattern.find_iter(html) {
            let token = token.as_str();
            let payload = token.split('.').nth(1)?;
            let Ok(decoded) = URL_SAFE_NO_PAD.decode(payload) else {
                continue;
            };
            let Ok(claims) = serde_json::from_slice::<CredentialClaims>(&decoded) else {
                continue;
            };
            let expires_at = Utc.timestamp_opt(claims.exp, 0).single()?;
            if expires_at <= Utc::now() {
                continue;
            }
            return Some(Credential {
                token: token.to_string(),
                channel_key: claims.key,
                expires_at,
            });
        }
        None
    }

    fn store(&self, cache_key: &str, credential: &Credential) {
        let until_expiry = (credential.expires_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO)
            .saturating_sub(EXPIRY_MARGIN);
        let deadline = Instant::now() + until_expiry.min(CREDENTIAL_TTL);
        self.cache
            .insert_until(cache_key.to_string(), credential.clone(), deadline);
        self.reverse.insert_until(
            credential.channel_key.clone(),
            cache_key.to_string(),
            deadline,
        );
    }
}
