//! Outbound fetch client with optional relay indirection.
//!
//! Some upstreams block this gateway's own network origin. When a relay
//! endpoint is configured, fetches route through it (carrying the target
//! URL, referer, and origin, since some upstreams validate all three); on
//! relay failure or when no relay is configured, the client falls back to a
//! direct fetch with browser-like headers.

use std::time::Duration;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tracing::debug;

use crate::config::RelayConfig;

const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

#[derive(Clone)]
pub struct RelayClient {
    http: reqwest::Client,
    endpoint: Option<String>,
}

impl RelayClient {
    pub fn new(config: &RelayConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {e}"))?;
        Ok(Self {
            http,
            endpoint: config
                .endpoint
                .as_ref()
                .map(|e| e.trim_end_matches('/').to_string()),
        })
    }

    /// Fetch a URL, through the relay when one is configured, otherwise (or
    /// on relay failure) directly. The timeout applies per attempt; callers
    /// scale it by how critical the fetch is.
    pub async fn fetch(
        &self,
        url: &str,
        referer: Option<&str>,
        origin: Option<&str>,
        timeout: Duration,
    ) -> Result<reqwest::Response, reqwest::Error> {
        self.fetch_with_headers(url, referer, origin, &[], timeout)
            .await
    }

    /// Like [`fetch`](Self::fetch), with extra request headers (used for
    /// authentication material on key fetches).
    pub async fn fetch_with_headers(
        &self,
        url: &str,
        referer: Option<&str>,
        origin: Option<&str>,
        extra_headers: &[(String, String)],
        timeout: Duration,
    ) -> Result<reqwest::Response, reqwest::Error> {
        if let Some(endpoint) = &self.endpoint {
            match self
                .fetch_relayed(endpoint, url, referer, origin, extra_headers, timeout)
                .await
            {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    debug!(status = %response.status(), url, "relay returned error, falling back to direct fetch");
                }
                Err(e) => {
                    debug!(error = %e, url, "relay unreachable, falling back to direct fetch");
                }
            }
        }
        self.fetch_direct(url, referer, origin, extra_headers, timeout)
            .await
    }

    async fn fetch_relayed(
        &self,
        endpoint: &str,
        url: &str,
        referer: Option<&str>,
        origin: Option<&str>,
        extra_headers: &[(String, String)],
        timeout: Duration,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let mut relay_url = format!(
            "{endpoint}?url={}",
            utf8_percent_encode(url, QUERY_VALUE)
        );
        if let Some(referer) = referer {
            relay_url.push_str(&format!(
                "&referer={}",
                utf8_percent_encode(referer, QUERY_VALUE)
            ));
        }
        if let Some(origin) = origin {
            relay_url.push_str(&format!(
                "&origin={}",
                utf8_percent_encode(origin, QUERY_VALUE)
            ));
        }
        let mut request = self.http.get(&relay_url).timeout(timeout);
        for (name, value) in extra_headers {
            request = request.header(name, value);
        }
        request.send().await
    }

    async fn fetch_direct(
        &self,
        url: &str,
        referer: Option<&str>,
        origin: Option<&str>,
        extra_headers: &[(String, String)],
        timeout: Duration,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let mut request = self
            .http
            .get(url)
            .timeout(timeout)
            .header("User-Agent", BROWSER_USER_AGENT)
            .header("Accept", "*/*")
            .header("Accept-Language", "en-US,en;q=0.9");

        // Default Referer from the target's own origin: several upstreams
        // reject referer-less requests outright.
        match referer {
            Some(referer) => request = request.header("Referer", referer),
            None => {
                if let Ok(parsed) = url::Url::parse(url) {
                    let derived = format!(
                        "{}://{}/",
                        parsed.scheme(),
                        parsed.host_str().unwrap_or("")
                    );
                    request = request.header("Referer", derived);
                }
            }
        }
        if let Some(origin) = origin {
            request = request.header("Origin", origin);
        }
        for (name, value) in extra_headers {
            request = request.header(name, value);
        }

        request.send().await
    }
}
