//! Driver B: token-gated secondary provider.
//!
//! The secondary provider keys embeds by a name+country pair and hands out
//! a tokenized playback URL inside the embed page. Newer pages carry the URL
//! in clear script; older ones hide it behind a positional cipher (see
//! `crate::cipher`). Resolved playback URLs are cached for ~30 minutes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use super::{validate_playlist, BackendDriver, DriverError, FetchedManifest};
use crate::cache::TtlCache;
use crate::channel::Channel;
use crate::cipher;
use crate::config::UpstreamConfig;
use crate::relay::RelayClient;

const TOKEN_TTL: Duration = Duration::from_secs(1800);
const EMBED_TIMEOUT: Duration = Duration::from_secs(6);
const MANIFEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct TokenDriver {
    relay: Arc<RelayClient>,
    secondary_base: String,
    playback_urls: TtlCache<String, String>,
    clear_source: Regex,
    clear_token: Regex,
    scrambled_call: Regex,
}

impl TokenDriver {
    pub fn new(relay: Arc<RelayClient>, config: &UpstreamConfig) -> Self {
        Self {
            relay,
            secondary_base: config.secondary_base.trim_end_matches('/').to_string(),
            playback_urls: TtlCache::new(TOKEN_TTL, 512),
            clear_source: Regex::new(r#"source:\s*"(https?://[^"]+\.m3u8[^"]*)""#)
                .expect("static pattern"),
            clear_token: Regex::new(r#"token:\s*"([A-Za-z0-9._-]+)""#).expect("static pattern"),
            // unscramble("<alphabet>", <base>, <offset>, "<delim>", "<payload>")
            scrambled_call: Regex::new(
                r#"unscramble\("([^"]+)",\s*(\d+),\s*(\d+),\s*"(.)",\s*"([^"]+)"\)"#,
            )
            .expect("static pattern"),
        }
    }

    fn embed_url(&self, name: &str, country: &str) -> String {
        format!("{}/embed/{name}-{country}", self.secondary_base)
    }

    /// Pull the tokenized playback URL out of an embed page, by clear
    /// pattern first, cipher second.
    fn extract_playback_url(&self, html: &str) -> Option<String> {
        if let Some(caps) = self.clear_source.captures(html) {
            let mut url = caps[1].to_string();
            if !url.contains("token=") {
                if let Some(token) = self.clear_token.captures(html) {
                    let sep = if url.contains('?') { '&' } else { '?' };
                    url.push(sep);
                    url.push_str(&format!("token={}", &token[1]));
                }
            }
            return Some(url);
        }

        let caps = self.scrambled_call.captures(html)?;
        let base: u32 = caps[2].parse().ok()?;
        let offset: u32 = caps[3].parse().ok()?;
        let delimiter = caps[4].chars().next()?;
        let decoded = cipher::decode(&caps[1], base, offset, delimiter, &caps[5])?;
        decoded.starts_with("http").then_some(decoded)
    }
}

#[async_trait]
impl BackendDriver for TokenDriver {
    fn name(&self) -> &'static str {
        "token"
    }

    async fn attempt(&self, channel: &Channel) -> Result<FetchedManifest, DriverError> {
        let embed = channel.embed.as_ref().ok_or(DriverError::NotMapped)?;
        let cache_key = format!("{}:{}", embed.name, embed.country);
        let embed_url = self.embed_url(&embed.name, &embed.country);

        let playback_url = match self.playback_urls.get(&cache_key) {
            Some(url) => url,
            None => {
                let response = self
                    .relay
                    .fetch(&embed_url, Some(&self.secondary_base), None, EMBED_TIMEOUT)
                    .await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(DriverError::Upstream(format!("embed page returned {status}")));
                }
                let html = response.text().await?;
                let url = self.extract_playback_url(&html).ok_or_else(|| {
                    DriverError::Auth("no playback URL or token in embed page".to_string())
                })?;
                debug!(embed = %cache_key, "playback URL extracted");
                self.playback_urls.insert(cache_key, url.clone());
                url
            }
        };

        let response = self
            .relay
            .fetch(
                &playback_url,
                Some(&embed_url),
                Some(&self.secondary_base),
                MANIFEST_TIMEOUT,
            )
            .await?;
        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            // Token went stale early: drop it so the next try re-extracts.
            self.playback_urls
                .invalidate(&format!("{}:{}", embed.name, embed.country));
            return Err(DriverError::Auth(format!("playback URL rejected: {status}")));
        }
        if !status.is_success() {
            return Err(DriverError::Upstream(format!("manifest returned {status}")));
        }

        let body = response.text().await?;
        validate_playlist(&body)?;

        Ok(FetchedManifest {
            body,
            source_url: playback_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::EmbedRef;
    use crate::config::RelayConfig;
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn driver_for(server: &MockServer) -> TokenDriver {
        let mut config = UpstreamConfig::default();
        config.secondary_base = server.uri();
        TokenDriver::new(
            Arc::new(RelayClient::new(&RelayConfig { endpoint: None }).expect("client")),
            &config,
        )
    }

    fn channel() -> Channel {
        Channel {
            public_id: 12,
            embed: Some(EmbedRef {
                name: "espn".to_string(),
                country: "us".to_string(),
            }),
            ..Channel::default()
        }
    }

    fn encode(alphabet: &str, base: u32, offset: u32, delimiter: char, input: &str) -> String {
        let digits: Vec<char> = alphabet.chars().take(base as usize).collect();
        let mut runs = Vec::new();
        for ch in input.chars() {
            let mut value = ch as u32 + offset;
            let mut run = String::new();
            while value > 0 {
                run.insert(0, digits[(value % base) as usize]);
                value /= base;
            }
            runs.push(run);
        }
        runs.join(&delimiter.to_string())
    }

    #[tokio::test]
    async fn unmapped_channel_fails_fast() {
        let server = MockServer::start().await;
        let result = driver_for(&server).attempt(&Channel::default()).await;
        assert!(matches!(result, Err(DriverError::NotMapped)));
    }

    #[tokio::test]
    async fn clear_pattern_with_separate_token() {
        let server = MockServer::start().await;
        let embed_html = format!(
            r#"<script>player.setup({{ source: "{}/live/espn/index.m3u8", token: "tok123" }});</script>"#,
            server.uri()
        );
        Mock::given(method("GET"))
            .and(path("/embed/espn-us"))
            .respond_with(ResponseTemplate::new(200).set_body_string(embed_html))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/live/espn/index.m3u8"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("#EXTM3U\n#EXTINF:6.0,\nseg.ts\n"),
            )
            .mount(&server)
            .await;

        let manifest = driver_for(&server).attempt(&channel()).await.expect("manifest");
        assert!(manifest.source_url.contains("token=tok123"));
    }

    #[tokio::test]
    async fn scrambled_embed_is_decoded() {
        let server = MockServer::start().await;
        let alphabet = "abcdefghij";
        let url = format!("{}/live/espn/index.m3u8?token=t9", server.uri());
        let payload = encode(alphabet, 10, 5, '-', &url);
        let embed_html = format!(
            r#"<script>var u = unscramble("{alphabet}", 10, 5, "-", "{payload}");</script>"#
        );
        Mock::given(method("GET"))
            .and(path("/embed/espn-us"))
            .respond_with(ResponseTemplate::new(200).set_body_string(embed_html))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/live/espn/index.m3u8"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("#EXTM3U\n#EXTINF:6.0,\nseg.ts\n"),
            )
            .mount(&server)
            .await;

        let manifest = driver_for(&server).attempt(&channel()).await.expect("manifest");
        assert!(manifest.source_url.ends_with("token=t9"));
    }

    #[tokio::test]
    async fn embed_without_any_pattern_is_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex("/embed/.*"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>nothing here</html>"))
            .mount(&server)
            .await;

        let result = driver_for(&server).attempt(&channel()).await;
        assert!(matches!(result, Err(DriverError::Auth(_))));
    }

    #[tokio::test]
    async fn second_attempt_reuses_cached_playback_url() {
        let server = MockServer::start().await;
        let embed_html = format!(
            r#"source: "{}/live/espn/index.m3u8?token=abc""#,
            server.uri()
        );
        Mock::given(method("GET"))
            .and(path("/embed/espn-us"))
            .respond_with(ResponseTemplate::new(200).set_body_string(embed_html))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/live/espn/index.m3u8"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("#EXTM3U\n#EXTINF:6.0,\nseg.ts\n"),
            )
            .mount(&server)
            .await;

        let driver = driver_for(&server);
        driver.attempt(&channel()).await.expect("first");
        driver.attempt(&channel()).await.expect("second");
    }
}
