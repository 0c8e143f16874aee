//! Driver A: static direct-URL mapping, no authentication.
//!
//! Cheapest strategy, tried first. Channels with a precomputed manifest URL
//! are fetched directly; everything else is unmapped here.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{validate_playlist, BackendDriver, DriverError, FetchedManifest};
use crate::channel::Channel;
use crate::relay::RelayClient;

const FETCH_TIMEOUT: Duration = Duration::from_secs(8);

pub struct StaticMapDriver {
    relay: Arc<RelayClient>,
}

impl StaticMapDriver {
    pub fn new(relay: Arc<RelayClient>) -> Self {
        Self { relay }
    }
}

#[async_trait]
impl BackendDriver for StaticMapDriver {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn attempt(&self, channel: &Channel) -> Result<FetchedManifest, DriverError> {
        let url = channel.direct_url.as_deref().ok_or(DriverError::NotMapped)?;

        let response = self.relay.fetch(url, None, None, FETCH_TIMEOUT).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DriverError::Upstream(format!(
                "direct manifest returned {status}"
            )));
        }

        let body = response.text().await?;
        validate_playlist(&body)?;

        Ok(FetchedManifest {
            body,
            source_url: url.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn driver() -> StaticMapDriver {
        StaticMapDriver::new(Arc::new(
            RelayClient::new(&RelayConfig { endpoint: None }).expect("client"),
        ))
    }

    fn channel_with_url(url: String) -> Channel {
        Channel {
            public_id: 1,
            direct_url: Some(url),
            ..Channel::default()
        }
    }

    #[tokio::test]
    async fn unmapped_channel_fails_fast() {
        let result = driver().attempt(&Channel::default()).await;
        assert!(matches!(result, Err(DriverError::NotMapped)));
    }

    #[tokio::test]
    async fn fetches_and_validates_manifest() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ch1.m3u8"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("#EXTM3U\n#EXTINF:6.0,\nseg.ts\n"),
            )
            .mount(&server)
            .await;

        let manifest = driver()
            .attempt(&channel_with_url(format!("{}/ch1.m3u8", server.uri())))
            .await
            .expect("manifest");
        assert!(manifest.body.starts_with("#EXTM3U"));
        assert!(manifest.source_url.ends_with("/ch1.m3u8"));
    }

    #[tokio::test]
    async fn wrong_body_with_200_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ch1.m3u8"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>soon</html>"))
            .mount(&server)
            .await;

        let result = driver()
            .attempt(&channel_with_url(format!("{}/ch1.m3u8", server.uri())))
            .await;
        assert!(matches!(result, Err(DriverError::InvalidPlaylist)));
    }

    #[tokio::test]
    async fn upstream_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ch1.m3u8"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = driver()
            .attempt(&channel_with_url(format!("{}/ch1.m3u8", server.uri())))
            .await;
        assert!(matches!(result, Err(DriverError::Upstream(_))));
    }
}
