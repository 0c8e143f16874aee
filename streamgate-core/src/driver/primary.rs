//! Driver C: the credential-gated primary provider.
//!
//! Last resort, most capable. Obtains a signed credential from the broker,
//! builds a candidate list of internal channel keys (static mapping,
//! credential-derived, legacy naming convention), and for each candidate
//! asks the provider's discovery endpoint which server carries the stream.
//! When discovery lies or fails, the full known-server list is brute-forced
//! in parallel batches of three. Working (key, server) pairs are cached so
//! the brute force is skipped next time.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use tracing::debug;

use super::{validate_playlist, BackendDriver, DriverError, FetchedManifest};
use crate::cache::TtlCache;
use crate::channel::Channel;
use crate::credential::{Credential, CredentialBroker};
use crate::relay::RelayClient;

const SERVER_KEY_TTL: Duration = Duration::from_secs(600);
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(4);
const MANIFEST_TIMEOUT: Duration = Duration::from_secs(10);
const BRUTE_FORCE_BATCH: usize = 3;

#[derive(Deserialize)]
struct ServerLookup {
    server_key: String,
}

pub struct PrimaryDriver {
    relay: Arc<RelayClient>,
    broker: CredentialBroker,
    primary_base: String,
    server_lookup_path: String,
    stream_domain: String,
    stream_base: Option<String>,
    known_servers: Vec<String>,
    server_keys: TtlCache<String, String>,
}

impl PrimaryDriver {
    pub fn new(
        relay: Arc<RelayClient>,
        broker: CredentialBroker,
        config: &crate::config::UpstreamConfig,
    ) -> Self {
        Self {
            relay,
            broker,
            primary_base: config.primary_base.trim_end_matches('/').to_string(),
            server_lookup_path: config.server_lookup_path.clone(),
            stream_domain: config.primary_stream_domain.clone(),
            stream_base: config
                .primary_stream_base
                .as_ref()
                .map(|b| b.trim_end_matches('/').to_string()),
            known_servers: config.known_servers.clone(),
            server_keys: TtlCache::new(SERVER_KEY_TTL, 1024),
        }
    }

    fn manifest_url(&self, server: &str, channel_key: &str) -> String {
        match &self.stream_base {
            Some(base) => format!("{base}/{server}/{channel_key}/mono.m3u8"),
            None => format!(
                "https://{server}.{}/{server}/{channel_key}/mono.m3u8",
                self.stream_domain
            ),
        }
    }

    /// Internal keys worth trying, in order of confidence.
    fn candidate_keys(&self, channel: &Channel, credential: &Credential) -> Vec<String> {
        let mut keys = Vec::new();
        if let Some(key) = &channel.provider_key {
            keys.push(key.clone());
        }
        if !keys.contains(&credential.channel_key) {
            keys.push(credential.channel_key.clone());
        }
        let legacy = format!("premium{}", channel.public_id);
        if !keys.contains(&legacy) {
            keys.push(legacy);
        }
        keys
    }

    async fn discover_server(&self, channel_key: &str) -> Result<String, DriverError> {
        let url = format!(
            "{}{}?channel_id={channel_key}",
            self.primary_base, self.server_lookup_path
        );
        let response = self
            .relay
            .fetch(&url, Some(&format!("{}/", self.primary_base)), None, DISCOVERY_TIMEOUT)
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DriverError::Upstream(format!("server lookup returned {status}")));
        }
        let lookup: ServerLookup = response
            .json()
            .await
            .map_err(|e| DriverError::Upstream(format!("server lookup body: {e}")))?;
        Ok(lookup.server_key)
    }

    async fn try_server(
        &self,
        server: &str,
        channel_key: &str,
        credential: &Credential,
    ) -> Result<FetchedManifest, DriverError> {
        let mut url = self.manifest_url(server, channel_key);
        url.push_str(&format!("?auth={}", credential.token));

        let response = self
            .relay
            .fetch(
                &url,
                Some(&format!("{}/", self.primary_base)),
                Some(&self.primary_base),
                MANIFEST_TIMEOUT,
            )
            .await?;
        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(DriverError::Auth(format!("stream server rejected credential: {status}")));
        }
        if !status.is_success() {
            return Err(DriverError::Upstream(format!("stream server returned {status}")));
        }
        let body = response.text().await?;
        validate_playlist(&body)?;
        Ok(FetchedManifest {
            body,
            source_url: url,
        })
    }

    /// Try every known server in fixed-size parallel batches, accepting the
    /// first genuine playlist. Batching bounds worst-case latency without
    /// unbounded fan-out against the upstream.
    async fn brute_force(
        &self,
        channel_key: &str,
        credential: &Credential,
        saw_offline: &mut bool,
    ) -> Option<FetchedManifest> {
        for batch in self.known_servers.chunks(BRUTE_FORCE_BATCH) {
            let attempts = join_all(
                batch
                    .iter()
                    .map(|server| self.try_server(server, channel_key, credential)),
            )
            .await;
            for (server, outcome) in batch.iter().zip(attempts) {
                match outcome {
                    Ok(manifest) => {
                        debug!(channel_key, server, "stream server found by brute force");
                        self.server_keys
                            .insert(channel_key.to_string(), server.clone());
                        return Some(manifest);
                    }
                    Err(DriverError::Offline) => *saw_offline = true,
                    Err(e) => debug!(channel_key, server, error = %e, "server candidate failed"),
                }
            }
        }
        None
    }
}

#[async_trait]
impl BackendDriver for PrimaryDriver {
    fn name(&self) -> &'static str {
        "primary"
    }

    async fn attempt(&self, channel: &Channel) -> Result<FetchedManifest, DriverError> {
        let credential = self
            .broker
            .fetch_credential(channel.public_id)
            .await
            .ok_or_else(|| DriverError::Auth("credential unavailable".to_string()))?;

        let mut saw_offline = false;

        for channel_key in self.candidate_keys(channel, &credential) {
            // A previously working server skips discovery and brute force.
            if let Some(server) = self.server_keys.get(&channel_key) {
                match self.try_server(&server, &channel_key, &credential).await {
                    Ok(manifest) => return Ok(manifest),
                    Err(DriverError::Offline) => saw_offline = true,
                    Err(e) => {
                        debug!(channel_key, server, error = %e, "cached server went stale");
                        self.server_keys.invalidate(&channel_key);
                    }
                }
            }

            match self.discover_server(&channel_key).await {
                Ok(server) => match self.try_server(&server, &channel_key, &credential).await {
                    Ok(manifest) => {
                        self.server_keys.insert(channel_key.clone(), server);
                        return Ok(manifest);
                    }
                    Err(DriverError::Offline) => saw_offline = true,
                    Err(e) => {
                        debug!(channel_key, server, error = %e, "discovered server failed")
                    }
                },
                Err(e) => debug!(channel_key, error = %e, "server discovery failed"),
            }

            if let Some(manifest) = self
                .brute_force(&channel_key, &credential, &mut saw_offline)
                .await
            {
                return Ok(manifest);
            }
        }

        if saw_offline {
            return Err(DriverError::Offline);
        }
        Err(DriverError::Upstream(
            "no candidate key produced a playlist on any server".to_string(),
        ))
    }
}
