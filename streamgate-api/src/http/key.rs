// Decryption-key proxy route
//
// The upstream key endpoint demands a solved hash puzzle plus the channel's
// signed credential. Browsers cannot attach either, so the gateway fetches
// keys on the player's behalf: solve the puzzle, look up the cached
// credential for the channel key embedded in the URL, forward both, and
// validate that what comes back is an actual AES-128 key.

use std::sync::OnceLock;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
};
use regex::Regex;
use tracing::{debug, warn};

use super::{AppError, AppResult, AppState};

const KEY_TIMEOUT: Duration = Duration::from_secs(10);
const AES_KEY_LEN: usize = 16;

fn channel_key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(premium\d+)").expect("static pattern"))
}

#[derive(Debug, serde::Deserialize)]
pub struct UrlQuery {
    pub url: Option<String>,
}

pub async fn proxy_key(
    State(state): State<AppState>,
    Query(query): Query<UrlQuery>,
) -> AppResult<Response> {
    let url = require_target(&state, query.url)?;

    // The internal channel key rides inside the upstream key URL; it is both
    // the puzzle resource and the handle to the cached credential.
    let channel_key = channel_key_pattern()
        .captures(&url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());
    let credential = channel_key
        .as_deref()
        .and_then(|key| state.broker.credential_for_key(key));
    if credential.is_none() {
        debug!(url, "no cached credential for key fetch, forwarding bare");
    }

    let resource = channel_key.clone().unwrap_or_else(|| url.clone());
    let engine = state.pow.clone();
    let proof = tokio::task::spawn_blocking(move || engine.solve(&resource, 1))
        .await
        .map_err(|_| AppError::bad_gateway("proof-of-work solver panicked"))?
        .ok_or_else(|| AppError::bad_gateway("proof-of-work search exhausted"))?;

    let mut extra_headers = vec![
        ("X-Pow-Timestamp".to_string(), proof.timestamp.to_string()),
        ("X-Pow-Counter".to_string(), proof.counter.to_string()),
        ("X-Pow-Nonce".to_string(), proof.nonce.to_string()),
    ];
    if let Some(credential) = &credential {
        extra_headers.push(("X-Auth-Token".to_string(), credential.token.clone()));
    }

    let primary_base = state.config.upstream.primary_base.trim_end_matches('/');
    let response = state
        .relay
        .fetch_with_headers(
            &url,
            Some(&format!("{primary_base}/")),
            Some(primary_base),
            &extra_headers,
            KEY_TIMEOUT,
        )
        .await
        .map_err(|e| AppError::from_fetch(&e, "key fetch"))?;
    if !response.status().is_success() {
        warn!(url, status = %response.status(), "upstream rejected key fetch");
        return Err(AppError::bad_gateway("upstream rejected the key request"));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| AppError::from_fetch(&e, "key body read"))?;
    // Upstreams serve error pages with 200; a real key is exactly 16 raw
    // bytes and never starts like JSON or HTML.
    if bytes.len() != AES_KEY_LEN || bytes.first().is_some_and(|b| *b == b'{' || *b == b'<') {
        warn!(url, len = bytes.len(), "upstream returned a non-key body");
        return Err(AppError::bad_gateway("upstream returned an invalid key"));
    }

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream"),
            (header::CACHE_CONTROL, "no-cache, no-store"),
        ],
        bytes,
    )
        .into_response())
}

/// Shared validation for the proxy routes: a present, non-empty `url` that
/// passes the destination allow-list.
pub(super) fn require_target(state: &AppState, url: Option<String>) -> Result<String, AppError> {
    let url = url
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| AppError::bad_request("missing url parameter"))?;
    if !state.security.is_allowed_proxy_target(&url) {
        debug!(url, "proxy target denied by destination allow-list");
        return Err(AppError::bad_request("target not allowed"));
    }
    Ok(url)
}
