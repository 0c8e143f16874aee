// Media segment proxy route
//
// Highest-volume route in the system: every few seconds per viewer. Origin
// checks are skipped here (native players strip browser headers), so the
// per-client rate limit is the admission control, and it runs before the
// destination check so hammering costs nothing upstream.

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, Query, Request, State},
    http::header,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use super::key::{require_target, UrlQuery};
use super::{AppError, AppResult, AppState};

const SEGMENT_TIMEOUT: Duration = Duration::from_secs(25);

pub async fn proxy_segment(
    State(state): State<AppState>,
    Query(query): Query<UrlQuery>,
    request: Request,
) -> AppResult<Response> {
    let client = client_identity(&request);
    if !state.segment_limiter.check(&client) {
        warn!(client, "segment request rate limited");
        return Err(AppError::too_many_requests("too many segment requests")
            .with_hint("slow down; live segments arrive every few seconds"));
    }

    let url = require_target(&state, query.url)?;

    let response = state
        .relay
        .fetch(&url, None, None, SEGMENT_TIMEOUT)
        .await
        .map_err(|e| AppError::from_fetch(&e, "segment fetch"))?;
    if !response.status().is_success() {
        debug!(url, status = %response.status(), "upstream segment fetch failed");
        return Err(AppError::bad_gateway("upstream segment fetch failed"));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| AppError::from_fetch(&e, "segment body read"))?;

    // Segments are immutable once published; a short shared-cache window
    // absorbs players re-fetching the same segment.
    Ok((
        [
            (header::CONTENT_TYPE, "video/mp2t"),
            (header::CACHE_CONTROL, "public, max-age=90"),
        ],
        bytes,
    )
        .into_response())
}

/// Client identity for rate-limit bucketing: proxy-reported address first,
/// then the socket peer, then a shared fallback bucket.
fn client_identity(request: &Request) -> String {
    if let Some(forwarded) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return forwarded.to_string();
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
