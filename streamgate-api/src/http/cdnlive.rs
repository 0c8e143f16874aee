// Nested manifest proxy route
//
// Master playlists point at variant playlists on other upstream hosts; those
// land here. The body is rewritten like the top-level playlist so the chain
// of indirection always terminates at this gateway.

use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
};
use tracing::debug;

use streamgate_core::manifest;

use super::key::{require_target, UrlQuery};
use super::playlist::MANIFEST_CONTENT_TYPE;
use super::{AppError, AppResult, AppState};

const NESTED_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn proxy_nested_manifest(
    State(state): State<AppState>,
    Query(query): Query<UrlQuery>,
) -> AppResult<Response> {
    let url = require_target(&state, query.url)?;

    let response = state
        .relay
        .fetch(&url, None, None, NESTED_TIMEOUT)
        .await
        .map_err(|e| AppError::from_fetch(&e, "nested manifest fetch"))?;
    if !response.status().is_success() {
        debug!(url, status = %response.status(), "upstream nested manifest fetch failed");
        return Err(AppError::bad_gateway("upstream manifest fetch failed"));
    }

    let body = response
        .text()
        .await
        .map_err(|e| AppError::from_fetch(&e, "nested manifest body read"))?;
    let rewritten = manifest::rewrite(&body, state.proxy_base(), &url);

    Ok((
        [
            (header::CONTENT_TYPE, MANIFEST_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache, no-store"),
        ],
        rewritten,
    )
        .into_response())
}
