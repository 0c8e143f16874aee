// Channel resolution route
//
// `GET /?channel=<id>` walks the backend chain and returns the winning
// manifest, rewritten so every URI inside it points back at this gateway.

use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::info;

use streamgate_core::manifest;
use streamgate_core::orchestrator::ResolveOutcome;

use super::{AppError, AppResult, AppState};

pub const MANIFEST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

#[derive(Debug, Deserialize)]
pub struct ChannelQuery {
    pub channel: Option<String>,
}

pub async fn resolve_channel(
    State(state): State<AppState>,
    Query(query): Query<ChannelQuery>,
) -> AppResult<Response> {
    let raw = query
        .channel
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| {
            AppError::bad_request("missing channel parameter")
                .with_hint("request a channel as /?channel=<numeric id>")
        })?;
    let channel_id: u32 = raw.parse().map_err(|_| {
        AppError::bad_request("channel must be a positive integer")
            .with_hint("request a channel as /?channel=<numeric id>")
    })?;

    let channel = state.channels.resolve(channel_id);
    match state.orchestrator.resolve(&channel).await {
        ResolveOutcome::Resolved(fetched) => {
            info!(channel_id, source = %fetched.source_url, "serving rewritten playlist");
            let body = manifest::rewrite(&fetched.body, state.proxy_base(), &fetched.source_url);
            Ok((
                [
                    (header::CONTENT_TYPE, MANIFEST_CONTENT_TYPE),
                    (header::CACHE_CONTROL, "no-cache, no-store"),
                ],
                body,
            )
                .into_response())
        }
        ResolveOutcome::Offline(attempts) => Err(AppError::service_unavailable(
            "channel is not currently streaming",
        )
        .with_hint("the channel exists upstream but has no live feed right now")
        .with_attempts(&attempts)),
        ResolveOutcome::Failed(attempts) => {
            Err(AppError::bad_gateway("no backend could resolve this channel")
                .with_attempts(&attempts))
        }
    }
}
