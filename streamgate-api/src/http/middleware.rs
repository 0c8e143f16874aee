// Security gate middleware
//
// Runs before every handler: resolves the caller's origin against the
// allow-list, answers preflights, denies unmatched callers, and stamps CORS
// headers on whatever the handler returns. The segment route is exempt from
// the origin check because native players fetch media without browser
// headers; it is covered by rate limiting instead.

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use super::{AppError, AppState};

pub async fn security_gate(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let origin = header_str(&request, header::ORIGIN);
    let referer = header_str(&request, header::REFERER);
    let matched = state
        .security
        .matched_origin(origin.as_deref(), referer.as_deref())
        .map(str::to_string);

    if request.method() == Method::OPTIONS {
        return preflight(matched);
    }

    if request.uri().path() != "/segment" && matched.is_none() {
        debug!(
            path = request.uri().path(),
            origin = origin.as_deref().unwrap_or("-"),
            referer = referer.as_deref().unwrap_or("-"),
            "request denied by origin policy"
        );
        return AppError::forbidden("origin not allowed").into_response();
    }

    let mut response = next.run(request).await;
    if let Some(origin) = matched {
        apply_cors(response.headers_mut(), &origin);
    }
    response
}

/// Preflight response. Only a matched origin gets the CORS grant; a wildcard
/// is never emitted because responses carry credentials.
fn preflight(matched: Option<String>) -> Response {
    let Some(origin) = matched else {
        return AppError::forbidden("origin not allowed").into_response();
    };
    let mut response = StatusCode::NO_CONTENT.into_response();
    let headers = response.headers_mut();
    apply_cors(headers, &origin);
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Range"),
    );
    headers.insert(
        header::ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static("86400"),
    );
    response
}

fn apply_cors(headers: &mut axum::http::HeaderMap, origin: &str) {
    if let Ok(value) = HeaderValue::from_str(origin) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
        // Responses differ per origin, so shared caches must key on it.
        headers.insert(header::VARY, HeaderValue::from_static("Origin"));
    }
}

fn header_str(request: &Request, name: header::HeaderName) -> Option<String> {
    request
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
