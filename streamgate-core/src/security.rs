//! Request admission policy.
//!
//! Three independent gates, all enforced by the HTTP layer before any
//! upstream work happens: origin/referer allow-listing, destination
//! allow-listing for caller-supplied URLs, and per-client rate limiting on
//! the segment route.

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter as GovernorRateLimiter};
use nonzero_ext::nonzero;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use crate::config::SecurityConfig;

/// Origin and destination policy derived from configuration.
#[derive(Clone)]
pub struct SecurityPolicy {
    allowed_origins: Vec<String>,
    allowed_proxy_domains: Vec<String>,
}

impl SecurityPolicy {
    pub fn new(config: &SecurityConfig) -> Self {
        Self {
            allowed_origins: config
                .allowed_origins
                .iter()
                .map(|o| o.trim_end_matches('/').to_string())
                .collect(),
            allowed_proxy_domains: config
                .allowed_proxy_domains
                .iter()
                .map(|d| d.trim().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    /// Find the allowed origin a request matches, if any. Requests carrying
    /// neither Origin nor Referer are denied: headerless clients are
    /// untrusted, since any scripted caller can strip headers.
    pub fn matched_origin(&self, origin: Option<&str>, referer: Option<&str>) -> Option<&str> {
        if let Some(origin) = origin {
            let origin = origin.trim_end_matches('/');
            return self
                .allowed_origins
                .iter()
                .find(|allowed| allowed.as_str() == origin)
                .map(String::as_str);
        }
        if let Some(referer) = referer {
            return self
                .allowed_origins
                .iter()
                .find(|allowed| {
                    referer == allowed.as_str()
                        || referer.starts_with(&format!("{allowed}/"))
                })
                .map(String::as_str);
        }
        None
    }

    pub fn is_allowed_origin(&self, origin: Option<&str>, referer: Option<&str>) -> bool {
        self.matched_origin(origin, referer).is_some()
    }

    /// Destination check applied before any caller-supplied URL is fetched,
    /// so the proxy routes cannot be used as an open relay. The target host
    /// must be an exact match or a true subdomain of an allow-listed domain;
    /// suffix lookalikes (`notdvalna.ru`) and path tricks
    /// (`evil.com/dvalna.ru`) are rejected.
    pub fn is_allowed_proxy_target(&self, raw: &str) -> bool {
        let Ok(parsed) = url::Url::parse(raw) else {
            return false;
        };
        if !matches!(parsed.scheme(), "http" | "https") {
            return false;
        }
        let Some(host) = parsed.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        self.allowed_proxy_domains.iter().any(|domain| {
            host == *domain || host.ends_with(&format!(".{domain}"))
        })
    }
}

/// Per-client request limiter backed by the governor crate (GCRA). Keys are
/// client identities (IP plus route); each key gets an independent bucket.
/// Stale buckets are pruned by governor itself.
#[derive(Clone)]
pub struct RateLimiter {
    limiter: Arc<DefaultKeyedRateLimiter<String>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        let period = window
            .checked_div(max_requests.max(1))
            .unwrap_or(Duration::from_millis(1));
        let quota = Quota::with_period(period.max(Duration::from_millis(1)))
            .unwrap_or_else(|| Quota::with_period(Duration::from_millis(1)).expect("non-zero"))
            .allow_burst(NonZeroU32::new(max_requests).unwrap_or(nonzero!(1u32)));
        Self {
            limiter: Arc::new(GovernorRateLimiter::keyed(quota)),
        }
    }

    /// Returns `true` when the request is admitted.
    pub fn check(&self, client: &str) -> bool {
        self.limiter.check_key(&client.to_string()).is_ok()
    }
}
