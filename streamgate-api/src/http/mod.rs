// Module: http
// Gateway routes and shared state

pub mod cdnlive;
pub mod error;
pub mod health;
pub mod key;
pub mod middleware;
pub mod playlist;
pub mod segment;

use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use streamgate_core::channel::ChannelTable;
use streamgate_core::credential::{CredentialBroker, HttpCredentialSource};
use streamgate_core::driver::{BackendDriver, PrimaryDriver, StaticMapDriver, TokenDriver};
use streamgate_core::orchestrator::Orchestrator;
use streamgate_core::pow::PowEngine;
use streamgate_core::relay::RelayClient;
use streamgate_core::security::{RateLimiter, SecurityPolicy};
use streamgate_core::Config;

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub orchestrator: Arc<Orchestrator>,
    pub channels: Arc<ChannelTable>,
    pub broker: CredentialBroker,
    pub relay: Arc<RelayClient>,
    pub security: Arc<SecurityPolicy>,
    pub segment_limiter: RateLimiter,
    pub pow: PowEngine,
}

impl AppState {
    /// Base URL rewritten playlist URIs point at.
    pub fn proxy_base(&self) -> &str {
        self.config.server.public_base_url.trim_end_matches('/')
    }
}

/// Wire up every component from configuration.
pub fn build_state(config: Config) -> anyhow::Result<AppState> {
    let config = Arc::new(config);
    let relay = Arc::new(RelayClient::new(&config.relay)?);
    let channels = Arc::new(ChannelTable::from_config(&config.upstream));

    let source = Arc::new(HttpCredentialSource::new(relay.clone(), &config.upstream));
    let broker = CredentialBroker::new(source);

    // Priority order: cheapest first, credential-gated last resort.
    let drivers: Vec<Arc<dyn BackendDriver>> = vec![
        Arc::new(StaticMapDriver::new(relay.clone())),
        Arc::new(TokenDriver::new(relay.clone(), &config.upstream)),
        Arc::new(PrimaryDriver::new(
            relay.clone(),
            broker.clone(),
            &config.upstream,
        )),
    ];
    let orchestrator = Arc::new(Orchestrator::new(
        drivers,
        broker.clone(),
        &config.upstream.skip_drivers,
    ));

    let security = Arc::new(SecurityPolicy::new(&config.security));
    let segment_limiter = RateLimiter::new(
        config.security.segment_rate_limit,
        Duration::from_secs(config.security.rate_window_seconds),
    );
    let pow = PowEngine::new(config.pow.clone());

    Ok(AppState {
        config,
        orchestrator,
        channels,
        broker,
        relay,
        security,
        segment_limiter,
        pow,
    })
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(playlist::resolve_channel))
        .route("/key", get(key::proxy_key))
        .route("/segment", get(segment::proxy_segment))
        .route("/cdnlive", get(cdnlive::proxy_nested_manifest))
        .route("/health", get(health::health_check))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::security_gate,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
