//! Core library for the streamgate live-TV gateway.
//!
//! Turns a set of inconsistent upstream stream providers into one stable HLS
//! surface. The HTTP layer lives in `streamgate-api`; everything here is
//! plain domain logic: backend drivers, fallback orchestration, credential
//! negotiation, playlist rewriting, and the security policy the API layer
//! enforces.

pub mod cache;
pub mod channel;
pub mod cipher;
pub mod config;
pub mod credential;
pub mod driver;
pub mod logging;
pub mod manifest;
pub mod orchestrator;
pub mod pow;
pub mod relay;
pub mod security;

pub use config::Config;
