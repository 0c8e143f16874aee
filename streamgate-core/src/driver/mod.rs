// Backend driver contract
//
// One driver per upstream acquisition strategy. Drivers are self-contained:
// each catches its own failures into a typed error and the orchestrator
// decides what the aggregate means.

mod primary;
mod static_map;
mod token;

pub use primary::PrimaryDriver;
pub use static_map::StaticMapDriver;
pub use token::TokenDriver;

use async_trait::async_trait;

use crate::channel::Channel;
use crate::manifest::looks_like_playlist;

/// Driver-level errors. `Offline` is kept distinct from the generic upstream
/// failures so the API layer can tell players "not currently live" instead
/// of a blanket error.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("channel not mapped for this backend")]
    NotMapped,

    #[error("upstream unavailable: {0}")]
    Upstream(String),

    #[error("upstream timed out")]
    Timeout,

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("channel exists upstream but is not streaming")]
    Offline,

    #[error("upstream returned a non-playlist body")]
    InvalidPlaylist,
}

impl From<reqwest::Error> for DriverError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Upstream(e.to_string())
        }
    }
}

/// A manifest as fetched from upstream, before rewriting. The source URL is
/// kept so relative URIs can be resolved during the rewrite.
#[derive(Debug, Clone)]
pub struct FetchedManifest {
    pub body: String,
    pub source_url: String,
}

/// One record per driver try, collected for diagnostics.
#[derive(Debug, Clone)]
pub struct BackendAttempt {
    pub backend: String,
    pub detail: String,
}

/// One self-contained strategy for obtaining a working stream.
#[async_trait]
pub trait BackendDriver: Send + Sync {
    /// Stable driver name, also used in the operator skip-list.
    fn name(&self) -> &'static str;

    async fn attempt(&self, channel: &Channel) -> Result<FetchedManifest, DriverError>;
}

/// A 2xx response with the wrong body is still a failure. A playlist frame
/// with no media at all means the channel exists but is not streaming.
pub(crate) fn validate_playlist(body: &str) -> Result<(), DriverError> {
    if looks_like_playlist(body) {
        return Ok(());
    }
    if body.trim_start().starts_with("#EXTM3U") {
        return Err(DriverError::Offline);
    }
    Err(DriverError::InvalidPlaylist)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_real_playlists() {
        assert!(validate_playlist("#EXTM3U\n#EXTINF:6.0,\nseg.ts\n").is_ok());
    }

    #[test]
    fn empty_frame_means_offline() {
        assert!(matches!(
            validate_playlist("#EXTM3U\n#EXT-X-VERSION:3\n"),
            Err(DriverError::Offline)
        ));
    }

    #[test]
    fn html_body_is_invalid() {
        assert!(matches!(
            validate_playlist("<html>403</html>"),
            Err(DriverError::InvalidPlaylist)
        ));
    }
}
