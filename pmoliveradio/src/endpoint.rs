//! The two fixed stream endpoints

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Default base URL the relative primary path is resolved against
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";

/// Primary stream path, proxied by the web application to the Icecast source
pub const DEFAULT_PRIMARY_PATH: &str = "/stream/baleares";

/// Fallback stream, used verbatim
pub const DEFAULT_FALLBACK_URL: &str =
    "https://28513.live.streamtheworld.com/RADIOMARCA_NACIONAL.mp3";

/// Logical identity of a stream endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointId {
    /// Preferred regional live stream
    #[default]
    Primary,
    /// Always-available backup stream
    Fallback,
}

impl EndpointId {
    /// Label shown next to the player while it is on air
    pub fn indicator(&self) -> &'static str {
        match self {
            EndpointId::Primary => "Live",
            EndpointId::Fallback => "Backup feed",
        }
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointId::Primary => f.write_str("primary"),
            EndpointId::Fallback => f.write_str("fallback"),
        }
    }
}

/// A stream endpoint: identity plus resolved URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEndpoint {
    pub id: EndpointId,
    pub url: Url,
}

/// The pair of endpoints configured at startup
///
/// Immutable once built; the controller only ever reads it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEndpoints {
    primary: StreamEndpoint,
    fallback: StreamEndpoint,
}

impl StreamEndpoints {
    /// Build the endpoints from already resolved URLs
    pub fn new(primary: Url, fallback: Url) -> Self {
        Self {
            primary: StreamEndpoint {
                id: EndpointId::Primary,
                url: primary,
            },
            fallback: StreamEndpoint {
                id: EndpointId::Fallback,
                url: fallback,
            },
        }
    }

    /// Resolve the endpoints from their configured form
    ///
    /// `primary` may be relative (it is then joined onto `base_url`, the way
    /// the web application proxies it) or absolute. `fallback` must be
    /// absolute.
    pub fn resolve(base_url: &str, primary: &str, fallback: &str) -> Result<Self> {
        let primary = match Url::parse(primary) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(base_url)?.join(primary)?,
            Err(e) => return Err(e.into()),
        };
        let fallback = Url::parse(fallback)?;
        Ok(Self::new(primary, fallback))
    }

    pub fn primary(&self) -> &StreamEndpoint {
        &self.primary
    }

    pub fn fallback(&self) -> &StreamEndpoint {
        &self.fallback
    }

    /// Endpoint for a logical identity
    pub fn get(&self, id: EndpointId) -> &StreamEndpoint {
        match id {
            EndpointId::Primary => &self.primary,
            EndpointId::Fallback => &self.fallback,
        }
    }
}

impl Default for StreamEndpoints {
    fn default() -> Self {
        // The defaults are compile-time constants known to parse.
        Self::resolve(DEFAULT_BASE_URL, DEFAULT_PRIMARY_PATH, DEFAULT_FALLBACK_URL)
            .unwrap_or_else(|e| unreachable!("default stream endpoints are valid: {e}"))
    }
}
