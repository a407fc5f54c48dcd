//! Stream reachability probing
//!
//! A probe is a disposable, side-effect-free check run against a stream URL,
//! independent from the real audio output. It always resolves to a boolean:
//! every failure (network, status, decoding, timeout) means "unreachable".

use crate::decode;
use crate::error::Result;
use futures::StreamExt;
use reqwest::Client;
use std::time::Duration;
use url::Url;

/// Default probe timeout (5 seconds)
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;

/// Upper bound on the bytes read while looking for a first MP3 frame
pub const MAX_PROBE_BYTES: usize = 64 * 1024;

/// Default User-Agent for probes and playback requests
pub const DEFAULT_USER_AGENT: &str = "PMOLiveRadio/0.1.0 (pmoliveradio)";

/// Answers "is this URL currently streamable?"
#[async_trait::async_trait]
pub trait StreamProber: Send + Sync + 'static {
    /// Probe `url`; never fails, unreachable streams resolve to `false`.
    async fn probe(&self, url: &Url) -> bool;
}

/// HTTP decode probe
///
/// Opens its own GET request, reads until a first MP3 frame decodes (or
/// [`MAX_PROBE_BYTES`] were read without one) and drops the connection. The
/// whole exchange is bounded by the probe timeout.
#[derive(Debug, Clone)]
pub struct HttpStreamProber {
    client: Client,
    timeout: Duration,
}

impl HttpStreamProber {
    /// Create a prober with default settings
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Create a builder for configuring the prober
    pub fn builder() -> ProberBuilder {
        ProberBuilder::default()
    }

    async fn probe_inner(&self, url: &Url) -> std::result::Result<bool, reqwest::Error> {
        let response = self.client.get(url.clone()).send().await?;
        if !response.status().is_success() {
            tracing::debug!(url = %url, status = %response.status(), "Probe got non-success status");
            return Ok(false);
        }

        let mut body = response.bytes_stream();
        let mut buffer = Vec::new();
        while let Some(chunk) = body.next().await {
            buffer.extend_from_slice(&chunk?);
            if decode::first_frame(&buffer).is_some() {
                return Ok(true);
            }
            if buffer.len() >= MAX_PROBE_BYTES {
                tracing::debug!(url = %url, bytes = buffer.len(), "No MP3 frame found");
                return Ok(false);
            }
        }

        Ok(false)
    }
}

#[async_trait::async_trait]
impl StreamProber for HttpStreamProber {
    async fn probe(&self, url: &Url) -> bool {
        // The response (and its connection) lives inside `probe_inner`, so it
        // is dropped on whichever exit path fires first.
        let reachable = match tokio::time::timeout(self.timeout, self.probe_inner(url)).await {
            Ok(Ok(reachable)) => reachable,
            Ok(Err(e)) => {
                tracing::debug!(url = %url, error = %e, "Probe failed");
                false
            }
            Err(_) => {
                tracing::debug!(url = %url, timeout = ?self.timeout, "Probe timed out");
                false
            }
        };
        tracing::debug!(url = %url, reachable, "Probe finished");
        reachable
    }
}

/// Builder for [`HttpStreamProber`]
#[derive(Debug)]
pub struct ProberBuilder {
    client: Option<Client>,
    timeout: Duration,
    user_agent: String,
}

impl Default for ProberBuilder {
    fn default() -> Self {
        Self {
            client: None,
            timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ProberBuilder {
    /// Set a custom HTTP client
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Set the probe timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set a custom User-Agent header
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Build the prober
    pub fn build(self) -> Result<HttpStreamProber> {
        let client = match self.client {
            Some(client) => client,
            None => Client::builder().user_agent(&self.user_agent).build()?,
        };
        Ok(HttpStreamProber {
            client,
            timeout: self.timeout,
        })
    }
}
