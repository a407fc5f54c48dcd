//! Media backends: the single real audio output owned by the playback engine
//!
//! A backend turns engine commands into actual network/audio activity and
//! reports low-level [`MediaEvent`]s back, tagged with the [`SourceId`] they
//! belong to. The engine uses that tag to tell events of the current source
//! from late events of a source it already tore down.

use crate::error::Result;
use std::fmt;
use tokio::sync::mpsc;
use url::Url;

pub mod http;
pub mod sink;

#[cfg(feature = "cpal")]
pub mod cpal_sink;

pub use http::{HttpBackendBuilder, HttpStreamBackend};
pub use sink::{NullSink, PcmFrame, PcmSink};

#[cfg(feature = "cpal")]
pub use cpal_sink::CpalSink;

/// Generation number of a configured source
///
/// Incremented by the engine on every `configure` and every teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SourceId(pub u64);

impl SourceId {
    pub fn next(self) -> Self {
        SourceId(self.0 + 1)
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Low-level event reported by a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    /// Audio is flowing to the output
    Playing,
    /// Waiting for data (buffering)
    Waiting,
    /// The source failed (network, decoding, end of a live stream)
    Error(String),
}

/// Channel on which backends report events
pub type MediaEventSender = mpsc::UnboundedSender<(SourceId, MediaEvent)>;

/// Receiving end, consumed by the controller loop
pub type MediaEventReceiver = mpsc::UnboundedReceiver<(SourceId, MediaEvent)>;

/// The audio output resource
///
/// Exactly one backend exists per player and only the playback engine calls
/// it. Commands are synchronous and must not block: network and decoding
/// work runs in tasks the backend owns.
pub trait MediaBackend: Send + 'static {
    /// Attach a new source. Any previous source has already been cleared.
    fn load(&mut self, source: SourceId, url: &Url, events: MediaEventSender);

    /// Start playing the loaded source
    fn play(&mut self, source: SourceId) -> Result<()>;

    /// Abort the current source: cancel network reads, drop buffered audio.
    /// Must not report an error for the abort itself.
    fn clear(&mut self);

    /// Output volume in [0, 1]
    fn set_volume(&mut self, volume: f32);

    /// Release the output for good. Idempotent.
    fn release(&mut self);
}
