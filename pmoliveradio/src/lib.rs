//! # pmoliveradio - Live radio player with primary/fallback failover
//!
//! Plays a live MP3 stream, preferring a PRIMARY (regional) endpoint and
//! switching to an always-available FALLBACK when PRIMARY is unreachable or
//! dies. While on FALLBACK, PRIMARY is probed periodically and playback
//! moves back to it as soon as it answers.
//!
//! ## Architecture
//!
//! ```text
//!                 commands            PlaybackState (watch)
//!  RadioPlayer ────────────▶ task ────────────────────────▶ UI
//!                             │
//!                     FailoverController ──▶ StreamProber (disposable probes)
//!                             │                    ▲
//!                             │             RecoveryTask (every 30s on FALLBACK)
//!                      PlaybackEngine
//!                             │
//!                      MediaBackend (the single audio output)
//! ```
//!
//! - [`StreamProber`]: answers "is this URL streamable?" within a timeout,
//!   never fails.
//! - [`PlaybackEngine`]: owns the [`MediaBackend`], runs an explicit state
//!   machine and reports one [`EngineStatus`] per condition.
//! - [`FailoverController`]: the policy; picks the endpoint, fails over,
//!   recovers, discards stale results.
//! - [`RadioPlayer`]: the handle the UI layer holds.
//!
//! ## Quick start
//!
//! ```no_run
//! use pmoliveradio::{
//!     FailoverSettings, HttpStreamBackend, HttpStreamProber, NullSink, RadioPlayer,
//!     StreamEndpoints,
//! };
//! use std::sync::Arc;
//!
//! # async fn run() -> pmoliveradio::Result<()> {
//! let backend = HttpStreamBackend::new(Arc::new(NullSink))?;
//! let prober = HttpStreamProber::new()?;
//! let player = RadioPlayer::spawn(
//!     backend,
//!     StreamEndpoints::default(),
//!     Arc::new(prober),
//!     FailoverSettings::default(),
//! );
//!
//! let state = player.toggle_play().await;
//! println!("{} (loading: {})", state.active_endpoint.indicator(), state.is_loading);
//!
//! player.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config_ext;
pub mod controller;
mod decode;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod player;
pub mod prober;
pub mod recovery;
pub mod schedule;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{
    HttpBackendBuilder, HttpStreamBackend, MediaBackend, MediaEvent, NullSink, PcmFrame, PcmSink,
    SourceId,
};
#[cfg(feature = "cpal")]
pub use backend::CpalSink;
pub use config_ext::LiveRadioConfigExt;
pub use controller::{FailoverController, FailoverSettings};
pub use endpoint::{EndpointId, StreamEndpoint, StreamEndpoints};
pub use engine::{EngineState, EngineStatus, PlaybackEngine, PlaybackState};
pub use error::{Error, Result};
pub use player::RadioPlayer;
pub use prober::{HttpStreamProber, ProberBuilder, StreamProber};
pub use recovery::RecoveryTask;
pub use schedule::{NextBroadcast, OnAir, ProgramSchedule, ProgramSlot, DEFAULT_TIMEZONE};
