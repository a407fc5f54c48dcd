//! Playback engine: single owner of the audio output
//!
//! The engine translates commands into backend calls and low-level
//! [`MediaEvent`]s into a normalized [`EngineStatus`], following an explicit
//! state machine:
//!
//! ```text
//! STOPPED --play--> LOADING --playing--> PLAYING --stop--> STOPPED
//!                      |  ^                 |
//!                      |  +----waiting------+
//!                      +------error---------+--> ERRORED
//! ```
//!
//! Every configured source gets a fresh [`SourceId`]. Events tagged with an
//! older id come from a source the engine already tore down (a deliberate
//! stop or a switch) and are dropped: that is how a self-inflicted abort is
//! told apart from a stream that died.

use crate::backend::{MediaBackend, MediaEvent, MediaEventReceiver, MediaEventSender, SourceId};
use crate::endpoint::{EndpointId, StreamEndpoint};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Default output volume
pub const DEFAULT_VOLUME: f32 = 0.8;

/// Engine state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Stopped,
    Loading,
    Playing,
    Errored,
}

/// Normalized status reported to the controller, once per condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineStatus {
    /// Audio is flowing
    Playing,
    /// Buffering after having played, not yet fatal
    Stalled,
    /// The current source is dead
    EndedWithError(String),
}

/// State observed by the UI layer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub is_playing: bool,
    pub is_loading: bool,
    pub volume: f32,
    pub active_endpoint: EndpointId,
}

impl PlaybackState {
    fn new(volume: f32) -> Self {
        Self {
            is_playing: false,
            is_loading: false,
            volume: volume.clamp(0.0, 1.0),
            active_endpoint: EndpointId::Primary,
        }
    }
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self::new(DEFAULT_VOLUME)
    }
}

/// Transition table of the engine
///
/// Returns the next state and the status to report, if any. Events reaching
/// a stopped or errored engine change nothing.
pub fn transition(state: EngineState, event: &MediaEvent) -> (EngineState, Option<EngineStatus>) {
    use EngineState::*;
    match (state, event) {
        (Stopped, _) | (Errored, _) => (state, None),
        (Loading, MediaEvent::Playing) => (Playing, Some(EngineStatus::Playing)),
        (Playing, MediaEvent::Playing) => (Playing, None),
        (Loading, MediaEvent::Waiting) => (Loading, None),
        (Playing, MediaEvent::Waiting) => (Loading, Some(EngineStatus::Stalled)),
        (Loading, MediaEvent::Error(msg)) | (Playing, MediaEvent::Error(msg)) => {
            (Errored, Some(EngineStatus::EndedWithError(msg.clone())))
        }
    }
}

/// The playback engine
pub struct PlaybackEngine<B: MediaBackend> {
    backend: B,
    state: EngineState,
    playback: PlaybackState,
    source: SourceId,
    configured: bool,
    events: MediaEventSender,
    released: bool,
}

impl<B: MediaBackend> PlaybackEngine<B> {
    /// Take ownership of the audio output
    ///
    /// Returns the engine and the receiver on which the backend's events
    /// arrive; feed them back through [`handle_event`](Self::handle_event).
    pub fn new(mut backend: B, volume: f32) -> (Self, MediaEventReceiver) {
        let (events, rx) = mpsc::unbounded_channel();
        let playback = PlaybackState::new(volume);
        backend.set_volume(playback.volume);
        let engine = Self {
            backend,
            state: EngineState::Stopped,
            playback,
            source: SourceId::default(),
            configured: false,
            events,
            released: false,
        };
        (engine, rx)
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn playback(&self) -> &PlaybackState {
        &self.playback
    }

    /// Id of the source currently attached
    pub fn source(&self) -> SourceId {
        self.source
    }

    /// Register listening intent before any source is chosen
    ///
    /// The UI shows a loading indicator while the controller picks an
    /// endpoint.
    pub fn begin_session(&mut self) {
        self.playback.is_playing = true;
        self.playback.is_loading = true;
    }

    /// Point the output at `endpoint`
    ///
    /// Tears down the previous source first, so a live switch never plays
    /// two streams at once. Listening intent is left untouched.
    pub fn configure(&mut self, endpoint: &StreamEndpoint) -> SourceId {
        self.teardown_source();
        self.source = self.source.next();
        self.configured = true;
        self.backend
            .load(self.source, &endpoint.url, self.events.clone());
        self.backend.set_volume(self.playback.volume);
        self.playback.active_endpoint = endpoint.id;
        if self.state != EngineState::Stopped {
            self.state = EngineState::Loading;
        }
        if self.playback.is_playing {
            self.playback.is_loading = true;
        }
        tracing::debug!(source = %self.source, endpoint = %endpoint.id, url = %endpoint.url, "Source configured");
        self.source
    }

    /// Start playing the configured source
    ///
    /// On error the engine is left ERRORED; the caller applies its failure
    /// policy exactly as for an error event.
    pub fn play(&mut self) -> Result<()> {
        self.playback.is_playing = true;
        self.playback.is_loading = true;
        self.state = EngineState::Loading;
        if !self.configured {
            self.state = EngineState::Errored;
            return Err(crate::Error::backend("no source configured"));
        }
        if let Err(e) = self.backend.play(self.source) {
            self.state = EngineState::Errored;
            return Err(e);
        }
        Ok(())
    }

    /// Deliberate halt requested by the user
    ///
    /// Idempotent. Any error the abort provokes arrives tagged with a stale
    /// source id and is ignored.
    pub fn stop(&mut self) {
        self.halt();
        self.playback.active_endpoint = EndpointId::Primary;
    }

    /// Halt after a terminal failure, keeping the last active endpoint
    pub fn halt(&mut self) {
        self.teardown_source();
        self.state = EngineState::Stopped;
        self.playback.is_playing = false;
        self.playback.is_loading = false;
    }

    /// Set the output volume, clamped to [0, 1]
    pub fn set_volume(&mut self, volume: f32) {
        let volume = if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) };
        self.playback.volume = volume;
        self.backend.set_volume(volume);
    }

    /// Feed one backend event through the state machine
    pub fn handle_event(&mut self, source: SourceId, event: MediaEvent) -> Option<EngineStatus> {
        if source != self.source || !self.configured {
            tracing::trace!(source = %source, current = %self.source, ?event, "Ignoring stale media event");
            return None;
        }

        let (next, status) = transition(self.state, &event);
        self.state = next;
        match status {
            Some(EngineStatus::Playing) => self.playback.is_loading = false,
            Some(EngineStatus::Stalled) => self.playback.is_loading = true,
            _ => {}
        }
        status
    }

    /// Release the audio output. Idempotent; also run on drop.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.halt();
        self.backend.release();
        self.released = true;
    }

    fn teardown_source(&mut self) {
        if self.configured {
            self.backend.clear();
            self.configured = false;
            // Anything still in flight for the old source is now stale.
            self.source = self.source.next();
        }
    }
}

impl<B: MediaBackend> Drop for PlaybackEngine<B> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::StreamEndpoints;
    use crate::testing::{BackendCall, FakeBackend};

    fn engine() -> (PlaybackEngine<FakeBackend>, FakeBackend) {
        let backend = FakeBackend::default();
        let (engine, _rx) = PlaybackEngine::new(backend.clone(), 0.8);
        (engine, backend)
    }

    #[test]
    fn test_transition_table() {
        use EngineState::*;
        let err = MediaEvent::Error("boom".into());
        assert_eq!(transition(Stopped, &MediaEvent::Playing), (Stopped, None));
        assert_eq!(transition(Stopped, &err), (Stopped, None));
        assert_eq!(
            transition(Loading, &MediaEvent::Playing),
            (Playing, Some(EngineStatus::Playing))
        );
        assert_eq!(transition(Playing, &MediaEvent::Playing), (Playing, None));
        assert_eq!(transition(Loading, &MediaEvent::Waiting), (Loading, None));
        assert_eq!(
            transition(Playing, &MediaEvent::Waiting),
            (Loading, Some(EngineStatus::Stalled))
        );
        assert_eq!(
            transition(Playing, &err),
            (Errored, Some(EngineStatus::EndedWithError("boom".into())))
        );
        assert_eq!(transition(Errored, &err), (Errored, None));
    }

    #[test]
    fn test_play_reaches_playing_on_event() {
        let (mut engine, _backend) = engine();
        let endpoints = StreamEndpoints::default();
        let source = engine.configure(endpoints.primary());
        engine.play().unwrap();
        assert_eq!(engine.state(), EngineState::Loading);
        assert!(engine.playback().is_loading);

        assert_eq!(
            engine.handle_event(source, MediaEvent::Playing),
            Some(EngineStatus::Playing)
        );
        assert_eq!(engine.state(), EngineState::Playing);
        assert!(engine.playback().is_playing);
        assert!(!engine.playback().is_loading);
    }

    #[test]
    fn test_stop_is_idempotent_and_swallows_abort_errors() {
        let (mut engine, backend) = engine();
        let endpoints = StreamEndpoints::default();
        let source = engine.configure(endpoints.fallback());
        engine.play().unwrap();
        engine.handle_event(source, MediaEvent::Playing);

        engine.stop();
        engine.stop();
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(!engine.playback().is_playing);
        assert!(!engine.playback().is_loading);
        assert_eq!(engine.playback().active_endpoint, EndpointId::Primary);
        assert_eq!(backend.count(|c| matches!(c, BackendCall::Clear)), 1);

        // The aborted read reports an error afterwards: not a stream failure.
        assert_eq!(
            engine.handle_event(source, MediaEvent::Error("aborted".into())),
            None
        );
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[test]
    fn test_configure_tears_down_previous_source() {
        let (mut engine, backend) = engine();
        let endpoints = StreamEndpoints::default();
        let first = engine.configure(endpoints.primary());
        engine.play().unwrap();
        engine.handle_event(first, MediaEvent::Playing);

        let second = engine.configure(endpoints.fallback());
        assert_ne!(first, second);
        assert_eq!(engine.state(), EngineState::Loading);
        assert!(engine.playback().is_playing);
        assert!(engine.playback().is_loading);
        assert_eq!(engine.playback().active_endpoint, EndpointId::Fallback);

        let calls = backend.calls();
        let clear = calls.iter().position(|c| matches!(c, BackendCall::Clear)).unwrap();
        let second_load = calls
            .iter()
            .rposition(|c| matches!(c, BackendCall::Load(..)))
            .unwrap();
        assert!(clear < second_load);

        // Late events of the first source are ignored.
        assert_eq!(engine.handle_event(first, MediaEvent::Error("x".into())), None);
    }

    #[test]
    fn test_stalled_reported_once() {
        let (mut engine, _backend) = engine();
        let source = engine.configure(StreamEndpoints::default().primary());
        engine.play().unwrap();
        engine.handle_event(source, MediaEvent::Playing);
        assert_eq!(
            engine.handle_event(source, MediaEvent::Waiting),
            Some(EngineStatus::Stalled)
        );
        assert!(engine.playback().is_loading);
        assert_eq!(engine.handle_event(source, MediaEvent::Waiting), None);
        assert_eq!(
            engine.handle_event(source, MediaEvent::Playing),
            Some(EngineStatus::Playing)
        );
    }

    #[test]
    fn test_volume_clamped_and_reapplied_on_configure() {
        let (mut engine, backend) = engine();
        engine.set_volume(1.5);
        assert_eq!(engine.playback().volume, 1.0);
        engine.set_volume(0.3);
        engine.configure(StreamEndpoints::default().primary());
        assert_eq!(engine.playback().volume, 0.3);
        assert_eq!(backend.volume(), 0.3);
    }

    #[test]
    fn test_play_without_source_errors() {
        let (mut engine, _backend) = engine();
        assert!(engine.play().is_err());
        assert_eq!(engine.state(), EngineState::Errored);
    }

    #[test]
    fn test_release_runs_once() {
        let (mut engine, backend) = engine();
        engine.release();
        engine.release();
        drop(engine);
        assert_eq!(backend.count(|c| matches!(c, BackendCall::Release)), 1);
    }
}
