//! Failover policy
//!
//! The [`FailoverController`] decides which endpoint the engine plays:
//!
//! - starting a session probes PRIMARY; a reachable PRIMARY is played,
//!   otherwise FALLBACK is played without being probed;
//! - PRIMARY failing during playback switches straight to FALLBACK;
//! - FALLBACK failing ends the session (no automatic retry);
//! - while FALLBACK plays, a [`RecoveryTask`] probes PRIMARY periodically and
//!   the first success switches back.
//!
//! Deferred results (probe answers, recovery reports) are tagged with the
//! [`Session`] that requested them; a stop starts a new session, so anything
//! arriving late for an older one is dropped.
//!
//! The controller is driven by a single owner (see [`crate::RadioPlayer`]);
//! none of its methods block.

use crate::backend::{MediaBackend, MediaEvent, MediaEventReceiver, SourceId};
use crate::endpoint::{EndpointId, StreamEndpoints};
use crate::engine::{EngineStatus, PlaybackEngine, PlaybackState, DEFAULT_VOLUME};
use crate::prober::{StreamProber, DEFAULT_PROBE_TIMEOUT_SECS};
use crate::recovery::{RecoveryTask, DEFAULT_RECOVERY_INTERVAL_SECS};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Listening session number
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Session(pub u64);

impl Session {
    pub fn next(self) -> Self {
        Session(self.0 + 1)
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Deferred results delivered back to the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// Outcome of the probe run when a session starts
    PrimaryProbed { session: Session, reachable: bool },
    /// The recovery task found PRIMARY reachable again
    PrimaryRecovered { session: Session },
}

/// Timing and volume settings of the failover policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FailoverSettings {
    /// Upper bound on the session-start probe
    pub probe_timeout: Duration,
    /// Delay between recovery probes while on FALLBACK
    pub recovery_interval: Duration,
    pub initial_volume: f32,
}

impl Default for FailoverSettings {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
            recovery_interval: Duration::from_secs(DEFAULT_RECOVERY_INTERVAL_SECS),
            initial_volume: DEFAULT_VOLUME,
        }
    }
}

/// Receiving ends the owner of a controller must poll
pub struct ControllerInbox {
    pub media: MediaEventReceiver,
    pub signals: mpsc::UnboundedReceiver<Signal>,
}

/// The failover policy layer
pub struct FailoverController<B: MediaBackend> {
    engine: PlaybackEngine<B>,
    endpoints: StreamEndpoints,
    prober: Arc<dyn StreamProber>,
    settings: FailoverSettings,
    session: Session,
    probe: Option<JoinHandle<()>>,
    recovery: Option<RecoveryTask>,
    signals: mpsc::UnboundedSender<Signal>,
}

impl<B: MediaBackend> FailoverController<B> {
    pub fn new(
        backend: B,
        endpoints: StreamEndpoints,
        prober: Arc<dyn StreamProber>,
        settings: FailoverSettings,
    ) -> (Self, ControllerInbox) {
        let (engine, media) = PlaybackEngine::new(backend, settings.initial_volume);
        let (signals, signals_rx) = mpsc::unbounded_channel();
        let controller = Self {
            engine,
            endpoints,
            prober,
            settings,
            session: Session::default(),
            probe: None,
            recovery: None,
            signals,
        };
        let inbox = ControllerInbox {
            media,
            signals: signals_rx,
        };
        (controller, inbox)
    }

    pub fn state(&self) -> PlaybackState {
        *self.engine.playback()
    }

    pub fn engine(&self) -> &PlaybackEngine<B> {
        &self.engine
    }

    pub fn endpoints(&self) -> &StreamEndpoints {
        &self.endpoints
    }

    /// True while a recovery task is alive
    pub fn is_recovering(&self) -> bool {
        self.recovery.is_some()
    }

    /// True while the session-start probe has not answered yet
    pub fn is_probing(&self) -> bool {
        self.probe.is_some()
    }

    /// Play/pause toggle
    pub fn toggle_play(&mut self) {
        if self.engine.playback().is_playing {
            tracing::info!(session = %self.session, "Stopping playback");
            self.stop_session();
        } else {
            self.start_session();
        }
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.engine.set_volume(volume);
    }

    /// Feed a deferred result back into the policy
    pub fn handle_signal(&mut self, signal: Signal) {
        match signal {
            Signal::PrimaryProbed { session, reachable } => {
                if !self.is_current(session) {
                    tracing::debug!(session = %session, reachable, "Discarding stale probe result");
                    return;
                }
                self.probe = None;
                let target = if reachable {
                    EndpointId::Primary
                } else {
                    tracing::info!("Primary stream unreachable, starting on fallback");
                    EndpointId::Fallback
                };
                self.switch_to(target);
            }
            Signal::PrimaryRecovered { session } => {
                if !self.is_current(session)
                    || self.engine.playback().active_endpoint != EndpointId::Fallback
                {
                    tracing::debug!(session = %session, "Discarding stale recovery report");
                    return;
                }
                self.recovery = None;
                tracing::info!("Returning to primary stream");
                self.switch_to(EndpointId::Primary);
            }
        }
    }

    /// Feed a backend event through the engine and react to its status
    pub fn handle_media(&mut self, source: SourceId, event: MediaEvent) {
        match self.engine.handle_event(source, event) {
            Some(EngineStatus::Playing) => {
                tracing::debug!(endpoint = %self.engine.playback().active_endpoint, "Audio is playing");
            }
            Some(EngineStatus::Stalled) => {
                tracing::debug!(endpoint = %self.engine.playback().active_endpoint, "Stream stalled");
            }
            Some(EngineStatus::EndedWithError(reason)) => self.on_source_failed(&reason),
            None => {}
        }
    }

    /// Stop everything and release the audio output. Idempotent.
    pub fn shutdown(&mut self) {
        self.stop_session();
        self.engine.release();
    }

    fn is_current(&self, session: Session) -> bool {
        session == self.session && self.engine.playback().is_playing
    }

    fn start_session(&mut self) {
        self.session = self.session.next();
        self.engine.begin_session();

        let session = self.session;
        let prober = self.prober.clone();
        let url = self.endpoints.primary().url.clone();
        let timeout = self.settings.probe_timeout;
        let signals = self.signals.clone();

        tracing::info!(session = %session, url = %url, "Starting playback, probing primary stream");
        self.probe = Some(tokio::spawn(async move {
            let reachable = tokio::time::timeout(timeout, prober.probe(&url))
                .await
                .unwrap_or(false);
            let _ = signals.send(Signal::PrimaryProbed { session, reachable });
        }));
    }

    /// Point the engine at `id` and play it, keeping the session alive
    fn switch_to(&mut self, id: EndpointId) {
        let endpoint = self.endpoints.get(id).clone();
        tracing::info!(endpoint = %id, url = %endpoint.url, "Switching stream");
        self.engine.configure(&endpoint);
        match self.engine.play() {
            Ok(()) => self.sync_recovery(),
            Err(e) => {
                tracing::warn!(endpoint = %id, error = %e, "Playback could not start");
                self.on_source_failed(&e.to_string());
            }
        }
    }

    fn on_source_failed(&mut self, reason: &str) {
        match self.engine.playback().active_endpoint {
            EndpointId::Primary => {
                tracing::warn!(reason, "Primary stream failed, switching to fallback");
                self.switch_to(EndpointId::Fallback);
            }
            EndpointId::Fallback => {
                tracing::warn!(reason, "Fallback stream failed, stopping playback");
                self.cancel_pending();
                self.engine.halt();
            }
        }
    }

    /// Keep exactly one recovery task while FALLBACK plays, none otherwise
    fn sync_recovery(&mut self) {
        let playback = self.engine.playback();
        let wanted = playback.is_playing && playback.active_endpoint == EndpointId::Fallback;
        if !wanted {
            self.recovery = None;
            return;
        }
        if self.recovery.is_none() {
            self.recovery = Some(RecoveryTask::start(
                self.prober.clone(),
                self.endpoints.primary().url.clone(),
                self.settings.recovery_interval,
                self.settings.probe_timeout,
                self.session,
                self.signals.clone(),
            ));
        }
    }

    fn stop_session(&mut self) {
        self.cancel_pending();
        // Results requested by the session being stopped are now stale.
        self.session = self.session.next();
        self.engine.stop();
    }

    fn cancel_pending(&mut self) {
        if let Some(probe) = self.probe.take() {
            probe.abort();
        }
        self.recovery = None;
    }
}

impl<B: MediaBackend> Drop for FailoverController<B> {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{BackendCall, FakeBackend, FakeProber};

    struct Harness {
        controller: FailoverController<FakeBackend>,
        inbox: ControllerInbox,
        backend: FakeBackend,
        prober: FakeProber,
        endpoints: StreamEndpoints,
    }

    impl Harness {
        fn new(prober: FakeProber) -> Self {
            let backend = FakeBackend::default();
            let endpoints = StreamEndpoints::default();
            let (controller, inbox) = FailoverController::new(
                backend.clone(),
                endpoints.clone(),
                Arc::new(prober.clone()),
                FailoverSettings::default(),
            );
            Self {
                controller,
                inbox,
                backend,
                prober,
                endpoints,
            }
        }

        async fn next_signal(&mut self) {
            let signal = self.inbox.signals.recv().await.unwrap();
            self.controller.handle_signal(signal);
        }

        /// Deliver every pending backend event
        fn pump_media(&mut self) {
            while let Ok((source, event)) = self.inbox.media.try_recv() {
                self.controller.handle_media(source, event);
            }
        }

        fn emit(&mut self, event: MediaEvent) {
            self.backend.emit(event);
            self.pump_media();
        }

        /// Start a session and let the first probe answer
        async fn start(&mut self) {
            self.controller.toggle_play();
            self.next_signal().await;
            self.emit(MediaEvent::Playing);
        }

        fn state(&self) -> PlaybackState {
            self.controller.state()
        }

        fn fallback_probes(&self) -> usize {
            let fallback = &self.endpoints.fallback().url;
            self.prober.probed().iter().filter(|u| *u == fallback).count()
        }

        fn primary_probes(&self) -> usize {
            let primary = &self.endpoints.primary().url;
            self.prober.probed().iter().filter(|u| *u == primary).count()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reachable_primary_is_played() {
        let mut h = Harness::new(FakeProber::answering(true));
        h.controller.toggle_play();

        let state = h.state();
        assert!(state.is_playing);
        assert!(state.is_loading);

        h.next_signal().await;
        h.emit(MediaEvent::Playing);

        let state = h.state();
        assert_eq!(state.active_endpoint, EndpointId::Primary);
        assert!(state.is_playing);
        assert!(!state.is_loading);
        assert_eq!(h.backend.loaded_urls(), vec![h.endpoints.primary().url.clone()]);
        assert!(!h.controller.is_recovering());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_primary_plays_fallback_without_probing_it() {
        let mut h = Harness::new(FakeProber::answering(false));
        h.start().await;

        let state = h.state();
        assert_eq!(state.active_endpoint, EndpointId::Fallback);
        assert!(state.is_playing);
        assert_eq!(h.fallback_probes(), 0);
        assert_eq!(h.backend.loaded_urls(), vec![h.endpoints.fallback().url.clone()]);
        assert!(h.controller.is_recovering());
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_failure_switches_to_fallback_without_stopping() {
        let mut h = Harness::new(FakeProber::answering(true));
        h.start().await;
        let probes_before = h.prober.probed().len();

        h.backend.emit(MediaEvent::Error("connection reset".into()));
        while let Ok((source, event)) = h.inbox.media.try_recv() {
            h.controller.handle_media(source, event);
            assert!(h.state().is_playing);
        }

        let state = h.state();
        assert_eq!(state.active_endpoint, EndpointId::Fallback);
        assert!(state.is_playing);
        assert!(state.is_loading);
        // No re-probe: the error is evidence enough.
        assert_eq!(h.prober.probed().len(), probes_before);
        assert!(h.controller.is_recovering());

        h.emit(MediaEvent::Playing);
        assert!(!h.state().is_loading);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_switches_back_to_primary() {
        let prober = FakeProber::answering(false);
        let mut h = Harness::new(prober);
        h.start().await;
        assert_eq!(h.state().active_endpoint, EndpointId::Fallback);

        h.prober.set_default(true);
        tokio::time::sleep(Duration::from_secs(31)).await;
        h.next_signal().await;

        let state = h.state();
        assert_eq!(state.active_endpoint, EndpointId::Primary);
        assert!(state.is_playing);
        assert!(!h.controller.is_recovering());
        assert_eq!(h.primary_probes(), 2);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(h.primary_probes(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_failure_stops_for_good() {
        let mut h = Harness::new(FakeProber::answering(false));
        h.start().await;
        let loads = h.backend.loaded_urls().len();

        h.emit(MediaEvent::Error("fallback gone".into()));

        let state = h.state();
        assert!(!state.is_playing);
        assert!(!state.is_loading);
        assert_eq!(state.active_endpoint, EndpointId::Fallback);
        assert!(!h.controller.is_recovering());

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(h.inbox.signals.try_recv().is_err());
        assert_eq!(h.backend.loaded_urls().len(), loads);
        assert_eq!(h.primary_probes(), 1);

        // The user can retry by hand.
        h.prober.set_default(true);
        h.start().await;
        assert_eq!(h.state().active_endpoint, EndpointId::Primary);
        assert!(h.state().is_playing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_twice_is_harmless() {
        let mut h = Harness::new(FakeProber::answering(true));
        h.start().await;

        h.controller.toggle_play();
        let first = h.state();
        h.controller.shutdown();
        h.controller.shutdown();
        let second = h.state();

        assert_eq!(first, second);
        assert!(!second.is_playing);
        assert!(!second.is_loading);
        assert_eq!(h.backend.count(|c| matches!(c, BackendCall::Release)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_resolving_after_stop_changes_nothing() {
        let prober = FakeProber::answering(true).with_delay(Duration::from_secs(3));
        let mut h = Harness::new(prober);

        h.controller.toggle_play();
        assert!(h.controller.is_probing());
        h.controller.toggle_play();
        assert!(!h.controller.is_probing());

        // A result from the stopped session shows up anyway.
        let stale = h.controller.session;
        h.controller.handle_signal(Signal::PrimaryProbed {
            session: Session(stale.0 - 1),
            reachable: true,
        });
        tokio::time::sleep(Duration::from_secs(10)).await;

        let state = h.state();
        assert!(!state.is_playing);
        assert!(!state.is_loading);
        assert!(h.backend.loaded_urls().is_empty());
        assert!(h.inbox.signals.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_media_error_after_stop_is_ignored() {
        let mut h = Harness::new(FakeProber::answering(true));
        h.start().await;
        let old_source = h.backend.current().unwrap();

        h.controller.toggle_play();
        h.controller.handle_media(old_source, MediaEvent::Error("aborted".into()));

        let state = h.state();
        assert!(!state.is_playing);
        assert_eq!(state.active_endpoint, EndpointId::Primary);
        assert_eq!(h.backend.loaded_urls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_volume_survives_switches() {
        let mut h = Harness::new(FakeProber::answering(true));
        h.controller.set_volume(0.35);
        h.start().await;

        h.emit(MediaEvent::Error("drop".into()));
        assert_eq!(h.state().active_endpoint, EndpointId::Fallback);
        assert_eq!(h.state().volume, 0.35);
        assert_eq!(h.backend.volume(), 0.35);

        tokio::time::sleep(Duration::from_secs(31)).await;
        h.next_signal().await;
        assert_eq!(h.state().active_endpoint, EndpointId::Primary);
        assert_eq!(h.state().volume, 0.35);
        assert_eq!(h.backend.volume(), 0.35);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_recovery_task_across_restarts() {
        let mut h = Harness::new(FakeProber::answering(false));
        h.start().await;
        assert!(h.controller.is_recovering());

        h.controller.toggle_play();
        assert!(!h.controller.is_recovering());
        h.start().await;
        assert!(h.controller.is_recovering());

        // One probe at session start each, then one per interval.
        assert_eq!(h.primary_probes(), 2);
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(h.primary_probes(), 3);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.primary_probes(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_refused_on_primary_falls_back() {
        let mut h = Harness::new(FakeProber::answering(true));
        h.backend.fail_next_play();
        h.controller.toggle_play();
        h.next_signal().await;

        let state = h.state();
        assert_eq!(state.active_endpoint, EndpointId::Fallback);
        assert!(state.is_playing);
        assert!(state.is_loading);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_keeps_session() {
        let mut h = Harness::new(FakeProber::answering(true));
        h.start().await;

        h.emit(MediaEvent::Waiting);
        let state = h.state();
        assert!(state.is_playing);
        assert!(state.is_loading);
        assert_eq!(state.active_endpoint, EndpointId::Primary);

        h.emit(MediaEvent::Playing);
        assert!(!h.state().is_loading);
    }
}
