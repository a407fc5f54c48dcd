//! UI-facing player handle
//!
//! [`RadioPlayer::spawn`] moves a [`FailoverController`] into a tokio task
//! that owns it for the rest of its life. The task handles one message at a
//! time (user command, media event or deferred result) and publishes the
//! resulting [`PlaybackState`] on a watch channel after each one.
//!
//! Dropping the handle, or calling [`RadioPlayer::shutdown`], cancels the
//! task; its last act is a full teardown (probe aborted, recovery cancelled,
//! audio output released), whatever it was doing at the time.

use crate::backend::MediaBackend;
use crate::controller::{ControllerInbox, FailoverController, FailoverSettings};
use crate::endpoint::StreamEndpoints;
use crate::engine::PlaybackState;
use crate::prober::StreamProber;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
enum Command {
    TogglePlay(oneshot::Sender<PlaybackState>),
    SetVolume(f32, oneshot::Sender<PlaybackState>),
}

/// Handle on a running player
pub struct RadioPlayer {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<PlaybackState>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RadioPlayer {
    /// Start a player on the current tokio runtime
    pub fn spawn<B: MediaBackend>(
        backend: B,
        endpoints: StreamEndpoints,
        prober: Arc<dyn StreamProber>,
        settings: FailoverSettings,
    ) -> Self {
        let (controller, inbox) = FailoverController::new(backend, endpoints, prober, settings);
        let (state_tx, state_rx) = watch::channel(controller.state());
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run(
            controller,
            inbox,
            commands_rx,
            state_tx,
            cancel.clone(),
        ));

        Self {
            commands: commands_tx,
            state: state_rx,
            cancel,
            task: Some(task),
        }
    }

    /// Play/pause toggle; returns the state once the command was handled
    pub async fn toggle_play(&self) -> PlaybackState {
        let (tx, rx) = oneshot::channel();
        self.send(Command::TogglePlay(tx), rx).await
    }

    /// Set the volume, clamped to [0, 1]
    pub async fn set_volume(&self, volume: f32) -> PlaybackState {
        let (tx, rx) = oneshot::channel();
        self.send(Command::SetVolume(volume, tx), rx).await
    }

    /// Last published state
    pub fn state(&self) -> PlaybackState {
        *self.state.borrow()
    }

    /// Watch every published state
    pub fn subscribe(&self) -> watch::Receiver<PlaybackState> {
        self.state.clone()
    }

    /// Stop playback, release the audio output and wait for the task to end
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Player task ended abnormally: {}", e);
            }
        }
    }

    async fn send(&self, command: Command, reply: oneshot::Receiver<PlaybackState>) -> PlaybackState {
        if self.commands.send(command).is_err() {
            return self.state();
        }
        reply.await.unwrap_or_else(|_| self.state())
    }
}

impl Drop for RadioPlayer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run<B: MediaBackend>(
    mut controller: FailoverController<B>,
    mut inbox: ControllerInbox,
    mut commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<PlaybackState>,
    cancel: CancellationToken,
) {
    tracing::debug!("Player task started");
    loop {
        let mut reply = None;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            command = commands.recv() => match command {
                Some(Command::TogglePlay(tx)) => {
                    controller.toggle_play();
                    reply = Some(tx);
                }
                Some(Command::SetVolume(volume, tx)) => {
                    controller.set_volume(volume);
                    reply = Some(tx);
                }
                None => break,
            },
            Some((source, event)) = inbox.media.recv() => controller.handle_media(source, event),
            Some(signal) = inbox.signals.recv() => controller.handle_signal(signal),
        }

        let current = controller.state();
        state.send_replace(current);
        if let Some(tx) = reply {
            let _ = tx.send(current);
        }
    }

    controller.shutdown();
    state.send_replace(controller.state());
    tracing::debug!("Player task stopped");
}
