//! Return-to-primary task
//!
//! While the player is on FALLBACK a [`RecoveryTask`] probes PRIMARY at a
//! fixed interval. Each probe is bounded by the probe timeout; one that runs
//! out counts as a failure. The first successful probe is reported to the
//! controller and ends the task. Dropping the handle cancels it: an in-flight probe is
//! abandoned and nothing is reported afterwards.

use crate::controller::{Session, Signal};
use crate::prober::StreamProber;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Default delay between two recovery probes (30 seconds)
pub const DEFAULT_RECOVERY_INTERVAL_SECS: u64 = 30;

/// Handle on a running recovery loop
#[derive(Debug)]
pub struct RecoveryTask {
    session: Session,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl RecoveryTask {
    /// Start probing `url` every `period`, the first probe one full period
    /// from now
    pub fn start(
        prober: Arc<dyn StreamProber>,
        url: Url,
        period: Duration,
        probe_timeout: Duration,
        session: Session,
        signals: mpsc::UnboundedSender<Signal>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        tracing::debug!(session = %session, period = ?period, url = %url, "Recovery task started");

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut attempt = 0u32;

            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = ticker.tick() => {}
                }

                attempt += 1;
                let reachable = tokio::select! {
                    _ = token.cancelled() => return,
                    reachable = tokio::time::timeout(probe_timeout, prober.probe(&url)) => {
                        reachable.unwrap_or(false)
                    }
                };

                if token.is_cancelled() {
                    return;
                }
                if reachable {
                    tracing::info!(session = %session, attempt, "Primary stream is back");
                    let _ = signals.send(Signal::PrimaryRecovered { session });
                    return;
                }
                tracing::debug!(session = %session, attempt, "Primary stream still unreachable");
            }
        });

        Self {
            session,
            cancel,
            handle,
        }
    }

    /// True once the loop reported a recovery or was cancelled
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for RecoveryTask {
    fn drop(&mut self) {
        tracing::debug!(session = %self.session, "Recovery task cancelled");
        self.cancel.cancel();
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeProber;

    fn primary() -> Url {
        Url::parse("http://localhost:3000/stream/baleares").unwrap()
    }

    const PERIOD: Duration = Duration::from_secs(30);
    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test(start_paused = true)]
    async fn test_first_probe_after_one_period() {
        let prober = FakeProber::answering(false);
        let (tx, _rx) = mpsc::unbounded_channel();
        let _task = RecoveryTask::start(Arc::new(prober.clone()), primary(), PERIOD, TIMEOUT, Session(1), tx);

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(prober.probed().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(prober.probed().len(), 1);

        tokio::time::sleep(PERIOD).await;
        assert_eq!(prober.probed().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reports_first_success_and_ends() {
        let prober = FakeProber::answering(true);
        prober.script(&primary(), &[false, false]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = RecoveryTask::start(Arc::new(prober.clone()), primary(), PERIOD, TIMEOUT, Session(4), tx);

        let signal = rx.recv().await.unwrap();
        assert_eq!(signal, Signal::PrimaryRecovered { session: Session(4) });
        assert_eq!(prober.probed().len(), 3);

        tokio::time::sleep(PERIOD * 3).await;
        assert!(task.is_finished());
        assert_eq!(prober.probed().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_before_any_probe() {
        let prober = FakeProber::answering(true);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = RecoveryTask::start(Arc::new(prober.clone()), primary(), PERIOD, TIMEOUT, Session(1), tx);
        drop(task);

        tokio::time::sleep(PERIOD * 4).await;
        assert!(prober.probed().is_empty());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_during_probe_reports_nothing() {
        let prober = FakeProber::answering(true).with_delay(Duration::from_secs(4));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = RecoveryTask::start(Arc::new(prober.clone()), primary(), PERIOD, TIMEOUT, Session(1), tx);

        tokio::time::sleep(PERIOD + Duration::from_secs(1)).await;
        assert_eq!(prober.probed().len(), 1);
        drop(task);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_probe_times_out_and_retries() {
        let prober = FakeProber::answering(true).with_delay(Duration::from_secs(600));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _task = RecoveryTask::start(Arc::new(prober.clone()), primary(), PERIOD, TIMEOUT, Session(2), tx);

        tokio::time::sleep(PERIOD * 2 + Duration::from_secs(1)).await;
        assert_eq!(prober.probed().len(), 2);
        assert!(rx.try_recv().is_err());
    }
}
