//! In-memory backend and prober used by the unit tests

use crate::backend::{MediaBackend, MediaEvent, MediaEventSender, SourceId};
use crate::error::{Error, Result};
use crate::prober::StreamProber;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    Load(SourceId, Url),
    Play(SourceId),
    Clear,
    SetVolume(f32),
    Release,
}

#[derive(Default)]
struct BackendInner {
    calls: Vec<BackendCall>,
    volume: f32,
    loaded: Option<(SourceId, MediaEventSender)>,
    fail_play: bool,
}

/// Records every command; tests emit media events by hand
#[derive(Clone, Default)]
pub struct FakeBackend {
    inner: Arc<Mutex<BackendInner>>,
}

impl FakeBackend {
    pub fn calls(&self) -> Vec<BackendCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&BackendCall) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    pub fn volume(&self) -> f32 {
        self.inner.lock().unwrap().volume
    }

    /// URLs loaded so far, in order
    pub fn loaded_urls(&self) -> Vec<Url> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                BackendCall::Load(_, url) => Some(url),
                _ => None,
            })
            .collect()
    }

    pub fn fail_next_play(&self) {
        self.inner.lock().unwrap().fail_play = true;
    }

    /// Source currently loaded, if any
    pub fn current(&self) -> Option<SourceId> {
        self.inner.lock().unwrap().loaded.as_ref().map(|(id, _)| *id)
    }

    /// Report `event` for the most recently loaded source
    pub fn emit(&self, event: MediaEvent) {
        let inner = self.inner.lock().unwrap();
        let (source, tx) = inner.loaded.as_ref().expect("a loaded source");
        tx.send((*source, event)).unwrap();
    }
}

impl MediaBackend for FakeBackend {
    fn load(&mut self, source: SourceId, url: &Url, events: MediaEventSender) {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(BackendCall::Load(source, url.clone()));
        inner.loaded = Some((source, events));
    }

    fn play(&mut self, source: SourceId) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(BackendCall::Play(source));
        if std::mem::take(&mut inner.fail_play) {
            return Err(Error::backend("play refused"));
        }
        Ok(())
    }

    fn clear(&mut self) {
        self.inner.lock().unwrap().calls.push(BackendCall::Clear);
    }

    fn set_volume(&mut self, volume: f32) {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(BackendCall::SetVolume(volume));
        inner.volume = volume;
    }

    fn release(&mut self) {
        self.inner.lock().unwrap().calls.push(BackendCall::Release);
    }
}

#[derive(Default)]
struct ProberInner {
    scripted: HashMap<Url, VecDeque<bool>>,
    default: bool,
    delay: Duration,
    probed: Vec<Url>,
}

/// Scripted prober: answers per URL, optionally after a delay
#[derive(Clone, Default)]
pub struct FakeProber {
    inner: Arc<Mutex<ProberInner>>,
}

impl FakeProber {
    /// Every unscripted probe answers `reachable`
    pub fn answering(reachable: bool) -> Self {
        let prober = Self::default();
        prober.inner.lock().unwrap().default = reachable;
        prober
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        self.inner.lock().unwrap().delay = delay;
        self
    }

    /// Queue answers for `url`, consumed before the default applies
    pub fn script(&self, url: &Url, answers: &[bool]) {
        self.inner
            .lock()
            .unwrap()
            .scripted
            .entry(url.clone())
            .or_default()
            .extend(answers.iter().copied());
    }

    pub fn set_default(&self, reachable: bool) {
        self.inner.lock().unwrap().default = reachable;
    }

    pub fn probed(&self) -> Vec<Url> {
        self.inner.lock().unwrap().probed.clone()
    }
}

#[async_trait::async_trait]
impl StreamProber for FakeProber {
    async fn probe(&self, url: &Url) -> bool {
        let delay = {
            let mut inner = self.inner.lock().unwrap();
            inner.probed.push(url.clone());
            inner.delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut inner = self.inner.lock().unwrap();
        let default = inner.default;
        inner
            .scripted
            .get_mut(url)
            .and_then(|answers| answers.pop_front())
            .unwrap_or(default)
    }
}
