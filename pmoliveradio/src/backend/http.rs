//! HTTP MP3 stream backend
//!
//! Playing a source runs a small pipeline:
//!
//! ```text
//! HTTP body → [ingest task] → channel → [decode thread, minimp3] → PcmSink
//! ```
//!
//! The ingest task watches for stalls (no data for `stall_timeout`) and the
//! decode thread reports when audio actually reaches the sink. Clearing the
//! source cancels the pipeline; a cancelled pipeline never reports an error.

use super::{MediaBackend, MediaEvent, MediaEventSender, PcmFrame, PcmSink, SourceId};
use crate::decode::{scale_samples, ChunkReader};
use crate::error::{Error, Result};
use crate::prober::DEFAULT_USER_AGENT;
use bytes::Bytes;
use futures::StreamExt;
use minimp3::{Decoder, Error as Mp3Error};
use reqwest::Client;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Default delay without data before reporting a stall (3 seconds)
pub const DEFAULT_STALL_TIMEOUT_SECS: u64 = 3;

/// Default read timeout of the HTTP client (15 seconds)
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 15;

/// Chunks buffered between the ingest task and the decode thread
const CHANNEL_CAPACITY: usize = 16;

struct PendingSource {
    id: SourceId,
    url: Url,
    events: MediaEventSender,
}

struct ActiveSource {
    id: SourceId,
    cancel: CancellationToken,
}

/// Plays MP3 streams over HTTP into a [`PcmSink`]
pub struct HttpStreamBackend {
    client: Client,
    sink: Arc<dyn PcmSink>,
    volume: Arc<AtomicU32>,
    stall_timeout: Duration,
    pending: Option<PendingSource>,
    active: Option<ActiveSource>,
    released: bool,
}

impl HttpStreamBackend {
    /// Create a backend with default settings
    pub fn new(sink: Arc<dyn PcmSink>) -> Result<Self> {
        Self::builder(sink).build()
    }

    /// Create a builder for configuring the backend
    pub fn builder(sink: Arc<dyn PcmSink>) -> HttpBackendBuilder {
        HttpBackendBuilder {
            sink,
            client: None,
            stall_timeout: Duration::from_secs(DEFAULT_STALL_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }

    /// Current output volume
    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    fn cancel_active(&mut self) {
        if let Some(active) = self.active.take() {
            tracing::debug!(source = %active.id, "Cancelling stream pipeline");
            active.cancel.cancel();
        }
    }
}

impl MediaBackend for HttpStreamBackend {
    fn load(&mut self, source: SourceId, url: &Url, events: MediaEventSender) {
        self.cancel_active();
        self.pending = Some(PendingSource {
            id: source,
            url: url.clone(),
            events,
        });
    }

    fn play(&mut self, source: SourceId) -> Result<()> {
        if self.released {
            return Err(Error::backend("audio output already released"));
        }
        if self.active.as_ref().is_some_and(|a| a.id == source) {
            return Ok(());
        }
        let pending = match self.pending.take() {
            Some(pending) if pending.id == source => pending,
            other => {
                self.pending = other;
                return Err(Error::backend(format!("source {source} is not loaded")));
            }
        };

        let cancel = CancellationToken::new();
        let pipeline = Pipeline {
            client: self.client.clone(),
            url: pending.url,
            source,
            events: pending.events,
            sink: self.sink.clone(),
            volume: self.volume.clone(),
            stall_timeout: self.stall_timeout,
            cancel: cancel.clone(),
        };
        tokio::spawn(pipeline.run());

        self.active = Some(ActiveSource { id: source, cancel });
        Ok(())
    }

    fn clear(&mut self) {
        self.pending = None;
        self.cancel_active();
        self.sink.flush();
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.clear();
        self.released = true;
        tracing::debug!("HTTP stream backend released");
    }
}

impl Drop for HttpStreamBackend {
    fn drop(&mut self) {
        self.release();
    }
}

/// One playing source
struct Pipeline {
    client: Client,
    url: Url,
    source: SourceId,
    events: MediaEventSender,
    sink: Arc<dyn PcmSink>,
    volume: Arc<AtomicU32>,
    stall_timeout: Duration,
    cancel: CancellationToken,
}

impl Pipeline {
    async fn run(self) {
        let cancel = self.cancel.clone();
        let events = self.events.clone();
        let source = self.source;
        let url = self.url.clone();

        let result = tokio::select! {
            result = self.stream() => result,
            _ = cancel.cancelled() => return,
        };

        if let Err(e) = result {
            if cancel.is_cancelled() {
                return;
            }
            tracing::warn!(source = %source, url = %url, error = %e, "Stream failed");
            let _ = events.send((source, MediaEvent::Error(e.to_string())));
        }
    }

    async fn stream(self) -> Result<()> {
        tracing::debug!(source = %self.source, url = %self.url, "Opening stream");
        let response = self.client.get(self.url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(Error::Status {
                status: response.status().as_u16(),
                url: self.url.to_string(),
            });
        }

        let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(CHANNEL_CAPACITY);
        let stalled = Arc::new(AtomicBool::new(false));

        let decoder = {
            let source = self.source;
            let events = self.events.clone();
            let sink = self.sink.clone();
            let volume = self.volume.clone();
            let stalled = stalled.clone();
            let cancel = self.cancel.clone();
            tokio::task::spawn_blocking(move || {
                decode_loop(rx, source, &events, sink.as_ref(), &volume, &stalled, &cancel)
            })
        };

        let mut body = response.bytes_stream();
        loop {
            match tokio::time::timeout(self.stall_timeout, body.next()).await {
                Err(_) => {
                    if !stalled.swap(true, Ordering::AcqRel) {
                        tracing::debug!(source = %self.source, "Stream stalled");
                        let _ = self.events.send((self.source, MediaEvent::Waiting));
                    }
                }
                Ok(Some(Ok(chunk))) => {
                    if tx.send(Ok(chunk)).await.is_err() {
                        break;
                    }
                }
                Ok(Some(Err(e))) => {
                    let kind = if e.is_timeout() {
                        io::ErrorKind::TimedOut
                    } else {
                        io::ErrorKind::Other
                    };
                    let _ = tx.send(Err(io::Error::new(kind, e))).await;
                    break;
                }
                Ok(None) => break,
            }
        }
        drop(tx);

        decoder
            .await
            .map_err(|e| Error::Decode(format!("decode task failed: {e}")))??;

        // A live stream has no end: reaching it means the source is gone.
        Err(Error::Decode("stream ended".to_string()))
    }
}

fn decode_loop(
    rx: mpsc::Receiver<io::Result<Bytes>>,
    source: SourceId,
    events: &MediaEventSender,
    sink: &dyn PcmSink,
    volume: &AtomicU32,
    stalled: &AtomicBool,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut decoder = Decoder::new(ChunkReader::new(rx, cancel.clone()));
    let mut started = false;

    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }
        match decoder.next_frame() {
            Ok(frame) => {
                if frame.channels == 0 || frame.data.is_empty() {
                    continue;
                }
                // clear() may have flushed the sink while this frame decoded.
                if cancel.is_cancelled() {
                    return Ok(());
                }
                let gain = f32::from_bits(volume.load(Ordering::Relaxed));
                sink.push(PcmFrame {
                    samples: scale_samples(&frame.data, gain),
                    channels: frame.channels as u16,
                    sample_rate: frame.sample_rate as u32,
                });

                let was_stalled = stalled.swap(false, Ordering::AcqRel);
                if (!started || was_stalled) && !cancel.is_cancelled() {
                    if !started {
                        tracing::debug!(
                            source = %source,
                            sample_rate = frame.sample_rate,
                            channels = frame.channels,
                            "First frame decoded"
                        );
                    }
                    started = true;
                    let _ = events.send((source, MediaEvent::Playing));
                }
            }
            Err(Mp3Error::Eof) => {
                return if started || cancel.is_cancelled() {
                    Ok(())
                } else {
                    Err(Error::Decode(
                        "stream contained no decodable MP3 frames".to_string(),
                    ))
                };
            }
            Err(Mp3Error::InsufficientData) | Err(Mp3Error::SkippedData) => continue,
            Err(Mp3Error::Io(e)) => return Err(e.into()),
        }
    }
}

/// Builder for [`HttpStreamBackend`]
pub struct HttpBackendBuilder {
    sink: Arc<dyn PcmSink>,
    client: Option<Client>,
    stall_timeout: Duration,
    read_timeout: Duration,
    user_agent: String,
}

impl HttpBackendBuilder {
    /// Set a custom HTTP client (the read timeout is then the client's own)
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Delay without data before a stall is reported
    pub fn stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    /// Delay without data before the stream is considered dead
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set a custom User-Agent header
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Build the backend
    pub fn build(self) -> Result<HttpStreamBackend> {
        let client = match self.client {
            Some(client) => client,
            None => Client::builder()
                .user_agent(&self.user_agent)
                .read_timeout(self.read_timeout)
                .build()?,
        };
        Ok(HttpStreamBackend {
            client,
            sink: self.sink,
            volume: Arc::new(AtomicU32::new(1.0f32.to_bits())),
            stall_timeout: self.stall_timeout,
            pending: None,
            active: None,
            released: false,
        })
    }
}
