//! Sink playing decoded audio on the default output device via cpal
//!
//! The cpal stream is not `Send`, so it lives on a dedicated thread for the
//! sink's whole lifetime. Decoded frames are converted to the device layout
//! (channel count, sample rate) and appended to a shared buffer that the
//! output callback drains.

use super::{PcmFrame, PcmSink};
use crate::error::{Error, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

/// Cap on buffered audio (about 10 seconds of 48 kHz stereo)
const MAX_BUFFERED_SAMPLES: usize = 48_000 * 2 * 10;

/// Buffer shared between the decoding thread and the cpal callback
struct SharedBuffer {
    samples: VecDeque<f32>,
}

impl SharedBuffer {
    fn new() -> Self {
        Self {
            samples: VecDeque::new(),
        }
    }

    fn push_samples(&mut self, samples: impl IntoIterator<Item = f32>) {
        self.samples.extend(samples);
        let excess = self.samples.len().saturating_sub(MAX_BUFFERED_SAMPLES);
        if excess > 0 {
            self.samples.drain(..excess);
        }
    }

    fn pop_sample(&mut self) -> Option<f32> {
        self.samples.pop_front()
    }

    fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Plays PCM on the default output device
pub struct CpalSink {
    buffer: Arc<Mutex<SharedBuffer>>,
    device_channels: u16,
    device_rate: u32,
    shutdown: Mutex<Option<std_mpsc::Sender<()>>>,
}

impl CpalSink {
    /// Open the default output device
    pub fn open() -> Result<Self> {
        let buffer = Arc::new(Mutex::new(SharedBuffer::new()));
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(u16, u32)>>();
        let (shutdown_tx, shutdown_rx) = std_mpsc::channel::<()>();

        let callback_buffer = buffer.clone();
        thread::Builder::new()
            .name("pmoliveradio-cpal".to_string())
            .spawn(move || {
                let stream = match build_stream(callback_buffer) {
                    Ok((stream, channels, rate)) => {
                        let _ = ready_tx.send(Ok((channels, rate)));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Parked until the sink is dropped.
                let _ = shutdown_rx.recv();
                drop(stream);
                tracing::debug!("cpal output stream closed");
            })?;

        let (device_channels, device_rate) = ready_rx
            .recv()
            .map_err(|_| Error::output("audio thread exited during setup"))??;

        tracing::debug!(
            channels = device_channels,
            sample_rate = device_rate,
            "cpal output ready"
        );

        Ok(Self {
            buffer,
            device_channels,
            device_rate,
            shutdown: Mutex::new(Some(shutdown_tx)),
        })
    }
}

fn build_stream(buffer: Arc<Mutex<SharedBuffer>>) -> Result<(cpal::Stream, u16, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::output("no output device available"))?;

    tracing::debug!(
        "Using audio device: {}",
        device.name().unwrap_or_else(|_| "Unknown".to_string())
    );

    let config = device
        .default_output_config()
        .map_err(|e| Error::output(format!("failed to get output config: {e}")))?;
    let channels = config.channels();
    let rate = config.sample_rate().0;

    let stream = device
        .build_output_stream(
            &config.into(),
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut buf = match buffer.lock() {
                    Ok(buf) => buf,
                    Err(poisoned) => poisoned.into_inner(),
                };
                for sample in data.iter_mut() {
                    *sample = buf.pop_sample().unwrap_or(0.0);
                }
            },
            move |err| {
                tracing::error!("Audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| Error::output(format!("failed to build output stream: {e}")))?;

    stream
        .play()
        .map_err(|e| Error::output(format!("failed to play stream: {e}")))?;

    Ok((stream, channels, rate))
}

/// Convert an interleaved frame to the device channel count and rate
///
/// Nearest-sample rate conversion; mono is duplicated, extra source channels
/// beyond the device's are dropped.
fn adapt(frame: &PcmFrame, device_channels: u16, device_rate: u32) -> Vec<f32> {
    let src_channels = frame.channels.max(1) as usize;
    let dst_channels = device_channels.max(1) as usize;
    let src_frames = frame.samples.len() / src_channels;
    if src_frames == 0 || frame.sample_rate == 0 {
        return Vec::new();
    }

    let dst_frames =
        (src_frames as u64 * device_rate as u64 / frame.sample_rate as u64).max(1) as usize;
    let mut out = Vec::with_capacity(dst_frames * dst_channels);
    for i in 0..dst_frames {
        let src = (i as u64 * frame.sample_rate as u64 / device_rate as u64) as usize;
        let src = src.min(src_frames - 1);
        let base = src * src_channels;
        for ch in 0..dst_channels {
            let sample = if src_channels == 1 {
                frame.samples[base]
            } else {
                frame.samples[base + ch.min(src_channels - 1)]
            };
            out.push(sample);
        }
    }
    out
}

impl PcmSink for CpalSink {
    fn push(&self, frame: PcmFrame) {
        let samples = adapt(&frame, self.device_channels, self.device_rate);
        if let Ok(mut buf) = self.buffer.lock() {
            buf.push_samples(samples);
        }
    }

    fn flush(&self) {
        if let Ok(mut buf) = self.buffer.lock() {
            buf.clear();
        }
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        if let Ok(mut shutdown) = self.shutdown.lock() {
            if let Some(tx) = shutdown.take() {
                let _ = tx.send(());
            }
        }
    }
}
