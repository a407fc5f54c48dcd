//! PCM sinks fed by the HTTP backend

/// A block of decoded, volume-scaled, interleaved samples
#[derive(Debug, Clone, PartialEq)]
pub struct PcmFrame {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

/// Destination of decoded audio
///
/// Called from the decoding thread, so implementations must be cheap and
/// must not block for long.
pub trait PcmSink: Send + Sync + 'static {
    fn push(&self, frame: PcmFrame);

    /// Drop everything buffered but not yet played
    fn flush(&self);
}

/// Discards audio (headless runs and tests)
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl PcmSink for NullSink {
    fn push(&self, _frame: PcmFrame) {}

    fn flush(&self) {}
}
