//! MP3 decoding helpers shared by the prober and the HTTP backend
//!
//! minimp3 works on a blocking `Read`, so the ingest task forwards network
//! chunks to the decoding thread through a channel ([`ChunkReader`]).

use bytes::{Buf, Bytes};
use minimp3::{Decoder, Error as Mp3Error, Frame};
use std::io::{self, Cursor, Read};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Blocking `Read` over the chunks forwarded by the ingest task
///
/// Reads end (EOF) when the ingest side hangs up or once `cancel` fires:
/// bytes already handed out stay readable, no further chunk is taken. An
/// error item (`TimedOut` for a read timeout) is returned once, then EOF.
pub(crate) struct ChunkReader {
    chunks: mpsc::Receiver<io::Result<Bytes>>,
    pending: Bytes,
    cancel: CancellationToken,
    done: bool,
}

impl ChunkReader {
    pub fn new(chunks: mpsc::Receiver<io::Result<Bytes>>, cancel: CancellationToken) -> Self {
        Self {
            chunks,
            pending: Bytes::new(),
            cancel,
            done: false,
        }
    }
}

impl Read for ChunkReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while !self.pending.has_remaining() {
            if self.done || self.cancel.is_cancelled() {
                return Ok(0);
            }
            match self.chunks.blocking_recv() {
                Some(Ok(chunk)) => self.pending = chunk,
                Some(Err(e)) => {
                    self.done = true;
                    return Err(e);
                }
                None => self.done = true,
            }
        }

        let n = buf.len().min(self.pending.remaining());
        self.pending.copy_to_slice(&mut buf[..n]);
        Ok(n)
    }
}

/// Try to decode one MP3 frame out of a complete buffer
///
/// Returns `None` when the buffer does not (yet) hold a decodable frame.
pub(crate) fn first_frame(data: &[u8]) -> Option<Frame> {
    let mut decoder = Decoder::new(Cursor::new(data));
    loop {
        match decoder.next_frame() {
            Ok(frame) if frame.channels > 0 && !frame.data.is_empty() => return Some(frame),
            Ok(_) => continue,
            Err(Mp3Error::SkippedData) => continue,
            Err(Mp3Error::Eof) | Err(Mp3Error::InsufficientData) | Err(Mp3Error::Io(_)) => {
                return None
            }
        }
    }
}

/// Convert interleaved i16 samples to f32, scaled by `volume`
pub(crate) fn scale_samples(samples: &[i16], volume: f32) -> Vec<f32> {
    samples
        .iter()
        .map(|s| (*s as f32 / 32768.0) * volume)
        .collect()
}
