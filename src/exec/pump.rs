// src/exec/pump.rs

//! Output pump: drains whatever the child has written so far.
//!
//! A drain never waits for the child. Blocking belongs to the controller's
//! explicit wait between ticks.

use std::io::{self, Read};

use tracing::trace;

use super::utf8::Utf8Decoder;

/// Size of a single read from the transport.
pub const CHUNK_SIZE: usize = 1024;

/// Upper bound on the bytes taken in one drain, so a child that writes
/// without pause cannot starve the running loop. Matches the largest
/// default pipe capacity, so the drain after exit still empties the pipe.
pub const DRAIN_LIMIT: usize = 1 << 20;

/// Result of one drain.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Drained {
    /// Raw bytes read during this drain.
    pub bytes: usize,
    /// Decoded text; may lag `bytes` by an incomplete UTF-8 sequence.
    pub text: String,
    /// The write side is gone; no further data will arrive.
    pub end_of_stream: bool,
}

#[derive(Debug)]
pub struct OutputPump {
    decoder: Utf8Decoder,
    buf: Box<[u8]>,
    limit: usize,
    total_bytes: u64,
}

impl OutputPump {
    pub fn new() -> Self {
        Self::with_chunk_size(CHUNK_SIZE)
    }

    pub fn with_chunk_size(size: usize) -> Self {
        Self {
            decoder: Utf8Decoder::new(),
            buf: vec![0u8; size.max(1)].into_boxed_slice(),
            limit: DRAIN_LIMIT,
            total_bytes: 0,
        }
    }

    /// Cap the bytes taken per drain (at least one read always happens).
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    /// Read until the source has nothing more to give right now, or the
    /// drain limit is reached.
    ///
    /// `WouldBlock` ends the drain, `Interrupted` is retried, end-of-stream
    /// (a zero-length read or `BrokenPipe`) is reported through
    /// [`Drained::end_of_stream`]. Any other error propagates.
    pub fn drain<R: Read + ?Sized>(&mut self, source: &mut R) -> io::Result<Drained> {
        let mut raw = Vec::new();
        let mut end_of_stream = false;

        loop {
            match source.read(&mut self.buf) {
                Ok(0) => {
                    end_of_stream = true;
                    break;
                }
                Ok(n) => {
                    raw.extend_from_slice(&self.buf[..n]);
                    if raw.len() >= self.limit {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                    end_of_stream = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        self.total_bytes += raw.len() as u64;
        if !raw.is_empty() {
            trace!(bytes = raw.len(), end_of_stream, "drained child output");
        }

        Ok(Drained {
            bytes: raw.len(),
            text: self.decoder.decode(&raw),
            end_of_stream,
        })
    }

    /// Text still held back by the decoder, rendered lossily.
    pub fn finish(&mut self) -> String {
        self.decoder.finish()
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }
}

impl Default for OutputPump {
    fn default() -> Self {
        Self::new()
    }
}
