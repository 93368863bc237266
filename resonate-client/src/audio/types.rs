//! Canonical PCM contract between decoder and sink

use resonate_common::format::{AudioFormat, Codec};

/// Sample width of canonical PCM handed to the sink.
///
/// Decode-time normalization leaves exactly two cases: 16-bit PCM passes
/// through, everything else becomes full-scale 32-bit signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    I16,
    I32,
}

impl SampleKind {
    pub fn bytes(self) -> usize {
        match self {
            SampleKind::I16 => 2,
            SampleKind::I32 => 4,
        }
    }
}

/// The byte-stream contract a sink is configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkFormat {
    pub sample_rate: u32,
    pub channels: u8,
    pub kind: SampleKind,
}

impl SinkFormat {
    /// Derive the sink contract from a negotiated stream format.
    pub fn for_stream(format: &AudioFormat) -> Self {
        let kind = match (format.codec, format.bit_depth) {
            (Codec::Pcm, 16) => SampleKind::I16,
            _ => SampleKind::I32,
        };
        Self {
            sample_rate: format.sample_rate,
            channels: format.channels,
            kind,
        }
    }

    /// Bytes per interleaved frame. Always a power-of-two multiple of the
    /// channel count (2- or 4-byte samples).
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * self.kind.bytes()
    }

    /// Playback duration of `len` canonical bytes, in microseconds.
    pub fn duration_us(&self, len: usize) -> i64 {
        let frames = len / self.bytes_per_frame();
        (frames as i64 * 1_000_000) / self.sample_rate as i64
    }
}
