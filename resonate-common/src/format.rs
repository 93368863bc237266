//! Stream format descriptors
//!
//! Defines the codec and per-stream audio format negotiated in
//! `stream/start`. A format is immutable for the lifetime of a stream.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Audio codec carried by a stream.
///
/// Wire names are lowercase (`pcm`, `opus`, `flac`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    /// Uncompressed little-endian PCM
    Pcm,
    /// Opus frames
    Opus,
    /// FLAC frames
    Flac,
}

impl Codec {
    /// Wire name of the codec
    pub fn name(&self) -> &'static str {
        match self {
            Codec::Pcm => "pcm",
            Codec::Opus => "opus",
            Codec::Flac => "flac",
        }
    }
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Format validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// Channel count outside the supported range
    #[error("invalid channel count: {0}")]
    InvalidChannels(u8),

    /// Bit depth other than 16, 24 or 32
    #[error("invalid bit depth: {0}")]
    InvalidBitDepth(u8),

    /// Sample rate of zero
    #[error("invalid sample rate: {0}")]
    InvalidSampleRate(u32),
}

/// Immutable per-stream audio format.
///
/// `bit_depth` describes the *wire* samples. After decode-time
/// normalization 24-bit input is widened to 32-bit, so the sink only ever
/// sees 2- or 4-byte samples (see [`AudioFormat::normalized_bytes_per_sample`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub codec: Codec,
    pub channels: u8,
    pub sample_rate: u32,
    pub bit_depth: u8,
}

impl AudioFormat {
    /// Format synthesized when audio arrives before `stream/start`.
    ///
    /// Some servers omit the start message; the session controller falls
    /// back to this exactly once per stream and counts the occurrence.
    pub fn fallback() -> Self {
        Self {
            codec: Codec::Pcm,
            channels: 2,
            sample_rate: 48_000,
            bit_depth: 16,
        }
    }

    /// Validate channel count, sample rate and bit depth.
    pub fn validate(&self) -> Result<(), FormatError> {
        if self.channels == 0 {
            return Err(FormatError::InvalidChannels(self.channels));
        }
        if self.sample_rate == 0 {
            return Err(FormatError::InvalidSampleRate(self.sample_rate));
        }
        match self.bit_depth {
            16 | 24 | 32 => Ok(()),
            other => Err(FormatError::InvalidBitDepth(other)),
        }
    }

    /// Bytes per sample after decode-time normalization.
    ///
    /// Only 16-bit PCM passes through as 2-byte samples; every other
    /// combination (24/32-bit PCM, Opus, FLAC) lands in the canonical
    /// 32-bit signed format.
    pub fn normalized_bytes_per_sample(&self) -> usize {
        match (self.codec, self.bit_depth) {
            (Codec::Pcm, 16) => 2,
            _ => 4,
        }
    }

    /// Bytes per interleaved frame after decode-time normalization.
    pub fn normalized_bytes_per_frame(&self) -> usize {
        self.channels as usize * self.normalized_bytes_per_sample()
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}Hz/{}ch/{}bit",
            self.codec, self.sample_rate, self.channels, self.bit_depth
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_format() {
        let fmt = AudioFormat::fallback();
        assert_eq!(fmt.codec, Codec::Pcm);
        assert_eq!(fmt.sample_rate, 48_000);
        assert_eq!(fmt.channels, 2);
        assert_eq!(fmt.bit_depth, 16);
        assert!(fmt.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_fields() {
        let mut fmt = AudioFormat::fallback();
        fmt.channels = 0;
        assert_eq!(fmt.validate(), Err(FormatError::InvalidChannels(0)));

        let mut fmt = AudioFormat::fallback();
        fmt.bit_depth = 20;
        assert_eq!(fmt.validate(), Err(FormatError::InvalidBitDepth(20)));

        let mut fmt = AudioFormat::fallback();
        fmt.sample_rate = 0;
        assert_eq!(fmt.validate(), Err(FormatError::InvalidSampleRate(0)));
    }

    #[test]
    fn test_normalized_sizes() {
        let pcm16 = AudioFormat { codec: Codec::Pcm, channels: 2, sample_rate: 48_000, bit_depth: 16 };
        assert_eq!(pcm16.normalized_bytes_per_sample(), 2);
        assert_eq!(pcm16.normalized_bytes_per_frame(), 4);

        let pcm24 = AudioFormat { bit_depth: 24, ..pcm16 };
        assert_eq!(pcm24.normalized_bytes_per_sample(), 4);
        assert_eq!(pcm24.normalized_bytes_per_frame(), 8);

        let flac16 = AudioFormat { codec: Codec::Flac, ..pcm16 };
        // Lossy codecs always decode to the canonical 32-bit format
        assert_eq!(flac16.normalized_bytes_per_sample(), 4);
    }

    #[test]
    fn test_codec_wire_names() {
        assert_eq!(serde_json::to_string(&Codec::Pcm).unwrap(), "\"pcm\"");
        assert_eq!(serde_json::to_string(&Codec::Opus).unwrap(), "\"opus\"");
        assert_eq!(serde_json::from_str::<Codec>("\"flac\"").unwrap(), Codec::Flac);
    }
}
