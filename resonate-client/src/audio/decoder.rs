//! Stream decoders
//!
//! Translates opaque codec frames plus the `stream/start` descriptor into
//! canonical PCM:
//!
//! - PCM 16/32-bit passes through untouched
//! - PCM 24-bit is unpacked to full-scale 32-bit little-endian signed
//! - Opus and FLAC decode to full-scale interleaved i32 regardless of the
//!   advertised bit depth
//!
//! Decoders are stateful where the codec requires it (Opus, FLAC) and are
//! rebuilt on every stream boundary.

use resonate_common::format::{AudioFormat, Codec};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, Decoder as _, DecoderOptions, CODEC_TYPE_FLAC};
use symphonia::core::formats::Packet;
use symphonia::default::codecs::FlacDecoder;
use tracing::debug;

use crate::audio::types::SinkFormat;
use crate::error::{Error, Result};

/// Longest Opus frame: 120 ms at 48 kHz.
const OPUS_MAX_FRAME_SAMPLES: usize = 5760;

/// Per-stream decoder producing canonical PCM bytes.
pub struct StreamDecoder {
    imp: DecoderImpl,
    output: SinkFormat,
}

enum DecoderImpl {
    PcmPassthrough,
    Pcm24,
    Opus {
        decoder: opus::Decoder,
        channels: usize,
        /// Reused between frames to avoid per-chunk allocation
        scratch: Vec<f32>,
    },
    Flac {
        decoder: FlacDecoder,
        next_ts: u64,
    },
}

impl StreamDecoder {
    /// Build a decoder for a negotiated stream format.
    ///
    /// `codec_header` is the codec initialization blob from `stream/start`
    /// (FLAC requires its STREAMINFO here; PCM and Opus ignore it).
    pub fn new(format: &AudioFormat, codec_header: Option<&[u8]>) -> Result<Self> {
        format
            .validate()
            .map_err(|e| Error::Decode(format!("invalid stream format: {e}")))?;
        let output = SinkFormat::for_stream(format);

        let imp = match format.codec {
            Codec::Pcm => match format.bit_depth {
                16 | 32 => DecoderImpl::PcmPassthrough,
                24 => DecoderImpl::Pcm24,
                // validate() has already excluded everything else
                other => return Err(Error::Decode(format!("invalid PCM bit depth: {other}"))),
            },
            Codec::Opus => {
                let channels = match format.channels {
                    1 => opus::Channels::Mono,
                    2 => opus::Channels::Stereo,
                    _ => return Err(Error::UnsupportedCodec(Codec::Opus)),
                };
                let decoder = opus::Decoder::new(format.sample_rate, channels)
                    .map_err(|e| Error::Decode(format!("opus init: {e}")))?;
                DecoderImpl::Opus {
                    decoder,
                    channels: format.channels as usize,
                    scratch: vec![0.0; OPUS_MAX_FRAME_SAMPLES * format.channels as usize],
                }
            }
            Codec::Flac => {
                let header = codec_header
                    .ok_or_else(|| Error::Decode("flac stream requires a codec header".into()))?;
                let mut params = CodecParameters::new();
                params
                    .for_codec(CODEC_TYPE_FLAC)
                    .with_sample_rate(format.sample_rate)
                    .with_extra_data(header.to_vec().into_boxed_slice());
                let decoder = FlacDecoder::try_new(&params, &DecoderOptions::default())
                    .map_err(|e| Error::Decode(format!("flac init: {e}")))?;
                DecoderImpl::Flac { decoder, next_ts: 0 }
            }
        };

        debug!(%format, ?output, "stream decoder ready");
        Ok(Self { imp, output })
    }

    /// The canonical format this decoder emits; the sink is configured
    /// from it.
    pub fn output_format(&self) -> SinkFormat {
        self.output
    }

    /// Decode one codec frame into canonical PCM bytes.
    pub fn decode(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        match &mut self.imp {
            DecoderImpl::PcmPassthrough => Ok(data.to_vec()),
            DecoderImpl::Pcm24 => decode_pcm24(data),
            DecoderImpl::Opus {
                decoder,
                channels,
                scratch,
            } => {
                let frames = decoder
                    .decode_float(data, scratch, false)
                    .map_err(|e| Error::Decode(format!("opus frame: {e}")))?;
                let samples = frames * *channels;
                let mut out = Vec::with_capacity(samples * 4);
                for &sample in &scratch[..samples] {
                    out.extend_from_slice(&float_to_i32(sample).to_le_bytes());
                }
                Ok(out)
            }
            DecoderImpl::Flac { decoder, next_ts } => {
                let packet = Packet::new_from_slice(0, *next_ts, 0, data);
                let decoded = decoder
                    .decode(&packet)
                    .map_err(|e| Error::Decode(format!("flac frame: {e}")))?;
                let spec = *decoded.spec();
                let frames = decoded.frames();
                *next_ts += frames as u64;

                let mut sbuf = SampleBuffer::<i32>::new(decoded.capacity() as u64, spec);
                sbuf.copy_interleaved_ref(decoded);
                let samples = &sbuf.samples()[..frames * spec.channels.count()];
                let mut out = Vec::with_capacity(samples.len() * 4);
                for &sample in samples {
                    out.extend_from_slice(&sample.to_le_bytes());
                }
                Ok(out)
            }
        }
    }
}

/// Unpack 3-byte little-endian signed samples to full-scale i32.
fn decode_pcm24(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() % 3 != 0 {
        return Err(Error::Decode(format!(
            "24-bit PCM payload length {} not divisible by 3",
            data.len()
        )));
    }
    let mut out = Vec::with_capacity(data.len() / 3 * 4);
    for chunk in data.chunks_exact(3) {
        let raw =
            i32::from(chunk[0]) | (i32::from(chunk[1]) << 8) | (i32::from(chunk[2]) << 16);
        // Sign-extend from 24 bits, then shift to full i32 scale so every
        // 32-bit path shares one loudness contract
        let extended = (raw << 8) >> 8;
        out.extend_from_slice(&(extended << 8).to_le_bytes());
    }
    Ok(out)
}

fn float_to_i32(sample: f32) -> i32 {
    (f64::from(sample).clamp(-1.0, 1.0) * f64::from(i32::MAX)) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm_format(bit_depth: u8) -> AudioFormat {
        AudioFormat {
            codec: Codec::Pcm,
            channels: 2,
            sample_rate: 48_000,
            bit_depth,
        }
    }

    #[test]
    fn test_pcm16_is_identity() {
        let mut dec = StreamDecoder::new(&pcm_format(16), None).unwrap();
        let data = vec![0x01, 0x02, 0x03, 0x04, 0xFF, 0x7F, 0x00, 0x80];
        assert_eq!(dec.decode(&data).unwrap(), data);
        assert_eq!(dec.output_format().bytes_per_frame(), 4);
    }

    #[test]
    fn test_pcm32_is_identity() {
        let mut dec = StreamDecoder::new(&pcm_format(32), None).unwrap();
        let data: Vec<u8> = (0..16).collect();
        assert_eq!(dec.decode(&data).unwrap(), data);
        assert_eq!(dec.output_format().bytes_per_frame(), 8);
    }

    #[test]
    fn test_pcm24_expands_four_thirds() {
        let mut dec = StreamDecoder::new(&pcm_format(24), None).unwrap();
        let data = vec![0u8; 24];
        let out = dec.decode(&data).unwrap();
        assert_eq!(out.len(), data.len() * 4 / 3);
    }

    #[test]
    fn test_pcm24_sign_extension_and_scale() {
        let mut dec = StreamDecoder::new(&pcm_format(24), None).unwrap();
        // +1 and -1 at 24-bit, little-endian
        let data = vec![0x01, 0x00, 0x00, 0xFF, 0xFF, 0xFF];
        let out = dec.decode(&data).unwrap();
        let pos = i32::from_le_bytes(out[0..4].try_into().unwrap());
        let neg = i32::from_le_bytes(out[4..8].try_into().unwrap());
        assert_eq!(pos, 1 << 8);
        assert_eq!(neg, -(1 << 8));
    }

    #[test]
    fn test_pcm24_rejects_ragged_length() {
        let mut dec = StreamDecoder::new(&pcm_format(24), None).unwrap();
        assert!(dec.decode(&[0x00, 0x01]).is_err());
    }

    #[test]
    fn test_invalid_format_rejected() {
        let mut fmt = pcm_format(16);
        fmt.bit_depth = 20;
        assert!(StreamDecoder::new(&fmt, None).is_err());
    }

    #[test]
    fn test_opus_roundtrip_produces_canonical_i32() {
        let fmt = AudioFormat {
            codec: Codec::Opus,
            channels: 2,
            sample_rate: 48_000,
            bit_depth: 16,
        };
        let mut dec = StreamDecoder::new(&fmt, None).unwrap();
        assert_eq!(dec.output_format().kind, crate::audio::SampleKind::I32);

        // 20 ms of silence through a real encoder
        let mut enc =
            opus::Encoder::new(48_000, opus::Channels::Stereo, opus::Application::Audio).unwrap();
        let pcm = vec![0.0f32; 960 * 2];
        let mut packet = vec![0u8; 4000];
        let len = enc.encode_float(&pcm, &mut packet).unwrap();

        let out = dec.decode(&packet[..len]).unwrap();
        assert_eq!(out.len(), 960 * 2 * 4);
    }

    #[test]
    fn test_opus_rejects_garbage_frame() {
        let fmt = AudioFormat {
            codec: Codec::Opus,
            channels: 2,
            sample_rate: 48_000,
            bit_depth: 16,
        };
        let mut dec = StreamDecoder::new(&fmt, None).unwrap();
        assert!(dec.decode(&[0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01]).is_err());
    }

    #[test]
    fn test_opus_unsupported_channel_count() {
        let fmt = AudioFormat {
            codec: Codec::Opus,
            channels: 6,
            sample_rate: 48_000,
            bit_depth: 16,
        };
        match StreamDecoder::new(&fmt, None) {
            Err(Error::UnsupportedCodec(Codec::Opus)) => {}
            other => panic!("expected UnsupportedCodec, got {other:?}"),
        }
    }

    #[test]
    fn test_flac_requires_codec_header() {
        let fmt = AudioFormat {
            codec: Codec::Flac,
            channels: 2,
            sample_rate: 44_100,
            bit_depth: 16,
        };
        assert!(StreamDecoder::new(&fmt, None).is_err());
    }

    #[test]
    fn test_float_to_i32_clamps() {
        assert_eq!(float_to_i32(2.0), i32::MAX);
        assert_eq!(float_to_i32(-2.0), -i32::MAX);
        assert_eq!(float_to_i32(0.0), 0);
    }
}
