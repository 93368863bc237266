//! Binary frame codec
//!
//! Audio, artwork and visualizer payloads travel as opaque binary websocket
//! messages with a 9-byte header:
//!
//! ```text
//! u8 kind || i64 big-endian server timestamp (µs) || payload...
//! ```
//!
//! Decoding is total over arbitrary input: anything shorter than the
//! header, carrying an unknown kind, or carrying a negative timestamp
//! decodes to `None` and is dropped by the caller.

/// Minimum wire length of a binary frame (kind + timestamp).
pub const MIN_FRAME_LEN: usize = 9;

const KIND_AUDIO_LEGACY: u8 = 0;
const KIND_AUDIO: u8 = 1;
const KIND_ARTWORK_BASE: u8 = 4;
const KIND_ARTWORK_LAST: u8 = 7;
const KIND_VISUALIZER: u8 = 8;

/// Discriminator of a binary frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// One codec frame of the audio program
    AudioChunk,
    /// Artwork channel 0..=3
    Artwork(u8),
    /// Visualizer side-channel data
    Visualizer,
}

impl FrameKind {
    /// Map a wire discriminator to a kind.
    ///
    /// Both `0` and `1` have carried audio across protocol history; both
    /// are accepted. Unknown values return `None`.
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            KIND_AUDIO_LEGACY | KIND_AUDIO => Some(FrameKind::AudioChunk),
            KIND_ARTWORK_BASE..=KIND_ARTWORK_LAST => {
                Some(FrameKind::Artwork(value - KIND_ARTWORK_BASE))
            }
            KIND_VISUALIZER => Some(FrameKind::Visualizer),
            _ => None,
        }
    }

    /// Wire discriminator for this kind. Audio emits the server-matching
    /// value `1`, never the legacy alias.
    pub fn to_wire(self) -> u8 {
        match self {
            FrameKind::AudioChunk => KIND_AUDIO,
            FrameKind::Artwork(channel) => KIND_ARTWORK_BASE + channel,
            FrameKind::Visualizer => KIND_VISUALIZER,
        }
    }
}

/// A decoded binary frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryFrame {
    pub kind: FrameKind,
    /// Server-domain timestamp in microseconds (monotonic since server start)
    pub server_ts_us: i64,
    pub payload: Vec<u8>,
}

impl BinaryFrame {
    /// Decode a wire frame. Returns `None` for frames shorter than the
    /// header, unknown kinds, or negative timestamps.
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < MIN_FRAME_LEN {
            return None;
        }
        let kind = FrameKind::from_wire(data[0])?;
        let ts_bytes: [u8; 8] = data[1..9].try_into().ok()?;
        let server_ts_us = i64::from_be_bytes(ts_bytes);
        if server_ts_us < 0 {
            return None;
        }
        Some(Self {
            kind,
            server_ts_us,
            payload: data[9..].to_vec(),
        })
    }

    /// Encode to the wire layout.
    ///
    /// The current protocol has no client-originated binary frames; the
    /// encoder exists for symmetry and tests.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(MIN_FRAME_LEN + self.payload.len());
        out.push(self.kind.to_wire());
        out.extend_from_slice(&self.server_ts_us.to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }
}
