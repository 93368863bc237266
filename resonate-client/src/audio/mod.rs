//! Decode pipeline and audio output
//!
//! Codec frames come in, canonical little-endian PCM bytes go out, and a
//! cpal-backed sink turns them into sound. The sink is fed through a
//! lock-free FIFO so the device callback never blocks on the async side.

pub mod decoder;
pub mod sink;
pub mod types;

pub use decoder::StreamDecoder;
pub use sink::{AudioSink, CpalSink, SinkStats};
pub use types::{SampleKind, SinkFormat};
