//! # Resonate shared types (resonate-common)
//!
//! Protocol-level types shared by Resonate modules: stream format
//! descriptors, the JSON message envelope, the binary frame codec, and the
//! client event bus.
//!
//! **Purpose:** Keep the wire vocabulary in one crate so that a player
//! engine, a controller surface, or a test harness all speak the same
//! protocol without depending on each other.

pub mod events;
pub mod format;
pub mod frame;
pub mod messages;

pub use events::{ClientEvent, EventBus};
pub use format::{AudioFormat, Codec};
pub use frame::{BinaryFrame, FrameKind};
