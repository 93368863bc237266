//! # Resonate playback client (resonate-client)
//!
//! Synchronized-playback engine for the Resonate multi-room audio
//! protocol: clock synchronization against the server's monotonic domain,
//! a timestamp-ordered playout scheduler, a codec decode pipeline with
//! back-pressure, and the session controller that drives the protocol
//! state machine over a message-oriented transport.
//!
//! **Architecture:** one session = one websocket connection = a small set
//! of cooperative tokio tasks (receive loops, scheduler tick, emit loop,
//! clock probes, telemetry). Audio-path errors are counted, never raised;
//! lifecycle errors transition the state machine and surface as events.

pub mod audio;
pub mod config;
pub mod error;
pub mod playback;
pub mod session;
pub mod sync;

pub use config::Config;
pub use error::{Error, Result};
pub use session::{SessionController, SessionState, SessionStats, SinkFactory};
