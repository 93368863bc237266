//! Error types for resonate-client
//!
//! Defines module-specific error types using thiserror for clear error
//! propagation. Audio-pipeline failures (decode, schedule, back-pressure)
//! never travel through this enum past the session boundary; they are
//! counted and reported by telemetry instead.

use resonate_common::format::Codec;
use thiserror::Error;

/// Main error type for resonate-client
#[derive(Error, Debug)]
pub enum Error {
    /// Transport could not be established or was lost
    #[error("connection error: {0}")]
    Connection(String),

    /// Handshake did not complete (timeout or protocol violation)
    #[error("handshake error: {0}")]
    Handshake(String),

    /// Malformed or out-of-contract protocol traffic
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Codec frame could not be decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// `stream/start` announced a codec this client cannot play
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(Codec),

    /// Audio device could not be opened or driven
    #[error("audio output error: {0}")]
    AudioOutput(String),

    /// Operation invalid in the current session state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Websocket-level failures
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON encode/decode failures on the control channel
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// File and socket I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type using resonate-client Error
pub type Result<T> = std::result::Result<T, Error>;
