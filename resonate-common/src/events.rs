//! Client event types and event bus
//!
//! Front-ends observe the session through a broadcast event stream rather
//! than back-pointers into the engine. The bus wraps `tokio::sync::broadcast`
//! so emission never blocks and slow subscribers lag rather than stall the
//! audio path.

use tokio::sync::broadcast;

use crate::format::AudioFormat;
use crate::messages::ServerHello;

/// Events surfaced by a client session.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Handshake completed; carries the server's identity
    ServerConnected(ServerHello),
    /// A stream with a player section started (or was auto-started)
    StreamStarted(AudioFormat),
    /// The current stream ended
    StreamEnded,
    /// Group or session membership/metadata changed
    GroupUpdated {
        group_id: Option<String>,
        group_name: Option<String>,
        playback_state: Option<String>,
    },
    /// Artwork bytes for one of the four artwork channels
    ArtworkReceived { channel: u8, data: Vec<u8> },
    /// Visualizer side-channel bytes
    VisualizerData(Vec<u8>),
    /// Protocol or lifecycle error (audio-path errors are counted, not raised)
    Error(String),
}

/// Broadcast bus for [`ClientEvent`].
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<ClientEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. Errors only when there are no subscribers.
    pub fn emit(&self, event: ClientEvent) -> Result<usize, broadcast::error::SendError<ClientEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, silently dropping it when nobody listens.
    pub fn emit_lossy(&self, event: ClientEvent) {
        let _ = self.tx.send(event);
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(128)
    }
}
