//! Session protocol messages
//!
//! JSON text messages use an adjacently tagged envelope:
//!
//! ```json
//! { "type": "client/hello", "payload": { ... } }
//! ```
//!
//! All field names are `snake_case` on the wire. [`ClientMessage`] covers
//! the client-to-server direction, [`ServerMessage`] the reverse. Unknown
//! message types are tolerated: [`ServerMessage::parse`] distinguishes
//! them from malformed JSON so callers can ignore the former quietly.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};

use crate::format::{AudioFormat, Codec};

/// Roles a client may advertise in `client/hello`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Player,
    Controller,
    Metadata,
    Artwork,
    Visualizer,
}

/// Player synchronization state reported in `player/update`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Synchronized,
    Error,
}

/// Messages sent client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientMessage {
    #[serde(rename = "client/hello")]
    Hello(ClientHello),
    #[serde(rename = "client/time")]
    Time(ClientTime),
    #[serde(rename = "player/update")]
    PlayerUpdate(PlayerUpdate),
}

impl ClientMessage {
    /// Serialize to the wire envelope.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Messages received server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerMessage {
    #[serde(rename = "server/hello")]
    Hello(ServerHello),
    #[serde(rename = "server/time")]
    Time(ServerTime),
    #[serde(rename = "stream/start")]
    StreamStart(StreamStart),
    #[serde(rename = "stream/end")]
    StreamEnd(StreamEnd),
    #[serde(rename = "group/update")]
    GroupUpdate(GroupUpdate),
    #[serde(rename = "session/update")]
    SessionUpdate(SessionUpdate),
}

/// Envelope used only to classify messages that fail full parsing.
#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
}

impl ServerMessage {
    /// Parse a text frame.
    ///
    /// - `Ok(Some(msg))`: a recognized message
    /// - `Ok(None)`: well-formed envelope with an unrecognized type
    ///   (forward compatibility: callers ignore it)
    /// - `Err(_)`: malformed JSON or a recognized type with a bad payload
    pub fn parse(text: &str) -> serde_json::Result<Option<Self>> {
        match serde_json::from_str::<Self>(text) {
            Ok(msg) => Ok(Some(msg)),
            Err(err) => match serde_json::from_str::<Envelope>(text) {
                Ok(env) if !Self::is_known_type(&env.kind) => Ok(None),
                _ => Err(err),
            },
        }
    }

    fn is_known_type(kind: &str) -> bool {
        matches!(
            kind,
            "server/hello"
                | "server/time"
                | "stream/start"
                | "stream/end"
                | "group/update"
                | "session/update"
        )
    }
}

/// `client/hello` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientHello {
    pub client_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_info: Option<DeviceInfo>,
    pub version: u32,
    pub supported_roles: Vec<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_support: Option<PlayerSupport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artwork_support: Option<ArtworkSupport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visualizer_support: Option<VisualizerSupport>,
}

/// Optional device description in `client/hello`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
}

/// Player capabilities.
///
/// `supported_formats` must only list codecs whose decoders are actually
/// linked into the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSupport {
    pub supported_formats: Vec<Codec>,
}

/// Artwork capabilities (number of artwork channels the client renders).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtworkSupport {
    pub channels: u8,
}

/// Visualizer capabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualizerSupport {
    pub enabled: bool,
}

/// `server/hello` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerHello {
    pub server_id: String,
    pub name: String,
    pub version: u32,
}

/// `client/time` payload. The timestamp lives in the client's
/// process-start monotonic domain, mirroring the server's own domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientTime {
    pub client_transmitted: i64,
}

/// `server/time` payload: the echo plus the server-side receive/transmit
/// stamps of an NTP-style exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerTime {
    pub client_transmitted: i64,
    pub server_received: i64,
    pub server_transmitted: i64,
}

/// `player/update` payload. Volume is an integer percentage on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerUpdate {
    pub state: SyncState,
    pub volume: u8,
    pub muted: bool,
}

/// `stream/start` payload. Role sections are independent; a start without
/// a `player` section targets artwork/visualizer clients only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamStart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player: Option<PlayerStart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artwork: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visualizer: Option<serde_json::Value>,
}

/// Player section of `stream/start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerStart {
    pub codec: Codec,
    pub sample_rate: u32,
    pub channels: u8,
    pub bit_depth: u8,
    /// Codec initialization blob (e.g. FLAC STREAMINFO), base64 on the wire
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec_header: Option<String>,
}

impl PlayerStart {
    /// The stream format this section describes.
    pub fn format(&self) -> AudioFormat {
        AudioFormat {
            codec: self.codec,
            channels: self.channels,
            sample_rate: self.sample_rate,
            bit_depth: self.bit_depth,
        }
    }

    /// Decode the base64 codec header, if present.
    pub fn codec_header_bytes(&self) -> Result<Option<Vec<u8>>, base64::DecodeError> {
        self.codec_header
            .as_deref()
            .map(|raw| BASE64.decode(raw))
            .transpose()
    }
}

/// `stream/end` payload (empty object on the wire).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEnd {}

/// `group/update` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playback_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
}

/// `session/update` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playback_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<SessionMetadata>,
}

/// Now-playing metadata; every field optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artwork_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_server(msg: ServerMessage) {
        let json = serde_json::to_string(&msg).unwrap();
        let back: ServerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    fn roundtrip_client(msg: ClientMessage) {
        let json = msg.to_json().unwrap();
        let back: ClientMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_client_hello_roundtrip() {
        roundtrip_client(ClientMessage::Hello(ClientHello {
            client_id: "8b2f6f3e-2f6e-4f68-9d3a-000000000001".into(),
            name: "kitchen".into(),
            device_info: Some(DeviceInfo {
                product: Some("resonate-client".into()),
                os: Some("linux".into()),
            }),
            version: 1,
            supported_roles: vec![Role::Player, Role::Artwork, Role::Visualizer],
            player_support: Some(PlayerSupport {
                supported_formats: vec![Codec::Pcm, Codec::Opus, Codec::Flac],
            }),
            artwork_support: Some(ArtworkSupport { channels: 4 }),
            visualizer_support: Some(VisualizerSupport { enabled: true }),
        }));
    }

    #[test]
    fn test_time_messages_roundtrip() {
        roundtrip_client(ClientMessage::Time(ClientTime {
            client_transmitted: 123_456,
        }));
        roundtrip_server(ServerMessage::Time(ServerTime {
            client_transmitted: 123_456,
            server_received: 900_000_123,
            server_transmitted: 900_000_456,
        }));
    }

    #[test]
    fn test_player_update_roundtrip() {
        roundtrip_client(ClientMessage::PlayerUpdate(PlayerUpdate {
            state: SyncState::Synchronized,
            volume: 73,
            muted: false,
        }));
    }

    #[test]
    fn test_stream_messages_roundtrip() {
        roundtrip_server(ServerMessage::StreamStart(StreamStart {
            player: Some(PlayerStart {
                codec: Codec::Flac,
                sample_rate: 48_000,
                channels: 2,
                bit_depth: 24,
                codec_header: Some(BASE64.encode(b"fLaC....")),
            }),
            artwork: None,
            visualizer: None,
        }));
        roundtrip_server(ServerMessage::StreamEnd(StreamEnd {}));
        roundtrip_server(ServerMessage::Hello(ServerHello {
            server_id: "srv-1".into(),
            name: "living room".into(),
            version: 1,
        }));
        roundtrip_server(ServerMessage::GroupUpdate(GroupUpdate {
            playback_state: Some("playing".into()),
            group_id: Some("g1".into()),
            group_name: None,
        }));
        roundtrip_server(ServerMessage::SessionUpdate(SessionUpdate {
            group_id: None,
            playback_state: None,
            metadata: Some(SessionMetadata {
                title: Some("Song".into()),
                ..Default::default()
            }),
        }));
    }

    #[test]
    fn test_wire_shape_is_snake_case_envelope() {
        let json = ClientMessage::Time(ClientTime { client_transmitted: 7 })
            .to_json()
            .unwrap();
        assert_eq!(json, r#"{"type":"client/time","payload":{"client_transmitted":7}}"#);
    }

    #[test]
    fn test_sync_state_wire_names() {
        let update = ClientMessage::PlayerUpdate(PlayerUpdate {
            state: SyncState::Error,
            volume: 0,
            muted: true,
        });
        assert!(update.to_json().unwrap().contains(r#""state":"error""#));
    }

    #[test]
    fn test_parse_unknown_type_is_ignored() {
        let parsed = ServerMessage::parse(r#"{"type":"server/surprise","payload":{}}"#).unwrap();
        assert!(parsed.is_none());
    }

    #[test]
    fn test_parse_malformed_json_is_error() {
        assert!(ServerMessage::parse("{nope").is_err());
        // Known type with an invalid payload is an error, not "unknown"
        assert!(ServerMessage::parse(r#"{"type":"server/time","payload":{"bad":1}}"#).is_err());
    }

    #[test]
    fn test_stream_end_empty_payload() {
        let msg = ServerMessage::parse(r#"{"type":"stream/end","payload":{}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(msg, ServerMessage::StreamEnd(StreamEnd {}));
    }

    #[test]
    fn test_codec_header_base64() {
        let start = PlayerStart {
            codec: Codec::Flac,
            sample_rate: 44_100,
            channels: 2,
            bit_depth: 16,
            codec_header: Some(BASE64.encode([0x10, 0x20, 0x30])),
        };
        assert_eq!(
            start.codec_header_bytes().unwrap(),
            Some(vec![0x10, 0x20, 0x30])
        );

        let bad = PlayerStart {
            codec_header: Some("!!not base64!!".into()),
            ..start
        };
        assert!(bad.codec_header_bytes().is_err());
    }
}
