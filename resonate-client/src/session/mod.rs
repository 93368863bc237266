//! Session controller
//!
//! Owns the connection lifecycle: drives the protocol handshake,
//! demultiplexes text and binary traffic, and wires the clock sync,
//! decoder, scheduler and sink together. Text messages are handled on a
//! single task so state transitions stay serialized; binary audio flows
//! through its own task and touches session state only via the clock
//! snapshot and the mutex-guarded queue.

mod tasks;
mod telemetry;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use uuid::Uuid;

use resonate_common::events::{ClientEvent, EventBus};
use resonate_common::format::{AudioFormat, Codec};
use resonate_common::frame::{BinaryFrame, FrameKind};
use resonate_common::messages::{
    ArtworkSupport, ClientHello, ClientMessage, ClientTime, DeviceInfo, PlayerSupport,
    PlayerUpdate, Role, ServerMessage, StreamStart, SyncState, VisualizerSupport,
};

use crate::audio::{AudioSink, CpalSink, SinkFormat, SinkStats, StreamDecoder};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::playback::Scheduler;
use crate::sync::{now_micros, ClockStats, ClockSync};

use telemetry::RateGate;

/// Protocol version advertised in `client/hello`.
const PROTOCOL_VERSION: u32 = 1;

/// Session lifecycle states.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    HandshakePending,
    Ready,
    Streaming(AudioFormat),
    Error(String),
}

/// Aggregated session counters for telemetry and front-ends.
#[derive(Debug, Clone)]
pub struct SessionStats {
    pub scheduler: crate::playback::SchedulerStats,
    pub clock: ClockStats,
    pub sink: Option<SinkStats>,
    pub decode_errors: u64,
    pub backpressure_drops: u64,
    pub auto_starts: u64,
    pub protocol_errors: u64,
}

struct PlayerState {
    volume: f32,
    muted: bool,
}

#[derive(Default)]
struct Counters {
    decode_errors: AtomicU64,
    backpressure_drops: AtomicU64,
    auto_starts: AtomicU64,
    protocol_errors: AtomicU64,
}

/// Factory building an [`AudioSink`] for a negotiated stream format,
/// given the current volume and mute settings. Embedders with their own
/// output path inject one through
/// [`SessionController::connect_with_sink`].
pub type SinkFactory = Box<dyn Fn(SinkFormat, f32, bool) -> Result<Box<dyn AudioSink>> + Send + Sync>;

/// State shared by the controller and its tasks.
struct Shared {
    config: Config,
    state: watch::Sender<SessionState>,
    shutdown: watch::Sender<bool>,
    clock: Arc<ClockSync>,
    scheduler: Arc<Scheduler>,
    events: EventBus,
    outbound: mpsc::UnboundedSender<Message>,
    player: Mutex<PlayerState>,
    report_notify: Notify,
    report_dirty: AtomicBool,
    counters: Counters,
    rate_gate: RateGate,
    /// Guards the once-per-stream fallback-format synthesis
    auto_starting: AtomicBool,
    decoder: Mutex<Option<StreamDecoder>>,
    sink: Mutex<Option<Box<dyn AudioSink>>>,
    sink_factory: SinkFactory,
}

impl Shared {
    fn new(
        config: Config,
        outbound: mpsc::UnboundedSender<Message>,
        sink_factory: SinkFactory,
    ) -> Self {
        let clock = Arc::new(ClockSync::new());
        let scheduler = Arc::new(Scheduler::new(Arc::clone(&clock)));
        let initial_volume = config.initial_volume.clamp(0.0, 1.0);
        Self {
            config,
            state: watch::Sender::new(SessionState::Disconnected),
            shutdown: watch::Sender::new(false),
            clock,
            scheduler,
            events: EventBus::default(),
            outbound,
            player: Mutex::new(PlayerState {
                volume: initial_volume,
                muted: false,
            }),
            report_notify: Notify::new(),
            report_dirty: AtomicBool::new(false),
            counters: Counters::default(),
            rate_gate: RateGate::new(),
            auto_starting: AtomicBool::new(false),
            decoder: Mutex::new(None),
            sink: Mutex::new(None),
            sink_factory,
        }
    }

    fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    fn set_state(&self, state: SessionState) {
        debug!(?state, "session state");
        self.state.send_replace(state);
    }

    fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    fn send_message(&self, msg: &ClientMessage) {
        match msg.to_json() {
            Ok(json) => {
                let _ = self.outbound.send(Message::Text(json));
            }
            Err(e) => warn!("failed to encode message: {e}"),
        }
    }

    fn send_hello(&self) {
        self.send_message(&ClientMessage::Hello(ClientHello {
            client_id: Uuid::new_v4().to_string(),
            name: self.config.name.clone(),
            device_info: Some(DeviceInfo {
                product: Some(env!("CARGO_PKG_NAME").to_string()),
                os: Some(std::env::consts::OS.to_string()),
            }),
            version: PROTOCOL_VERSION,
            supported_roles: vec![Role::Player, Role::Artwork, Role::Visualizer],
            player_support: Some(PlayerSupport {
                supported_formats: vec![Codec::Pcm, Codec::Opus, Codec::Flac],
            }),
            artwork_support: Some(ArtworkSupport { channels: 4 }),
            visualizer_support: Some(VisualizerSupport { enabled: true }),
        }));
    }

    fn send_time_probe(&self) {
        self.send_message(&ClientMessage::Time(ClientTime {
            client_transmitted: now_micros(),
        }));
    }

    fn send_player_update(&self) {
        let (volume, muted) = {
            let player = self.player.lock().unwrap();
            (player.volume, player.muted)
        };
        let state = match self.state() {
            SessionState::Error(_) => SyncState::Error,
            _ => SyncState::Synchronized,
        };
        self.send_message(&ClientMessage::PlayerUpdate(PlayerUpdate {
            state,
            volume: (volume * 100.0).round() as u8,
            muted,
        }));
    }

    /// Handle one text frame. Runs on a single task, serializing all
    /// state transitions.
    fn handle_text(&self, text: &str) {
        let msg = match ServerMessage::parse(text) {
            Ok(Some(msg)) => msg,
            Ok(None) => {
                self.counters.protocol_errors.fetch_add(1, Ordering::Relaxed);
                debug!("ignoring unknown message type");
                return;
            }
            Err(e) => {
                self.counters.protocol_errors.fetch_add(1, Ordering::Relaxed);
                if self.rate_gate.allow("malformed-text", now_micros()) {
                    warn!("malformed text message: {e}");
                }
                return;
            }
        };

        match msg {
            ServerMessage::Hello(hello) => {
                if self.state() != SessionState::HandshakePending {
                    debug!("unexpected server/hello, ignoring");
                    return;
                }
                info!(server = %hello.name, server_id = %hello.server_id, "handshake complete");
                self.set_state(SessionState::Ready);
                self.events.emit_lossy(ClientEvent::ServerConnected(hello));
                self.send_player_update();
            }
            ServerMessage::Time(time) => {
                self.clock.process_sample(
                    time.client_transmitted,
                    time.server_received,
                    time.server_transmitted,
                    now_micros(),
                );
            }
            ServerMessage::StreamStart(start) => self.handle_stream_start(start),
            ServerMessage::StreamEnd(_) => self.handle_stream_end(),
            ServerMessage::GroupUpdate(group) => {
                self.events.emit_lossy(ClientEvent::GroupUpdated {
                    group_id: group.group_id,
                    group_name: group.group_name,
                    playback_state: group.playback_state,
                });
            }
            ServerMessage::SessionUpdate(update) => {
                self.events.emit_lossy(ClientEvent::GroupUpdated {
                    group_id: update.group_id,
                    group_name: None,
                    playback_state: update.playback_state,
                });
            }
        }
    }

    fn handle_stream_start(&self, start: StreamStart) {
        let Some(player) = start.player else {
            // Stream targets artwork/visualizer roles only
            debug!("stream/start without player section");
            return;
        };

        let header = match player.codec_header_bytes() {
            Ok(header) => header,
            Err(e) => {
                self.enter_error(format!("invalid codec header: {e}"));
                return;
            }
        };

        let format = player.format();
        if let Err(e) = self.start_stream(format, header.as_deref()) {
            self.enter_error(e.to_string());
        }
    }

    /// Build the decoder and sink for `format` and move to `Streaming`.
    fn start_stream(&self, format: AudioFormat, codec_header: Option<&[u8]>) -> Result<()> {
        let decoder = StreamDecoder::new(&format, codec_header)?;
        let sink_format = decoder.output_format();
        let (volume, muted) = {
            let player = self.player.lock().unwrap();
            (player.volume, player.muted)
        };
        let sink = (self.sink_factory)(sink_format, volume, muted)?;

        if let Some(mut old) = self.sink.lock().unwrap().replace(sink) {
            old.stop();
        }
        *self.decoder.lock().unwrap() = Some(decoder);

        self.scheduler.clear();
        self.scheduler.start();
        self.auto_starting.store(false, Ordering::SeqCst);

        info!(%format, "stream started");
        self.set_state(SessionState::Streaming(format));
        self.events.emit_lossy(ClientEvent::StreamStarted(format));
        self.send_player_update();
        Ok(())
    }

    fn handle_stream_end(&self) {
        if !matches!(self.state(), SessionState::Streaming(_)) {
            debug!("stream/end outside a stream, ignoring");
            return;
        }
        info!("stream ended");
        self.scheduler.stop();
        self.scheduler.clear();
        if let Some(mut sink) = self.sink.lock().unwrap().take() {
            sink.stop();
        }
        *self.decoder.lock().unwrap() = None;
        self.auto_starting.store(false, Ordering::SeqCst);
        self.set_state(SessionState::Ready);
        self.events.emit_lossy(ClientEvent::StreamEnded);
    }

    /// Handle one binary frame. May run concurrently with text handling;
    /// everything it touches is snapshot- or mutex-protected.
    fn handle_binary(&self, data: &[u8]) {
        let Some(frame) = BinaryFrame::decode(data) else {
            self.counters.protocol_errors.fetch_add(1, Ordering::Relaxed);
            if self.rate_gate.allow("malformed-binary", now_micros()) {
                debug!(len = data.len(), "dropping malformed binary frame");
            }
            return;
        };

        match frame.kind {
            FrameKind::AudioChunk => self.ingest_audio(frame),
            FrameKind::Artwork(channel) => {
                self.events.emit_lossy(ClientEvent::ArtworkReceived {
                    channel,
                    data: frame.payload,
                });
            }
            FrameKind::Visualizer => {
                self.events
                    .emit_lossy(ClientEvent::VisualizerData(frame.payload));
            }
        }
    }

    fn ingest_audio(&self, frame: BinaryFrame) {
        if !matches!(self.state(), SessionState::Streaming(_)) {
            // Some servers omit stream/start; synthesize the fallback
            // format exactly once per stream
            if self.auto_starting.swap(true, Ordering::SeqCst) {
                return;
            }
            self.counters.auto_starts.fetch_add(1, Ordering::Relaxed);
            warn!("audio chunk before stream/start; auto-starting with fallback format");
            if let Err(e) = self.start_stream(AudioFormat::fallback(), None) {
                self.enter_error(e.to_string());
                return;
            }
        }

        let mut decoder = self.decoder.lock().unwrap();
        let Some(decoder) = decoder.as_mut() else {
            return;
        };
        match decoder.decode(&frame.payload) {
            Ok(pcm) => self.scheduler.schedule(pcm, frame.server_ts_us),
            Err(e) => {
                self.counters.decode_errors.fetch_add(1, Ordering::Relaxed);
                if self.rate_gate.allow("decode", now_micros()) {
                    warn!("dropping undecodable chunk: {e}");
                }
            }
        }
    }

    fn enter_error(&self, reason: String) {
        warn!(%reason, "entering error state");
        self.set_state(SessionState::Error(reason.clone()));
        self.send_player_update();
        self.events.emit_lossy(ClientEvent::Error(reason));
    }

    /// Stop the pipeline and move to `Disconnected`. Idempotent; safe
    /// from any task.
    fn teardown(&self, reason: Option<&str>) {
        if self.state() == SessionState::Disconnected {
            return;
        }
        let _ = self.shutdown.send(true);
        self.scheduler.finish();
        if let Some(mut sink) = self.sink.lock().unwrap().take() {
            sink.stop();
        }
        *self.decoder.lock().unwrap() = None;
        if let Some(reason) = reason {
            self.events.emit_lossy(ClientEvent::Error(reason.to_string()));
        }
        self.set_state(SessionState::Disconnected);
    }

    fn stats(&self) -> SessionStats {
        SessionStats {
            scheduler: self.scheduler.stats(),
            clock: self.clock.stats(),
            sink: self.sink.lock().unwrap().as_ref().map(|s| s.stats()),
            decode_errors: self.counters.decode_errors.load(Ordering::Relaxed),
            backpressure_drops: self.counters.backpressure_drops.load(Ordering::Relaxed),
            auto_starts: self.counters.auto_starts.load(Ordering::Relaxed),
            protocol_errors: self.counters.protocol_errors.load(Ordering::Relaxed),
        }
    }
}

/// Handle to a connected session.
///
/// Workers never hold a reference back to the controller; front-ends
/// observe the session through the event subscription.
pub struct SessionController {
    shared: Arc<Shared>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl SessionController {
    /// Connect to a Resonate server, complete the handshake, and start
    /// the session tasks. Returns once the session is `Ready`.
    pub async fn connect(config: Config, url: &str) -> Result<Self> {
        let device = config.device.clone();
        let factory: SinkFactory = Box::new(move |format, volume, muted| {
            Ok(Box::new(CpalSink::new(format, device.clone(), volume, muted)?))
        });
        Self::connect_with_sink(config, url, factory).await
    }

    /// [`connect`](Self::connect) with a caller-supplied sink factory,
    /// for embedders that own their audio output path.
    pub async fn connect_with_sink(
        config: Config,
        url: &str,
        sink_factory: SinkFactory,
    ) -> Result<Self> {
        crate::sync::init_local_clock();
        info!(url, name = %config.name, "connecting");

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new(config, outbound_tx, sink_factory));
        shared.set_state(SessionState::Connecting);

        let ws = match tokio::time::timeout(shared.config.handshake_timeout, connect_async(url))
            .await
        {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(e)) => {
                shared.set_state(SessionState::Disconnected);
                return Err(Error::WebSocket(e));
            }
            Err(_) => {
                shared.set_state(SessionState::Disconnected);
                return Err(Error::Handshake("connection attempt timed out".into()));
            }
        };

        info!("transport up, sending client/hello");
        shared.set_state(SessionState::HandshakePending);
        let (ws_sink, ws_stream) = ws.split();

        let (binary_tx, binary_rx) = mpsc::unbounded_channel();
        let emitted = shared
            .scheduler
            .take_emitted()
            .ok_or_else(|| Error::InvalidState("scheduler output already taken".into()))?;

        let tasks = vec![
            tokio::spawn(tasks::writer_task(Arc::clone(&shared), outbound_rx, ws_sink)),
            tokio::spawn(tasks::read_task(Arc::clone(&shared), ws_stream, binary_tx)),
            tokio::spawn(tasks::binary_task(Arc::clone(&shared), binary_rx)),
            tokio::spawn(Arc::clone(&shared.scheduler).run_ticker()),
            tokio::spawn(tasks::emit_task(Arc::clone(&shared), emitted)),
            tokio::spawn(tasks::timesync_task(Arc::clone(&shared))),
            tokio::spawn(tasks::reporter_task(Arc::clone(&shared))),
            tokio::spawn(telemetry::telemetry_task(Arc::clone(&shared))),
        ];
        let controller = Self {
            shared: Arc::clone(&shared),
            tasks: Mutex::new(tasks),
        };

        controller.shared.send_hello();

        let mut state_rx = controller.shared.state.subscribe();
        let settled = tokio::time::timeout(
            controller.shared.config.handshake_timeout,
            state_rx.wait_for(|s| {
                matches!(
                    s,
                    SessionState::Ready | SessionState::Error(_) | SessionState::Disconnected
                )
            }),
        )
        .await;

        let outcome = match settled {
            Ok(Ok(state)) => state.clone(),
            Ok(Err(_)) | Err(_) => {
                controller.disconnect();
                return Err(Error::Handshake("no server/hello within timeout".into()));
            }
        };
        match outcome {
            SessionState::Ready => Ok(controller),
            SessionState::Error(reason) => {
                controller.disconnect();
                Err(Error::Handshake(reason))
            }
            _ => {
                controller.disconnect();
                Err(Error::Connection("transport lost during handshake".into()))
            }
        }
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Subscribe to the session's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.events.subscribe()
    }

    /// Watch state transitions (e.g. to wait for `Streaming`).
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Set playback volume. Clamped to 0.0..=1.0; the server is informed
    /// through a coalesced `player/update`.
    pub fn set_volume(&self, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        self.shared.player.lock().unwrap().volume = volume;
        if let Some(sink) = self.shared.sink.lock().unwrap().as_mut() {
            sink.set_volume(volume);
        }
        self.shared.report_dirty.store(true, Ordering::SeqCst);
        self.shared.report_notify.notify_one();
    }

    /// Mute or unmute playback.
    pub fn set_muted(&self, muted: bool) {
        self.shared.player.lock().unwrap().muted = muted;
        if let Some(sink) = self.shared.sink.lock().unwrap().as_mut() {
            sink.set_muted(muted);
        }
        self.shared.report_dirty.store(true, Ordering::SeqCst);
        self.shared.report_notify.notify_one();
    }

    pub fn volume(&self) -> f32 {
        self.shared.player.lock().unwrap().volume
    }

    pub fn muted(&self) -> bool {
        self.shared.player.lock().unwrap().muted
    }

    /// Aggregated pipeline counters.
    pub fn stats(&self) -> SessionStats {
        self.shared.stats()
    }

    /// Tear the session down. Idempotent: repeated calls are
    /// observationally equivalent to one.
    pub fn disconnect(&self) {
        self.shared.teardown(None);
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.disconnect();
    }
}
