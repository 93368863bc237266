//! Long-running session tasks
//!
//! One connected session runs: a writer draining the outbound queue, a
//! transport read loop (text handled inline, binary fanned out to its own
//! task), the scheduler tick loop, the emit-to-sink loop, the clock probe
//! task and the player-report coalescer. Every task is cancellation-safe:
//! it either selects on the shutdown signal or ends when its channel
//! closes.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::playback::{BufferManager, ScheduledChunk};
use crate::sync::now_micros;

use super::{SessionState, Shared};

pub(super) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Delay before a coalesced `player/update` is sent; volume and mute
/// changes landing inside one window produce a single report.
const REPORT_COALESCE: Duration = Duration::from_millis(10);

/// Drain the outbound queue into the websocket.
pub(super) async fn writer_task(
    shared: Arc<Shared>,
    mut rx: mpsc::UnboundedReceiver<Message>,
    mut ws_sink: SplitSink<WsStream, Message>,
) {
    let mut shutdown = shared.subscribe_shutdown();
    if !*shutdown.borrow() {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                msg = rx.recv() => match msg {
                    Some(msg) => {
                        if let Err(e) = ws_sink.send(msg).await {
                            warn!("websocket send failed: {e}");
                            shared.teardown(Some("transport send failure"));
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    }
    let _ = ws_sink.close().await;
    debug!("writer task terminated");
}

/// Receive loop. Text frames are handled inline so protocol state
/// transitions stay serialized; binary frames are forwarded to the
/// decode/schedule task.
pub(super) async fn read_task(
    shared: Arc<Shared>,
    mut ws_stream: SplitStream<WsStream>,
    binary_tx: mpsc::UnboundedSender<Vec<u8>>,
) {
    let mut shutdown = shared.subscribe_shutdown();
    if !*shutdown.borrow() {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                msg = ws_stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => shared.handle_text(&text),
                    Some(Ok(Message::Binary(data))) => {
                        let _ = binary_tx.send(data);
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                        shared.teardown(Some("connection closed"));
                        break;
                    }
                },
            }
        }
    }
    debug!("read task terminated");
}

/// Parse, decode and schedule binary frames. May proceed in parallel with
/// text handling.
pub(super) async fn binary_task(shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    let mut shutdown = shared.subscribe_shutdown();
    if !*shutdown.borrow() {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                data = rx.recv() => match data {
                    Some(data) => shared.handle_binary(&data),
                    None => break,
                },
            }
        }
    }
    debug!("binary task terminated");
}

/// Move emitted chunks into the sink, gated by the back-pressure budget.
/// Ends when the scheduler finishes (its channel closes).
pub(super) async fn emit_task(shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<ScheduledChunk>) {
    let mut buffer = BufferManager::new(shared.config.sink_capacity_bytes);
    while let Some(chunk) = rx.recv().await {
        let now = now_micros();
        buffer.prune(now);

        let len = chunk.pcm.len();
        if !buffer.has_capacity(len) {
            shared
                .counters
                .backpressure_drops
                .fetch_add(1, Ordering::Relaxed);
            if shared.rate_gate.allow("backpressure", now) {
                debug!(in_flight = buffer.used(), "sink budget exhausted, refusing chunk");
            }
            continue;
        }

        let mut sink = shared.sink.lock().unwrap();
        if let Some(sink) = sink.as_mut() {
            let end_time = chunk.play_at_local_us + sink.format().duration_us(len);
            sink.write(&chunk.pcm);
            buffer.register(end_time, len);
        }
    }
    debug!("emit task terminated");
}

/// Clock probes: a short burst right after the handshake seeds offset and
/// drift before audio starts, then one probe per steady-state interval.
pub(super) async fn timesync_task(shared: Arc<Shared>) {
    let mut shutdown = shared.subscribe_shutdown();
    if *shutdown.borrow() {
        return;
    }

    let mut state_rx = shared.state.subscribe();
    let ready = tokio::select! {
        _ = shutdown.changed() => false,
        result = state_rx.wait_for(|s| {
            !matches!(s, SessionState::Connecting | SessionState::HandshakePending)
        }) => match result {
            Ok(state) => matches!(&*state, SessionState::Ready | SessionState::Streaming(_)),
            Err(_) => false,
        },
    };
    if !ready {
        return;
    }

    for _ in 0..shared.config.probe_burst {
        shared.send_time_probe();
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tokio::time::sleep(shared.config.probe_burst_spacing) => {}
        }
    }

    let mut interval = tokio::time::interval(shared.config.probe_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval.tick().await; // burst already seeded the model
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = interval.tick() => shared.send_time_probe(),
        }
    }
}

/// Coalesce player state changes into single `player/update` reports.
pub(super) async fn reporter_task(shared: Arc<Shared>) {
    let mut shutdown = shared.subscribe_shutdown();
    if *shutdown.borrow() {
        return;
    }
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = shared.report_notify.notified() => {
                tokio::time::sleep(REPORT_COALESCE).await;
                // A stored notify permit can wake this task once more after
                // the report went out; the dirty flag makes that a no-op
                if shared.report_dirty.swap(false, Ordering::SeqCst) {
                    shared.send_player_update();
                }
            }
        }
    }
}
