//! Full-session test against a loopback websocket server
//!
//! A scripted server drives the real handshake, answers clock probes from
//! a non-zero monotonic epoch, starts a PCM stream, and ends it. The
//! client runs its production task set; only the audio device is
//! replaced by a recording sink.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};

use resonate_client::audio::{AudioSink, SinkFormat, SinkStats};
use resonate_client::{Config, SessionController, SessionState, SinkFactory};
use resonate_common::frame::{BinaryFrame, FrameKind};
use resonate_common::messages::{
    ClientMessage, PlayerStart, ServerHello, ServerMessage, ServerTime, StreamEnd, StreamStart,
    SyncState,
};
use resonate_common::Codec;

/// Server monotonic epoch: the server has been up for a week.
const SERVER_EPOCH_US: i64 = 650_000_000_000;
/// 1 ms of 48 kHz stereo 16-bit PCM.
const CHUNK_BYTES: usize = 48 * 4;
const CHUNK_COUNT: usize = 3;

struct RecordingSink {
    format: SinkFormat,
    written: Arc<AtomicU64>,
}

impl AudioSink for RecordingSink {
    fn format(&self) -> SinkFormat {
        self.format
    }
    fn write(&mut self, pcm: &[u8]) -> usize {
        self.written.fetch_add(pcm.len() as u64, Ordering::SeqCst);
        pcm.len()
    }
    fn set_volume(&mut self, _volume: f32) {}
    fn set_muted(&mut self, _muted: bool) {}
    fn stats(&self) -> SinkStats {
        SinkStats::default()
    }
    fn stop(&mut self) {}
}

fn text(msg: &ServerMessage) -> Message {
    Message::Text(serde_json::to_string(msg).unwrap())
}

/// Scripted server: hello, probe replies, one PCM stream, stream end.
async fn server_session(stream: TcpStream, updates: mpsc::UnboundedSender<ClientMessage>) {
    let mut ws = accept_async(stream).await.unwrap();
    let epoch = std::time::Instant::now();
    let server_now = move || SERVER_EPOCH_US + epoch.elapsed().as_micros() as i64;

    let mut stream_sent = false;
    let mut end_due: Option<tokio::time::Instant> = None;
    let mut ended = false;

    loop {
        tokio::select! {
            _ = async { tokio::time::sleep_until(end_due.unwrap()).await },
                    if end_due.is_some() && !ended => {
                ended = true;
                end_due = None;
                ws.send(text(&ServerMessage::StreamEnd(StreamEnd {}))).await.unwrap();
            }
            msg = ws.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    _ => break,
                };
                match msg {
                    Message::Text(raw) => {
                        let parsed: ClientMessage = serde_json::from_str(&raw).unwrap();
                        let _ = updates.send(parsed.clone());
                        match parsed {
                            ClientMessage::Hello(_) => {
                                ws.send(text(&ServerMessage::Hello(ServerHello {
                                    server_id: "srv-e2e".into(),
                                    name: "loopback".into(),
                                    version: 1,
                                })))
                                .await
                                .unwrap();
                            }
                            ClientMessage::Time(t) => {
                                let now = server_now();
                                ws.send(text(&ServerMessage::Time(ServerTime {
                                    client_transmitted: t.client_transmitted,
                                    server_received: now,
                                    server_transmitted: now,
                                })))
                                .await
                                .unwrap();

                                // First probe reply seeds the client clock;
                                // only then are chunk timestamps meaningful
                                if !stream_sent {
                                    stream_sent = true;
                                    ws.send(text(&ServerMessage::StreamStart(StreamStart {
                                        player: Some(PlayerStart {
                                            codec: Codec::Pcm,
                                            sample_rate: 48_000,
                                            channels: 2,
                                            bit_depth: 16,
                                            codec_header: None,
                                        }),
                                        artwork: None,
                                        visualizer: None,
                                    })))
                                    .await
                                    .unwrap();

                                    for i in 0..CHUNK_COUNT {
                                        let frame = BinaryFrame {
                                            kind: FrameKind::AudioChunk,
                                            server_ts_us: server_now()
                                                + 150_000
                                                + (i as i64) * 20_000,
                                            payload: vec![0x5A; CHUNK_BYTES],
                                        };
                                        ws.send(Message::Binary(frame.encode())).await.unwrap();
                                    }
                                    end_due = Some(
                                        tokio::time::Instant::now()
                                            + Duration::from_millis(1500),
                                    );
                                }
                            }
                            ClientMessage::PlayerUpdate(_) => {}
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }
}

#[tokio::test]
async fn full_session_against_loopback_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (updates_tx, mut updates_rx) = mpsc::unbounded_channel();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        server_session(stream, updates_tx).await;
    });

    let written = Arc::new(AtomicU64::new(0));
    let written_factory = Arc::clone(&written);
    let factory: SinkFactory = Box::new(move |format, _volume, _muted| {
        Ok(Box::new(RecordingSink {
            format,
            written: Arc::clone(&written_factory),
        }))
    });

    let session = SessionController::connect_with_sink(
        Config::with_name("e2e-client"),
        &format!("ws://{addr}"),
        factory,
    )
    .await
    .expect("handshake should complete");

    let mut state_rx = session.watch_state();

    // The stream starts once the first probe reply seeds the clock
    tokio::time::timeout(
        Duration::from_secs(2),
        state_rx.wait_for(|s| matches!(s, SessionState::Streaming(_))),
    )
    .await
    .expect("stream/start within 2s")
    .unwrap();

    // All chunks must reach the sink at their local play-out times
    let expected = (CHUNK_BYTES * CHUNK_COUNT) as u64;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while written.load(Ordering::SeqCst) < expected && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(written.load(Ordering::SeqCst), expected);

    let stats = session.stats();
    assert!(stats.clock.samples >= 1, "clock must be seeded");
    assert_eq!(stats.scheduler.received, CHUNK_COUNT as u64);
    assert_eq!(stats.scheduler.played, CHUNK_COUNT as u64);
    assert_eq!(stats.decode_errors, 0);
    assert_eq!(stats.auto_starts, 0);

    // Stream end returns the session to Ready
    tokio::time::timeout(
        Duration::from_secs(3),
        state_rx.wait_for(|s| *s == SessionState::Ready),
    )
    .await
    .expect("stream/end within 3s")
    .unwrap();

    // Drain the player updates sent so far (handshake + stream start)
    let mut reports = Vec::new();
    while let Ok(msg) = updates_rx.try_recv() {
        if let ClientMessage::PlayerUpdate(update) = msg {
            reports.push(update);
        }
    }
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.state == SyncState::Synchronized));
    assert_eq!(reports[0].volume, 100);

    // Volume and mute changed in one action coalesce into a single report
    session.set_volume(0.5);
    session.set_muted(true);
    let coalesced = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            if let Some(ClientMessage::PlayerUpdate(update)) = updates_rx.recv().await {
                return update;
            }
        }
    })
    .await
    .expect("coalesced player/update");
    assert_eq!(coalesced.volume, 50);
    assert!(coalesced.muted);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(
        updates_rx.try_recv().is_err(),
        "volume+mute must produce one report"
    );

    // Disconnect is idempotent
    session.disconnect();
    session.disconnect();
    assert_eq!(session.state(), SessionState::Disconnected);

    server.abort();
    let _ = server.await;
}

#[tokio::test]
async fn connect_fails_fast_when_nobody_listens() {
    // Grab a port that is guaranteed closed
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = Config::with_name("nobody");
    config.handshake_timeout = Duration::from_millis(500);
    let factory: SinkFactory = Box::new(|_format, _volume, _muted| {
        panic!("sink must not be built without a stream");
    });
    let result =
        SessionController::connect_with_sink(config, &format!("ws://{addr}"), factory).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn auto_start_when_server_omits_stream_start() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let epoch = std::time::Instant::now();
        let server_now = move || SERVER_EPOCH_US + epoch.elapsed().as_micros() as i64;

        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(raw) = msg {
                let parsed: ClientMessage = serde_json::from_str(&raw).unwrap();
                match parsed {
                    ClientMessage::Hello(_) => {
                        ws.send(text(&ServerMessage::Hello(ServerHello {
                            server_id: "srv-auto".into(),
                            name: "auto".into(),
                            version: 1,
                        })))
                        .await
                        .unwrap();
                    }
                    ClientMessage::Time(t) => {
                        let now = server_now();
                        ws.send(text(&ServerMessage::Time(ServerTime {
                            client_transmitted: t.client_transmitted,
                            server_received: now,
                            server_transmitted: now,
                        })))
                        .await
                        .unwrap();
                        // No stream/start: straight to audio
                        let frame = BinaryFrame {
                            kind: FrameKind::AudioChunk,
                            server_ts_us: server_now() + 100_000,
                            payload: vec![0x11; CHUNK_BYTES],
                        };
                        ws.send(Message::Binary(frame.encode())).await.unwrap();
                    }
                    ClientMessage::PlayerUpdate(_) => {}
                }
            }
        }
    });

    let formats = Arc::new(Mutex::new(Vec::new()));
    let formats_factory = Arc::clone(&formats);
    let factory: SinkFactory = Box::new(move |format, _volume, _muted| {
        formats_factory.lock().unwrap().push(format);
        Ok(Box::new(RecordingSink {
            format,
            written: Arc::new(AtomicU64::new(0)),
        }))
    });

    let session = SessionController::connect_with_sink(
        Config::with_name("auto-client"),
        &format!("ws://{addr}"),
        factory,
    )
    .await
    .unwrap();

    let mut state_rx = session.watch_state();
    tokio::time::timeout(
        Duration::from_secs(2),
        state_rx.wait_for(|s| matches!(s, SessionState::Streaming(_))),
    )
    .await
    .expect("auto-start within 2s")
    .unwrap();

    match session.state() {
        SessionState::Streaming(fmt) => {
            assert_eq!(fmt, resonate_common::AudioFormat::fallback());
        }
        other => panic!("expected streaming, got {other:?}"),
    }
    assert_eq!(session.stats().auto_starts, 1);
    // The sink was built exactly once, for the fallback format
    assert_eq!(formats.lock().unwrap().len(), 1);

    session.disconnect();
    server.abort();
    let _ = server.await;
}
