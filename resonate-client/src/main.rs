//! Resonate playback client CLI
//!
//! Connects to a Resonate server, plays the synchronized audio program,
//! and prints session events. Service discovery is an external concern:
//! pass a `ws://host:port/resonate` URL produced by your resolver.

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use resonate_client::{Config, SessionController, SessionState};
use resonate_common::events::ClientEvent;

/// Resonate synchronized multi-room audio client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server URL, e.g. ws://192.168.1.10:8927/resonate
    url: Option<String>,

    /// Client name announced to the server
    name: Option<String>,

    /// Audio output device name (system default if omitted)
    #[arg(long, value_name = "DEVICE")]
    device: Option<String>,

    /// Initial volume percentage (0-100)
    #[arg(long, default_value_t = 100)]
    volume: u8,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("resonate_client={log_level},resonate_common={log_level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let url = args.url.ok_or_else(|| {
        anyhow::anyhow!("no server URL given (run your discovery tool and pass its ws:// URL)")
    })?;

    let mut config = Config::with_name(args.name.unwrap_or_else(|| "resonate-client".to_string()));
    config.device = args.device;
    config.initial_volume = f32::from(args.volume.min(100)) / 100.0;

    let session = SessionController::connect(config, &url).await?;
    info!("session ready");

    let mut events = session.subscribe();
    let mut state_rx = session.watch_state();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                break;
            }
            changed = state_rx.changed() => {
                if changed.is_err() || *state_rx.borrow() == SessionState::Disconnected {
                    session.disconnect();
                    anyhow::bail!("connection lost");
                }
            }
            event = events.recv() => match event {
                Ok(event) => log_event(&event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    info!(skipped, "event stream lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    session.disconnect();
    Ok(())
}

fn log_event(event: &ClientEvent) {
    match event {
        ClientEvent::ServerConnected(server) => {
            info!(server = %server.name, version = server.version, "connected")
        }
        ClientEvent::StreamStarted(format) => info!(%format, "stream started"),
        ClientEvent::StreamEnded => info!("stream ended"),
        ClientEvent::GroupUpdated {
            group_id,
            group_name,
            playback_state,
        } => info!(?group_id, ?group_name, ?playback_state, "group updated"),
        ClientEvent::ArtworkReceived { channel, data } => {
            info!(channel, bytes = data.len(), "artwork received")
        }
        ClientEvent::VisualizerData(data) => info!(bytes = data.len(), "visualizer data"),
        ClientEvent::Error(reason) => info!(%reason, "session error"),
    }
}
