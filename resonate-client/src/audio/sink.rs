//! Audio sink adapter
//!
//! The emit loop hands canonical PCM bytes to an [`AudioSink`]; the cpal
//! implementation converts them to f32 frames and pushes them through a
//! lock-free SPSC ring buffer drained by the device callback. The callback
//! never does more than a copy, a volume multiply, and counter updates, so
//! it is safe on the real-time audio thread.
//!
//! There is no deadline-aware scheduling here: chunks arrive at scheduler
//! tick cadence and the ring buffer smooths the jitter.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use tracing::{debug, error, info, warn};

use crate::audio::types::{SampleKind, SinkFormat};
use crate::error::{Error, Result};

/// Ring capacity: one second of audio.
fn ring_capacity(format: &SinkFormat) -> usize {
    format.sample_rate as usize * format.channels as usize
}

/// Byte-stream audio output with volume/mute control.
///
/// `write` must never block; callers gate ingest with their own
/// back-pressure bookkeeping and treat a short write as an overrun.
pub trait AudioSink: Send {
    /// The canonical format this sink was configured with.
    fn format(&self) -> SinkFormat;

    /// Write canonical PCM bytes. Returns the number of bytes accepted.
    fn write(&mut self, pcm: &[u8]) -> usize;

    /// Set output volume (clamped to 0.0..=1.0).
    fn set_volume(&mut self, volume: f32);

    /// Mute or unmute without touching the volume setting.
    fn set_muted(&mut self, muted: bool);

    /// Underrun/overrun counters and fill level.
    fn stats(&self) -> SinkStats;

    /// Stop playback and release the device. Idempotent.
    fn stop(&mut self);
}

/// Sink health counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct SinkStats {
    /// Device callback found the ring empty
    pub underruns: u64,
    /// `write` could not fit all samples
    pub overruns: u64,
    /// Samples currently queued toward the device
    pub occupied: usize,
}

struct SinkShared {
    volume_bits: AtomicU32,
    muted: AtomicBool,
    underruns: AtomicU64,
    overruns: AtomicU64,
}

/// cpal-backed sink.
///
/// The cpal stream is not `Send`, so it lives on a dedicated thread for
/// the sink's lifetime; this handle only touches the ring producer and
/// shared atomics.
pub struct CpalSink {
    format: SinkFormat,
    producer: HeapProd<f32>,
    shared: Arc<SinkShared>,
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
    /// Reused f32 staging buffer for byte conversion
    scratch: Vec<f32>,
}

impl CpalSink {
    /// Open the output device and start the stream.
    ///
    /// If `device_name` is given but absent, falls back to the default
    /// device with a warning.
    pub fn new(
        format: SinkFormat,
        device_name: Option<String>,
        volume: f32,
        muted: bool,
    ) -> Result<Self> {
        let rb = HeapRb::<f32>::new(ring_capacity(&format));
        let (producer, consumer) = rb.split();

        let shared = Arc::new(SinkShared {
            volume_bits: AtomicU32::new(volume.clamp(0.0, 1.0).to_bits()),
            muted: AtomicBool::new(muted),
            underruns: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
        });

        let (init_tx, init_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel();
        let thread_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("resonate-audio".into())
            .spawn(move || {
                audio_thread(format, device_name, consumer, thread_shared, init_tx, stop_rx)
            })
            .map_err(|e| Error::AudioOutput(format!("failed to spawn audio thread: {e}")))?;

        match init_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                format,
                producer,
                shared,
                stop_tx: Some(stop_tx),
                thread: Some(thread),
                scratch: Vec::new(),
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::AudioOutput("audio thread exited during init".into())),
        }
    }
}

impl AudioSink for CpalSink {
    fn format(&self) -> SinkFormat {
        self.format
    }

    fn write(&mut self, pcm: &[u8]) -> usize {
        self.scratch.clear();
        match self.format.kind {
            SampleKind::I16 => {
                for chunk in pcm.chunks_exact(2) {
                    let v = i16::from_le_bytes([chunk[0], chunk[1]]);
                    self.scratch.push(f32::from(v) / 32_768.0);
                }
            }
            SampleKind::I32 => {
                for chunk in pcm.chunks_exact(4) {
                    let v = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                    self.scratch.push(v as f32 / 2_147_483_648.0);
                }
            }
        }

        let pushed = self.producer.push_slice(&self.scratch);
        if pushed < self.scratch.len() {
            let dropped = (self.scratch.len() - pushed) as u64;
            let total = self.shared.overruns.fetch_add(dropped, Ordering::Relaxed) + dropped;
            if total % 1000 < dropped {
                warn!(total, "audio sink overrun");
            }
        }
        pushed * self.format.kind.bytes()
    }

    fn set_volume(&mut self, volume: f32) {
        let clamped = volume.clamp(0.0, 1.0);
        self.shared.volume_bits.store(clamped.to_bits(), Ordering::Relaxed);
        debug!(volume = clamped, "sink volume set");
    }

    fn set_muted(&mut self, muted: bool) {
        self.shared.muted.store(muted, Ordering::Relaxed);
        debug!(muted, "sink mute set");
    }

    fn stats(&self) -> SinkStats {
        SinkStats {
            underruns: self.shared.underruns.load(Ordering::Relaxed),
            overruns: self.shared.overruns.load(Ordering::Relaxed),
            occupied: self.producer.occupied_len(),
        }
    }

    fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            drop(stop_tx);
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Owns the cpal stream for the sink's lifetime (the stream type is not
/// `Send`, so it must be created and dropped on this thread).
fn audio_thread(
    format: SinkFormat,
    device_name: Option<String>,
    consumer: HeapCons<f32>,
    shared: Arc<SinkShared>,
    init_tx: mpsc::Sender<Result<()>>,
    stop_rx: mpsc::Receiver<()>,
) {
    let stream = match build_stream(&format, device_name, consumer, shared) {
        Ok(stream) => {
            let _ = init_tx.send(Ok(()));
            stream
        }
        Err(e) => {
            let _ = init_tx.send(Err(e));
            return;
        }
    };

    // Parks until the handle drops its stop sender
    let _ = stop_rx.recv();
    drop(stream);
    debug!("audio thread terminated");
}

fn build_stream(
    format: &SinkFormat,
    device_name: Option<String>,
    mut consumer: HeapCons<f32>,
    shared: Arc<SinkShared>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();

    let device = match device_name {
        Some(name) => {
            let found = host
                .output_devices()
                .map_err(|e| Error::AudioOutput(format!("failed to enumerate devices: {e}")))?
                .find(|d| d.name().ok().as_deref() == Some(name.as_str()));
            match found {
                Some(device) => {
                    info!(device = %name, "using requested audio device");
                    device
                }
                None => {
                    warn!(device = %name, "requested audio device not found, falling back to default");
                    host.default_output_device()
                        .ok_or_else(|| Error::AudioOutput("no default output device".into()))?
                }
            }
        }
        None => host
            .default_output_device()
            .ok_or_else(|| Error::AudioOutput("no default output device".into()))?,
    };

    let config = StreamConfig {
        channels: format.channels as u16,
        sample_rate: SampleRate(format.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let volume = if shared.muted.load(Ordering::Relaxed) {
                    0.0
                } else {
                    f32::from_bits(shared.volume_bits.load(Ordering::Relaxed))
                };

                let filled = consumer.pop_slice(data);
                for sample in &mut data[..filled] {
                    *sample = (*sample * volume).clamp(-1.0, 1.0);
                }
                if filled < data.len() {
                    data[filled..].fill(0.0);
                    let count = shared.underruns.fetch_add(1, Ordering::Relaxed) + 1;
                    // Rate-limited: silence between chunks is normal at
                    // stream boundaries
                    if count % 1000 == 0 {
                        warn!(total = count, "audio sink underrun");
                    }
                }
            },
            move |err| {
                error!("audio stream error: {err}");
            },
            None,
        )
        .map_err(|e| Error::AudioOutput(format!("failed to build stream: {e}")))?;

    stream
        .play()
        .map_err(|e| Error::AudioOutput(format!("failed to start stream: {e}")))?;

    info!(
        sample_rate = format.sample_rate,
        channels = format.channels,
        "audio stream started"
    );
    Ok(stream)
}
