//! Playout scheduler
//!
//! Orders decoded PCM chunks by their target play-out instant and emits
//! them on a fixed tick inside a tolerance window:
//!
//! - more than 50 ms early: leave queued
//! - inside +/-50 ms: emit to the sink loop
//! - more than 50 ms late: drop and count
//!
//! Ordering is strictly ascending on play time, FIFO on ties. The queue is
//! bounded; overflow evicts the *earliest* entry, keeping the frames that
//! can still meet their deadline after a stall.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::trace;

use crate::sync::{now_micros, ClockSync};

/// Tick period of the playout loop.
pub const TICK_PERIOD: std::time::Duration = std::time::Duration::from_millis(10);
/// Half-width of the playout tolerance window, microseconds.
pub const PLAYOUT_WINDOW_US: i64 = 50_000;
/// Bounded queue depth.
pub const DEFAULT_QUEUE_CAP: usize = 100;
/// Steady-state buffer fill the server aims for; telemetry reports
/// against it.
pub const TARGET_BUFFER_MS: u64 = 150;

/// One decoded chunk with its local-domain deadline.
///
/// Owned exclusively by the queue until yielded to the sink loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledChunk {
    pub pcm: Vec<u8>,
    pub play_at_local_us: i64,
    pub source_server_ts_us: i64,
}

#[derive(Debug)]
struct QueueEntry {
    chunk: ScheduledChunk,
    seq: u64,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.chunk.play_at_local_us == other.chunk.play_at_local_us && self.seq == other.seq
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.chunk
            .play_at_local_us
            .cmp(&other.chunk.play_at_local_us)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Scheduler counters. Invariant:
/// `received - played - dropped_late - dropped_overflow == queue_len`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerStats {
    pub received: u64,
    pub played: u64,
    pub dropped_late: u64,
    pub dropped_overflow: u64,
    pub queue_len: usize,
    /// How far ahead of "now" the queue reaches, milliseconds
    pub buffer_fill_ms: u64,
}

struct Inner {
    queue: BinaryHeap<Reverse<QueueEntry>>,
    next_seq: u64,
    tx: Option<mpsc::UnboundedSender<ScheduledChunk>>,
    rx: Option<mpsc::UnboundedReceiver<ScheduledChunk>>,
    received: u64,
    played: u64,
    dropped_late: u64,
    dropped_overflow: u64,
}

/// Timestamp-ordered playout queue with a tick-driven release loop.
pub struct Scheduler {
    clock: Arc<ClockSync>,
    inner: Mutex<Inner>,
    running: AtomicBool,
    cap: usize,
}

impl Scheduler {
    pub fn new(clock: Arc<ClockSync>) -> Self {
        Self::with_capacity(clock, DEFAULT_QUEUE_CAP)
    }

    pub fn with_capacity(clock: Arc<ClockSync>, cap: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            clock,
            inner: Mutex::new(Inner {
                queue: BinaryHeap::new(),
                next_seq: 0,
                tx: Some(tx),
                rx: Some(rx),
                received: 0,
                played: 0,
                dropped_late: 0,
                dropped_overflow: 0,
            }),
            running: AtomicBool::new(false),
            cap,
        }
    }

    /// Convert a server-domain timestamp to a local deadline and insert
    /// the chunk in play order. On overflow the earliest-keyed entry is
    /// evicted.
    pub fn schedule(&self, pcm: Vec<u8>, server_ts_us: i64) {
        let play_at_local_us = self.clock.server_to_local(server_ts_us);
        let mut inner = self.inner.lock().unwrap();
        inner.received += 1;

        if inner.queue.len() >= self.cap {
            if let Some(Reverse(evicted)) = inner.queue.pop() {
                trace!(
                    play_at = evicted.chunk.play_at_local_us,
                    "queue full, evicting earliest chunk"
                );
                inner.dropped_overflow += 1;
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.queue.push(Reverse(QueueEntry {
            chunk: ScheduledChunk {
                pcm,
                play_at_local_us,
                source_server_ts_us: server_ts_us,
            },
            seq,
        }));
    }

    /// Inspect the queue head against `now` and release everything due.
    ///
    /// Called by [`run_ticker`](Self::run_ticker) every 10 ms; exposed for
    /// deterministic tests.
    pub fn tick(&self, now_local_us: i64) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        loop {
            let delta = match inner.queue.peek() {
                Some(Reverse(head)) => head.chunk.play_at_local_us - now_local_us,
                None => return,
            };
            if delta > PLAYOUT_WINDOW_US {
                return;
            }
            let Reverse(entry) = inner.queue.pop().expect("peeked entry");
            if delta < -PLAYOUT_WINDOW_US {
                inner.dropped_late += 1;
                continue;
            }
            let sent = inner.tx.as_ref().map(|tx| tx.send(entry.chunk).is_ok());
            if sent == Some(true) {
                inner.played += 1;
            } else {
                // Consumer is gone; the session is tearing down
                inner.tx = None;
                return;
            }
        }
    }

    /// Drive [`tick`](Self::tick) at the fixed cadence until the scheduler
    /// is finished.
    pub async fn run_ticker(self: Arc<Self>) {
        let mut interval = tokio::time::interval(TICK_PERIOD);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if self.is_finished() {
                return;
            }
            self.tick(now_micros());
        }
    }

    /// Take the emission channel. Single consumer; the channel survives
    /// `stop`/`start` cycles and closes only on [`finish`](Self::finish).
    pub fn take_emitted(&self) -> Option<mpsc::UnboundedReceiver<ScheduledChunk>> {
        self.inner.lock().unwrap().rx.take()
    }

    /// Resume the tick loop's releases.
    pub fn start(&self) {
        self.running.store(true, Ordering::Release);
    }

    /// Pause releases; queue and output channel are preserved.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Close the output channel permanently and drop queued chunks.
    pub fn finish(&self) {
        self.running.store(false, Ordering::Release);
        let mut inner = self.inner.lock().unwrap();
        inner.tx = None;
        inner.queue.clear();
    }

    fn is_finished(&self) -> bool {
        self.inner.lock().unwrap().tx.is_none()
    }

    /// Drop queued chunks and reset counters (stream boundary).
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.queue.clear();
        inner.received = 0;
        inner.played = 0;
        inner.dropped_late = 0;
        inner.dropped_overflow = 0;
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats_at(now_micros())
    }

    /// Stats against an explicit "now" (deterministic for tests).
    pub fn stats_at(&self, now_local_us: i64) -> SchedulerStats {
        let inner = self.inner.lock().unwrap();
        let horizon = inner
            .queue
            .iter()
            .map(|Reverse(e)| e.chunk.play_at_local_us)
            .max()
            .unwrap_or(now_local_us);
        SchedulerStats {
            received: inner.received,
            played: inner.played,
            dropped_late: inner.dropped_late,
            dropped_overflow: inner.dropped_overflow,
            queue_len: inner.queue.len(),
            buffer_fill_ms: horizon.saturating_sub(now_local_us).max(0) as u64 / 1000,
        }
    }
}
