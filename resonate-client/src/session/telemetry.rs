//! Pipeline telemetry
//!
//! A once-per-second task snapshots the pipeline counters and logs the
//! interesting deltas. Individual drop events elsewhere are gated through
//! [`RateGate`] so no unique cause logs more than once per second.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use crate::playback::scheduler::TARGET_BUFFER_MS;

use super::Shared;

const LOG_INTERVAL_US: i64 = 1_000_000;

/// Once-per-second gate keyed by cause.
pub(super) struct RateGate {
    last: Mutex<HashMap<&'static str, i64>>,
}

impl RateGate {
    pub(super) fn new() -> Self {
        Self {
            last: Mutex::new(HashMap::new()),
        }
    }

    /// Whether `cause` may log at `now_us`; records the grant.
    pub(super) fn allow(&self, cause: &'static str, now_us: i64) -> bool {
        let mut last = self.last.lock().unwrap();
        match last.get(cause) {
            Some(&previous) if now_us - previous < LOG_INTERVAL_US => false,
            _ => {
                last.insert(cause, now_us);
                true
            }
        }
    }
}

/// Periodic counter snapshot.
pub(super) async fn telemetry_task(shared: Arc<Shared>) {
    let mut shutdown = shared.subscribe_shutdown();
    if *shutdown.borrow() {
        return;
    }
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = interval.tick() => {
                let stats = shared.stats();
                debug!(
                    received = stats.scheduler.received,
                    played = stats.scheduler.played,
                    dropped_late = stats.scheduler.dropped_late,
                    dropped_overflow = stats.scheduler.dropped_overflow,
                    queue_len = stats.scheduler.queue_len,
                    buffer_fill_ms = stats.scheduler.buffer_fill_ms,
                    target_fill_ms = TARGET_BUFFER_MS,
                    clock_offset_us = stats.clock.offset_us,
                    clock_rtt_us = stats.clock.rtt_us,
                    clock_quality = ?stats.clock.quality,
                    decode_errors = stats.decode_errors,
                    backpressure_drops = stats.backpressure_drops,
                    auto_starts = stats.auto_starts,
                    protocol_errors = stats.protocol_errors,
                    sink_underruns = stats.sink.map(|s| s.underruns).unwrap_or(0),
                    "pipeline telemetry"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_gate_limits_per_cause() {
        let gate = RateGate::new();
        assert!(gate.allow("decode", 0));
        assert!(!gate.allow("decode", 500_000));
        // A different cause has its own window
        assert!(gate.allow("backpressure", 500_000));
        // After a second the cause may log again
        assert!(gate.allow("decode", 1_000_000));
    }
}
