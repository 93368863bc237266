//! Server-clock offset and drift estimation
//!
//! Ingests NTP-style four-timestamp exchanges and maintains a small
//! fixed-gain filter over offset and drift. Tracking drift lets the model
//! extrapolate between probes, which arrive only every few seconds.

use std::sync::Mutex;

use tracing::{debug, trace};

use crate::sync::now_micros;

/// Filter gain for offset/drift updates.
const GAIN: f64 = 0.1;
/// Samples with round-trips above this are discarded.
const MAX_RTT_US: i64 = 100_000;
/// Round-trip bound for `Good` quality.
const GOOD_RTT_US: i64 = 50_000;
/// Offset innovations beyond this are treated as outliers.
const OUTLIER_US: f64 = 50_000.0;
/// Drift magnitude bound (1000 ppm); violating samples are rejected.
const MAX_DRIFT: f64 = 1e-3;
/// Without an accepted sample for this long the model is `Lost`.
const LOST_AFTER_US: i64 = 5_000_000;

/// Coarse health classification of the clock model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncQuality {
    /// Recent sample with a tight round-trip
    Good,
    /// Recent sample, but the path is slow
    Degraded,
    /// No usable sample recently (or ever)
    Lost,
}

/// Side-effect-free snapshot of the model.
#[derive(Debug, Clone, Copy)]
pub struct ClockStats {
    /// Estimated server-minus-local offset at `last_update`, microseconds
    pub offset_us: i64,
    /// Round-trip of the last accepted sample, microseconds
    pub rtt_us: i64,
    /// Current quality classification
    pub quality: SyncQuality,
    /// Number of accepted samples since creation/reset
    pub samples: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct ClockModel {
    offset_us: f64,
    drift: f64,
    last_update_local_us: i64,
    rtt_us: i64,
    samples: u64,
    last_t4_us: i64,
}

/// Offset/drift estimator mapping between the server and local monotonic
/// microsecond domains.
///
/// Mutated only through [`process_sample`](Self::process_sample) and
/// [`reset`](Self::reset); every read takes a consistent snapshot.
#[derive(Debug, Default)]
pub struct ClockSync {
    model: Mutex<ClockModel>,
}

impl ClockSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest one exchange: `t1` client send, `t2` server receive,
    /// `t3` server send, `t4` client receive (all microseconds, `t1`/`t4`
    /// local domain, `t2`/`t3` server domain).
    ///
    /// Returns whether the sample was accepted. Rejected samples leave the
    /// model untouched.
    pub fn process_sample(&self, t1: i64, t2: i64, t3: i64, t4: i64) -> bool {
        let rtt = (t4 - t1) - (t3 - t2);
        if rtt < 0 || rtt > MAX_RTT_US {
            trace!(rtt_us = rtt, "clock sample rejected: rtt out of range");
            return false;
        }

        let mut m = self.model.lock().unwrap();

        if m.samples > 0 && t4 <= m.last_t4_us {
            trace!(t4, last_t4 = m.last_t4_us, "clock sample rejected: non-monotonic arrival");
            return false;
        }

        let raw_offset = ((t2 - t1) as f64 + (t3 - t4) as f64) / 2.0;

        match m.samples {
            0 => {
                m.offset_us = raw_offset;
            }
            1 => {
                let dt = (t4 - m.last_update_local_us) as f64;
                if (raw_offset - m.offset_us).abs() > OUTLIER_US {
                    debug!(raw_offset, "clock sample rejected: offset outlier");
                    return false;
                }
                let drift = (raw_offset - m.offset_us) / dt;
                if drift.abs() >= MAX_DRIFT {
                    debug!(drift, "clock sample rejected: drift bound exceeded");
                    return false;
                }
                m.drift = drift;
                m.offset_us = raw_offset;
            }
            _ => {
                let dt = (t4 - m.last_update_local_us) as f64;
                let predicted = m.offset_us + m.drift * dt;
                let residual = raw_offset - predicted;
                if residual.abs() > OUTLIER_US {
                    debug!(residual, "clock sample rejected: offset outlier");
                    return false;
                }
                let drift = m.drift + GAIN * (residual / dt);
                if drift.abs() >= MAX_DRIFT {
                    debug!(drift, "clock sample rejected: drift bound exceeded");
                    return false;
                }
                m.offset_us = predicted + GAIN * residual;
                m.drift = drift;
            }
        }

        m.rtt_us = rtt;
        m.last_update_local_us = t4;
        m.last_t4_us = t4;
        m.samples += 1;
        true
    }

    /// Map a server-domain timestamp to the local domain.
    ///
    /// Exact inverse of the forward prediction used by
    /// [`local_to_server`](Self::local_to_server); falls back to a pure
    /// offset shift when the drift term degenerates.
    pub fn server_to_local(&self, server_us: i64) -> i64 {
        let m = *self.model.lock().unwrap();
        let denom = 1.0 + m.drift;
        if denom.abs() < 1e-10 {
            return (server_us as f64 - m.offset_us).round() as i64;
        }
        let local = (server_us as f64 - m.offset_us + m.drift * m.last_update_local_us as f64)
            / denom;
        local.round() as i64
    }

    /// Map a local-domain timestamp to the server domain.
    pub fn local_to_server(&self, local_us: i64) -> i64 {
        let m = *self.model.lock().unwrap();
        let predicted =
            local_us as f64 + m.offset_us + m.drift * (local_us - m.last_update_local_us) as f64;
        predicted.round() as i64
    }

    /// Clear all state; the model returns to `Lost` with zeroed estimates.
    pub fn reset(&self) {
        *self.model.lock().unwrap() = ClockModel::default();
    }

    /// Snapshot offset, rtt and quality. Side-effect-free.
    pub fn stats(&self) -> ClockStats {
        self.stats_at(now_micros())
    }

    /// Snapshot against an explicit local-domain "now" (deterministic for
    /// tests; `stats` delegates here).
    pub fn stats_at(&self, now_local_us: i64) -> ClockStats {
        let m = *self.model.lock().unwrap();
        let quality = if m.samples == 0
            || now_local_us.saturating_sub(m.last_update_local_us) > LOST_AFTER_US
        {
            SyncQuality::Lost
        } else if m.rtt_us < GOOD_RTT_US {
            SyncQuality::Good
        } else {
            SyncQuality::Degraded
        };
        ClockStats {
            offset_us: m.offset_us.round() as i64,
            rtt_us: m.rtt_us,
            quality,
            samples: m.samples,
        }
    }
}
