//! Clock synchronization
//!
//! Two time domains exist and must never be conflated:
//!
//! - *server domain*: microseconds on the server's monotonic clock,
//!   origin at server process start; all wire timestamps use it.
//! - *local domain*: microseconds on this process's monotonic clock,
//!   origin at client process start.
//!
//! Wall-clock (Unix) time is deliberately absent. Feeding Unix time into
//! either domain shows up as a constant offset the size of the server's
//! boot epoch and classifies every chunk as hopelessly late.

mod clock;

pub use clock::{ClockStats, ClockSync, SyncQuality};

use std::sync::OnceLock;
use std::time::Instant;

static PROCESS_START: OnceLock<Instant> = OnceLock::new();

/// Anchor the local monotonic origin. Called once at startup; calling it
/// again (or not at all) is harmless, the first observation wins.
pub fn init_local_clock() {
    PROCESS_START.get_or_init(Instant::now);
}

/// Current local-domain time in microseconds since process start.
pub fn now_micros() -> i64 {
    let start = PROCESS_START.get_or_init(Instant::now);
    start.elapsed().as_micros() as i64
}
