//! Timestamp-ordered playout
//!
//! The scheduler owns the only ordering and the only drop policy in the
//! pipeline: chunks are queued by target play-out instant and released by
//! a fixed tick inside a tolerance window. Ingest-side capacity is
//! bounded by the queue cap; sink-side capacity by the buffer manager.

pub mod buffer_manager;
pub mod scheduler;

pub use buffer_manager::BufferManager;
pub use scheduler::{ScheduledChunk, Scheduler, SchedulerStats};
