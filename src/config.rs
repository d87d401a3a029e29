// CLASSIFICATION: COMMUNITY
// Filename: config.rs v0.4
// Author: Lukas Bower
// Date Modified: 2026-03-14

//! Driver configuration: pool sizes, per-state deadlines, poller tuning.

use std::time::Duration;

/// Deadline per (category, state) pair. `None` disables that scan.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutConfig {
    /// nw command waiting for publication (scheduler-side).
    pub nw_requested: Option<Duration>,
    /// nw command waiting for a firmware answer.
    pub nw_processing: Option<Duration>,
    /// frame waiting for publication.
    pub frame_requested: Option<Duration>,
    /// frame waiting for a firmware answer.
    pub frame_processing: Option<Duration>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            nw_requested: Some(Duration::from_secs(5)),
            nw_processing: Some(Duration::from_secs(10)),
            frame_requested: Some(Duration::from_secs(4)),
            frame_processing: Some(Duration::from_secs(8)),
        }
    }
}

/// Top-level protocol driver configuration.
#[derive(Debug, Clone)]
pub struct ProtoConfig {
    /// Capacity of the nw request pool.
    pub nw_slots: usize,
    /// Capacity of the frame request pool.
    pub frame_slots: usize,
    /// Upper bound on session UIDs; one frame slot per session.
    pub max_sessions: usize,
    /// Depth of each producer submission queue.
    pub queue_depth: usize,
    pub timeouts: TimeoutConfig,
    /// Bounded sleep of the polling thread between doorbell kicks.
    pub poll_interval: Duration,
    /// Idle duration after which the session table is dumped once.
    pub idle_warn: Duration,
}

impl Default for ProtoConfig {
    fn default() -> Self {
        Self {
            nw_slots: 64,
            frame_slots: 256,
            max_sessions: 64,
            queue_depth: 256,
            timeouts: TimeoutConfig::default(),
            poll_interval: Duration::from_millis(100),
            idle_warn: Duration::from_secs(10),
        }
    }
}

impl ProtoConfig {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.nw_slots == 0 {
            return Err("nw_slots must be nonzero");
        }
        if self.frame_slots == 0 {
            return Err("frame_slots must be nonzero");
        }
        if self.max_sessions == 0 {
            return Err("max_sessions must be nonzero");
        }
        if self.queue_depth == 0 {
            return Err("queue_depth must be nonzero");
        }
        Ok(())
    }
}
