// CLASSIFICATION: COMMUNITY
// Filename: fault.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-03-12

//! Fault-diagnostic seam. On a hardware-facing timeout or an emergency the
//! engine captures the firmware log, dumps registers, and lists the session
//! table through this trait; the output format belongs to the implementor.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::error;
use once_cell::sync::Lazy;

use crate::sref::SessionSnapshot;

/// Opaque side-effecting diagnostic hooks invoked on fault paths.
pub trait FaultInspector: Send {
    fn capture_fw_log(&mut self);
    fn dump_registers(&mut self);
    fn list_sessions(&mut self, sessions: &[SessionSnapshot]);
}

/// Default inspector: everything goes through the `log` facade.
#[derive(Default)]
pub struct LogInspector;

impl FaultInspector for LogInspector {
    fn capture_fw_log(&mut self) {
        error!("fw-log capture requested (no hardware backend attached)");
    }

    fn dump_registers(&mut self) {
        error!("register dump requested (no hardware backend attached)");
    }

    fn list_sessions(&mut self, sessions: &[SessionSnapshot]) {
        error!("session table ({} entries):", sessions.len());
        for s in sessions {
            error!(
                "  uid={} state={:?} nw_inflight={} frame_inflight={}",
                s.uid, s.s_state, s.nw_inflight, s.frame_inflight
            );
        }
    }
}

/// Minimum spacing between full fault dumps. A storm of stuck entries must
/// not flood the log with identical dumps.
const DUMP_WINDOW: Duration = Duration::from_secs(5);

static LAST_DUMP: Lazy<Mutex<Option<Instant>>> = Lazy::new(|| Mutex::new(None));

/// Gate a full fault dump; returns false inside the suppression window.
pub fn dump_allowed() -> bool {
    let mut last = match LAST_DUMP.lock() {
        Ok(g) => g,
        Err(p) => p.into_inner(),
    };
    let now = Instant::now();
    match *last {
        Some(t) if now.duration_since(t) < DUMP_WINDOW => false,
        _ => {
            *last = Some(now);
            true
        }
    }
}

/// Reset the dump gate. Test hook only.
#[doc(hidden)]
pub fn reset_dump_gate() {
    if let Ok(mut g) = LAST_DUMP.lock() {
        *g = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn dump_gate_suppresses_within_window() {
        reset_dump_gate();
        assert!(dump_allowed());
        assert!(!dump_allowed());
    }
}
