// CLASSIFICATION: COMMUNITY
// Filename: poller.rs v0.6
// Author: Lukas Bower
// Date Modified: 2026-04-12

//! Auto-sleep polling thread.
//!
//! Exactly one thread runs the engine's state transitions; producers only
//! enqueue and ring the doorbell. The loop alternates between running a
//! pass and sleeping until a kick or the bounded poll interval, and dumps
//! the session table once when idle exceeds the configured threshold.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::engine::Engine;

/// Wakeup signal shared between producers, interrupt delivery, and the
/// polling thread.
pub struct Doorbell {
    pending: Mutex<bool>,
    cond: Condvar,
}

impl Default for Doorbell {
    fn default() -> Self {
        Self::new()
    }
}

impl Doorbell {
    pub fn new() -> Self {
        Self { pending: Mutex::new(false), cond: Condvar::new() }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, bool> {
        // A poisoned doorbell means a producer panicked mid-ring; the flag
        // itself is still usable.
        match self.pending.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        }
    }

    /// Signal the polling thread.
    pub fn ring(&self) {
        let mut g = self.lock();
        *g = true;
        self.cond.notify_one();
    }

    /// Sleep until rung or until `timeout`; returns true when rung.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut g = self.lock();
        if !*g {
            let deadline = Instant::now() + timeout;
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() || *g {
                    break;
                }
                g = match self.cond.wait_timeout(g, remaining) {
                    Ok((g, _)) => g,
                    Err(p) => p.into_inner().0,
                };
            }
        }
        let rung = *g;
        *g = false;
        rung
    }
}

/// Handle to the spawned polling thread. The engine moves into the thread
/// and comes back out of [`Poller::stop`].
pub struct Poller {
    shutdown: Arc<AtomicBool>,
    bell: Arc<Doorbell>,
    handle: JoinHandle<Engine>,
}

impl Poller {
    /// Spawn the polling thread. `poll_interval` bounds each sleep;
    /// `idle_warn` triggers a one-shot session-table dump.
    pub fn spawn(
        mut engine: Engine,
        bell: Arc<Doorbell>,
        poll_interval: Duration,
        idle_warn: Duration,
    ) -> std::io::Result<Poller> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        let thread_bell = bell.clone();
        let handle = thread::Builder::new().name("npu-proto-poller".into()).spawn(move || {
            info!("poller up");
            let mut idle_since = Instant::now();
            let mut idle_reported = false;
            loop {
                if flag.load(Ordering::Acquire) {
                    break;
                }
                let progressed = if engine.has_work() { engine.run_once().total() } else { 0 };
                if progressed > 0 {
                    idle_since = Instant::now();
                    idle_reported = false;
                    continue;
                }
                if !idle_reported && idle_since.elapsed() >= idle_warn {
                    engine.idle_diagnostics();
                    idle_reported = true;
                }
                thread_bell.wait_timeout(poll_interval);
            }
            engine.shutdown_drain();
            info!("poller down");
            engine
        })?;
        Ok(Poller { shutdown, bell, handle })
    }

    /// Wake the polling thread.
    pub fn kick(&self) {
        self.bell.ring();
    }

    /// Stop the thread, drain the engine, and hand it back.
    pub fn stop(self) -> Option<Engine> {
        self.shutdown.store(true, Ordering::Release);
        self.bell.ring();
        match self.handle.join() {
            Ok(engine) => Some(engine),
            Err(_) => {
                debug!("poller thread panicked before join");
                None
            }
        }
    }
}
