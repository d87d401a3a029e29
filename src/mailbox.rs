// CLASSIFICATION: COMMUNITY
// Filename: mailbox.rs v0.7
// Author: Lukas Bower
// Date Modified: 2026-03-02

//! Mailbox transport seam between the engine and NPU firmware.
//!
//! The engine only needs get/put over two rings (nw and frame); the wire
//! encoding of the payload behind those rings is the transport's business.
//! [`LoopbackMailbox`] is a software transport used by bring-up and tests:
//! the "firmware side" is driven explicitly (or via auto-complete).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::req::{ReqId, Uid};

/// Envelope published to the firmware-facing nw ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NwMboxMsg {
    pub id: ReqId,
    /// Wire-level command value (see [`crate::cmd::NwCmd::wire`]).
    pub cmd: u32,
    pub uid: Uid,
    pub param: u64,
}

/// Envelope published to the firmware-facing frame ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMboxMsg {
    pub id: ReqId,
    pub uid: Uid,
    pub frame_id: u32,
}

/// Completion record coming back from firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MboxResult {
    pub id: ReqId,
    /// Wire-level result code.
    pub result: u32,
}

#[derive(Debug, Error)]
pub enum MailboxError {
    #[error("mailbox transport unavailable")]
    Unavailable,
}

/// Abstract get/put over the hardware mailbox rings.
///
/// `put` returns `Ok(false)` when the outbound ring cannot take the entry
/// right now (ring full, firmware not ready); the engine retries on a later
/// pass. `get` returns `None` when nothing is inbound.
pub trait MailboxTransport: Send {
    fn nw_put(&mut self, msg: &NwMboxMsg) -> Result<bool, MailboxError>;
    fn nw_get(&mut self) -> Option<MboxResult>;
    fn frame_put(&mut self, msg: &FrameMboxMsg) -> Result<bool, MailboxError>;
    fn frame_get(&mut self) -> Option<MboxResult>;
    /// Work predicate for the polling thread: any inbound result pending.
    fn has_inbound(&self) -> bool;
}

#[derive(Default)]
struct LoopbackInner {
    capacity: usize,
    nw_out: VecDeque<NwMboxMsg>,
    frame_out: VecDeque<FrameMboxMsg>,
    nw_in: VecDeque<MboxResult>,
    frame_in: VecDeque<MboxResult>,
    /// When set, every put is answered immediately with this result code.
    auto_complete: Option<u32>,
    down: bool,
}

/// Shared-handle software mailbox. Clones refer to the same rings, so a
/// test can keep one handle as the firmware side while the engine owns the
/// other.
#[derive(Clone)]
pub struct LoopbackMailbox {
    inner: Arc<Mutex<LoopbackInner>>,
}

impl LoopbackMailbox {
    pub fn new(capacity: usize) -> Self {
        let inner = LoopbackInner { capacity, ..Default::default() };
        Self { inner: Arc::new(Mutex::new(inner)) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LoopbackInner> {
        // A poisoned loopback only ever means a panicking test thread.
        match self.inner.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        }
    }

    /// Answer every subsequent put immediately with `result`.
    pub fn set_auto_complete(&self, result: u32) {
        self.lock().auto_complete = Some(result);
    }

    /// Simulate a dead transport: every put fails.
    pub fn set_down(&self, down: bool) {
        self.lock().down = down;
    }

    /// Firmware side: take the next published nw envelope.
    pub fn pop_nw(&self) -> Option<NwMboxMsg> {
        self.lock().nw_out.pop_front()
    }

    /// Firmware side: take the next published frame envelope.
    pub fn pop_frame(&self) -> Option<FrameMboxMsg> {
        self.lock().frame_out.pop_front()
    }

    /// Firmware side: deliver a nw completion.
    pub fn push_nw_result(&self, res: MboxResult) {
        self.lock().nw_in.push_back(res);
    }

    /// Firmware side: deliver a frame completion.
    pub fn push_frame_result(&self, res: MboxResult) {
        self.lock().frame_in.push_back(res);
    }
}

impl MailboxTransport for LoopbackMailbox {
    fn nw_put(&mut self, msg: &NwMboxMsg) -> Result<bool, MailboxError> {
        let mut g = self.lock();
        if g.down {
            return Err(MailboxError::Unavailable);
        }
        if g.nw_out.len() >= g.capacity {
            return Ok(false);
        }
        g.nw_out.push_back(*msg);
        if let Some(code) = g.auto_complete {
            g.nw_out.pop_back();
            g.nw_in.push_back(MboxResult { id: msg.id, result: code });
        }
        Ok(true)
    }

    fn nw_get(&mut self) -> Option<MboxResult> {
        self.lock().nw_in.pop_front()
    }

    fn frame_put(&mut self, msg: &FrameMboxMsg) -> Result<bool, MailboxError> {
        let mut g = self.lock();
        if g.down {
            return Err(MailboxError::Unavailable);
        }
        if g.frame_out.len() >= g.capacity {
            return Ok(false);
        }
        g.frame_out.push_back(*msg);
        if let Some(code) = g.auto_complete {
            g.frame_out.pop_back();
            g.frame_in.push_back(MboxResult { id: msg.id, result: code });
        }
        Ok(true)
    }

    fn frame_get(&mut self) -> Option<MboxResult> {
        self.lock().frame_in.pop_front()
    }

    fn has_inbound(&self) -> bool {
        let g = self.lock();
        !g.nw_in.is_empty() || !g.frame_in.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_round_trip() {
        let lb = LoopbackMailbox::new(4);
        let mut engine_side = lb.clone();
        let msg = NwMboxMsg { id: 9, cmd: 1025, uid: 7, param: 0 };
        assert!(engine_side.nw_put(&msg).unwrap());
        assert_eq!(lb.pop_nw(), Some(msg));
        lb.push_nw_result(MboxResult { id: 9, result: 0 });
        assert!(engine_side.has_inbound());
        assert_eq!(engine_side.nw_get(), Some(MboxResult { id: 9, result: 0 }));
        assert!(!engine_side.has_inbound());
    }

    #[test]
    fn full_ring_reports_busy() {
        let lb = LoopbackMailbox::new(1);
        let mut t = lb.clone();
        let msg = FrameMboxMsg { id: 1, uid: 0, frame_id: 0 };
        assert!(t.frame_put(&msg).unwrap());
        assert!(!t.frame_put(&msg).unwrap());
    }

    #[test]
    fn auto_complete_answers_immediately() {
        let lb = LoopbackMailbox::new(4);
        lb.set_auto_complete(0);
        let mut t = lb.clone();
        assert!(t.nw_put(&NwMboxMsg { id: 3, cmd: 1025, uid: 1, param: 0 }).unwrap());
        assert_eq!(t.nw_get(), Some(MboxResult { id: 3, result: 0 }));
        assert_eq!(lb.pop_nw(), None);
    }

    #[test]
    fn down_transport_errors() {
        let lb = LoopbackMailbox::new(4);
        lb.set_down(true);
        let mut t = lb.clone();
        assert!(t.nw_put(&NwMboxMsg { id: 1, cmd: 1025, uid: 0, param: 0 }).is_err());
    }
}
