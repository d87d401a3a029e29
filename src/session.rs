// CLASSIFICATION: COMMUNITY
// Filename: session.rs v0.5
// Author: Lukas Bower
// Date Modified: 2026-03-10

//! Session-facing submission boundary.
//!
//! Producers (ioctl threads in the original driver) push into these
//! independently locked queues and ring the poller doorbell; the engine is
//! the only consumer. Request state never changes here — validation and
//! slot assignment happen when the engine accepts a submission.

use std::collections::VecDeque;
use std::sync::Mutex;

use log::error;
use thiserror::Error;

use crate::cmd::NwCmd;
use crate::req::{ReqId, Uid};

/// Delivered to the submitter's callback when its request completes.
#[derive(Debug, Clone, Copy)]
pub struct CompletionNotice {
    /// Engine-assigned id, or [`crate::req::REQ_ID_INVALID`] when the
    /// submission was rejected before a slot was assigned.
    pub req_id: ReqId,
    pub uid: Uid,
    /// Wire-level result code.
    pub result: u32,
    pub cancelled: bool,
}

/// Completion callback; invoked exactly once from the engine thread, or
/// never if suppressed by CLEAR_CB fault recovery.
pub type Notify = Box<dyn FnMut(CompletionNotice) + Send>;

/// A network-management submission.
pub struct NwRequest {
    pub cmd: NwCmd,
    pub uid: Uid,
    pub param: u64,
    pub notify: Option<Notify>,
}

/// A frame (inference) submission.
pub struct FrameRequest {
    pub uid: Uid,
    pub frame_id: u32,
    pub notify: Option<Notify>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("submission queue full")]
    QueueFull,
    #[error("submission queue lock poisoned")]
    LockPoisoned,
}

/// Producer-side queues drained by the engine.
pub struct SubmitQueues {
    depth: usize,
    nw: Mutex<VecDeque<NwRequest>>,
    frames: Mutex<VecDeque<FrameRequest>>,
    cancels: Mutex<Vec<Uid>>,
}

impl SubmitQueues {
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            nw: Mutex::new(VecDeque::new()),
            frames: Mutex::new(VecDeque::new()),
            cancels: Mutex::new(Vec::new()),
        }
    }

    pub fn submit_nw(&self, req: NwRequest) -> Result<(), SubmitError> {
        let mut q = self.nw.lock().map_err(|_| SubmitError::LockPoisoned)?;
        if q.len() >= self.depth {
            return Err(SubmitError::QueueFull);
        }
        q.push_back(req);
        Ok(())
    }

    pub fn submit_frame(&self, req: FrameRequest) -> Result<(), SubmitError> {
        let mut q = self.frames.lock().map_err(|_| SubmitError::LockPoisoned)?;
        if q.len() >= self.depth {
            return Err(SubmitError::QueueFull);
        }
        q.push_back(req);
        Ok(())
    }

    /// Request cooperative cancellation of `uid`'s in-flight frame.
    pub fn cancel_frame(&self, uid: Uid) -> Result<(), SubmitError> {
        let mut c = self.cancels.lock().map_err(|_| SubmitError::LockPoisoned)?;
        if !c.contains(&uid) {
            c.push(uid);
        }
        Ok(())
    }

    /// Engine side: pull the next submitted nw command.
    pub fn take_nw(&self) -> Option<NwRequest> {
        match self.nw.lock() {
            Ok(mut q) => q.pop_front(),
            Err(_) => {
                error!("nw submission queue poisoned; dropping pending work");
                None
            }
        }
    }

    /// Engine side: pull the next submitted frame.
    pub fn take_frame(&self) -> Option<FrameRequest> {
        match self.frames.lock() {
            Ok(mut q) => q.pop_front(),
            Err(_) => {
                error!("frame submission queue poisoned; dropping pending work");
                None
            }
        }
    }

    /// Engine side: drain pending cancel markers.
    pub fn take_cancels(&self) -> Vec<Uid> {
        match self.cancels.lock() {
            Ok(mut c) => std::mem::take(&mut *c),
            Err(_) => Vec::new(),
        }
    }

    /// Work predicate for the polling thread.
    pub fn has_work(&self) -> bool {
        let nw = self.nw.lock().map(|q| !q.is_empty()).unwrap_or(false);
        let fr = self.frames.lock().map(|q| !q.is_empty()).unwrap_or(false);
        let ca = self.cancels.lock().map(|c| !c.is_empty()).unwrap_or(false);
        nw || fr || ca
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_per_queue() {
        let q = SubmitQueues::new(8);
        for uid in [1, 2, 3] {
            q.submit_nw(NwRequest { cmd: NwCmd::Load, uid, param: 0, notify: None }).unwrap();
        }
        assert!(q.has_work());
        assert_eq!(q.take_nw().unwrap().uid, 1);
        assert_eq!(q.take_nw().unwrap().uid, 2);
        assert_eq!(q.take_nw().unwrap().uid, 3);
        assert!(q.take_nw().is_none());
        assert!(!q.has_work());
    }

    #[test]
    fn bounded_depth() {
        let q = SubmitQueues::new(1);
        q.submit_frame(FrameRequest { uid: 1, frame_id: 0, notify: None }).unwrap();
        let err = q.submit_frame(FrameRequest { uid: 2, frame_id: 0, notify: None });
        assert_eq!(err.unwrap_err(), SubmitError::QueueFull);
    }

    #[test]
    fn cancel_markers_deduplicate() {
        let q = SubmitQueues::new(4);
        q.cancel_frame(5).unwrap();
        q.cancel_frame(5).unwrap();
        q.cancel_frame(6).unwrap();
        assert_eq!(q.take_cancels(), vec![5, 6]);
        assert!(q.take_cancels().is_empty());
    }
}
