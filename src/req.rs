// CLASSIFICATION: COMMUNITY
// Filename: req.rs v0.6
// Author: Lukas Bower
// Date Modified: 2026-02-03

//! Request envelopes, the rollover-safe request-id generator, and the
//! per-request timestamp history used for transition diagnostics.

use std::fmt;
use std::time::Instant;

use crate::cmd::{FrameCmd, NwCmd, ResultCode};
use crate::session::Notify;

/// Unique session identifier.
pub type Uid = u32;

/// Driver-lifetime request sequence number.
pub type ReqId = u32;

/// Sentinel carried by completion notices for requests rejected before a
/// slot was ever assigned. The generator never emits this value.
pub const REQ_ID_INVALID: ReqId = 0;
pub const REQ_ID_INITIAL: ReqId = 1;
/// Last value emitted before the counter resets to [`REQ_ID_INITIAL`].
pub const REQ_ID_ROLLOVER: ReqId = 0xFFFF_FFF0;

/// Monotonically increasing id source with defined rollover.
#[derive(Debug)]
pub struct ReqIdGen {
    next: ReqId,
}

impl Default for ReqIdGen {
    fn default() -> Self {
        Self { next: REQ_ID_INITIAL }
    }
}

impl ReqIdGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self) -> ReqId {
        let id = self.next;
        self.next = if id == REQ_ID_ROLLOVER { REQ_ID_INITIAL } else { id + 1 };
        id
    }
}

/// Lifecycle states shared by both request categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(usize)]
pub enum ReqState {
    #[default]
    Free = 0,
    Requested = 1,
    Processing = 2,
    Completed = 3,
    /// Quarantine after a hardware-facing timeout; the slot is held back
    /// from FREE until the late response (if any) has been discarded.
    Stucked = 4,
}

/// Number of distinct [`ReqState`] values.
pub const REQ_STATE_COUNT: usize = 5;

impl ReqState {
    pub(crate) fn idx(self) -> usize {
        self as usize
    }
}

/// Depth of the per-request transition history ring.
const TS_RING_DEPTH: usize = 8;

/// One recorded state visit.
#[derive(Debug, Clone, Copy)]
pub struct TsSlot {
    pub state: ReqState,
    pub entered: Instant,
    pub left: Option<Instant>,
}

/// Fixed ring of the most recent state visits for one request.
#[derive(Debug, Clone)]
pub struct TransitionLog {
    ring: [Option<TsSlot>; TS_RING_DEPTH],
    cursor: usize,
    count: usize,
}

impl Default for TransitionLog {
    fn default() -> Self {
        Self { ring: [None; TS_RING_DEPTH], cursor: 0, count: 0 }
    }
}

impl TransitionLog {
    /// Close the previous visit and open a new one.
    pub fn record(&mut self, state: ReqState, now: Instant) {
        if self.count > 0 {
            let last = (self.cursor + TS_RING_DEPTH - 1) % TS_RING_DEPTH;
            if let Some(slot) = self.ring[last].as_mut() {
                if slot.left.is_none() {
                    slot.left = Some(now);
                }
            }
        }
        self.ring[self.cursor] = Some(TsSlot { state, entered: now, left: None });
        self.cursor = (self.cursor + 1) % TS_RING_DEPTH;
        self.count += 1;
    }

    /// Entry time of the current (still open) state, if any.
    pub fn in_state_since(&self) -> Option<Instant> {
        if self.count == 0 {
            return None;
        }
        let last = (self.cursor + TS_RING_DEPTH - 1) % TS_RING_DEPTH;
        self.ring[last].map(|s| s.entered)
    }

    pub fn current_state(&self) -> Option<ReqState> {
        if self.count == 0 {
            return None;
        }
        let last = (self.cursor + TS_RING_DEPTH - 1) % TS_RING_DEPTH;
        self.ring[last].map(|s| s.state)
    }

    /// States visited, oldest first (at most the ring depth).
    pub fn path(&self) -> Vec<ReqState> {
        let kept = self.count.min(TS_RING_DEPTH);
        let mut out = Vec::with_capacity(kept);
        for i in 0..kept {
            let at = (self.cursor + TS_RING_DEPTH - kept + i) % TS_RING_DEPTH;
            if let Some(slot) = self.ring[at] {
                out.push(slot.state);
            }
        }
        out
    }
}

/// In-pool envelope for a network-management request.
pub struct ProtoReqNw {
    pub id: ReqId,
    pub cmd: NwCmd,
    pub uid: Uid,
    /// Command payload (power level, mode word, ...); opaque to the engine.
    pub param: u64,
    pub result: ResultCode,
    pub ts: TransitionLog,
    /// Session-linkage tag. `Some(uid)` means this request currently sits
    /// in that session's nw list; used to assert against double-linking.
    pub link: Option<Uid>,
    pub notify: Option<Notify>,
}

impl Default for ProtoReqNw {
    fn default() -> Self {
        Self {
            id: REQ_ID_INVALID,
            cmd: NwCmd::PowerCtl,
            uid: 0,
            param: 0,
            result: ResultCode::NoError,
            ts: TransitionLog::default(),
            link: None,
            notify: None,
        }
    }
}

impl fmt::Debug for ProtoReqNw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtoReqNw")
            .field("id", &self.id)
            .field("cmd", &self.cmd)
            .field("uid", &self.uid)
            .field("result", &self.result)
            .field("link", &self.link)
            .field("has_notify", &self.notify.is_some())
            .finish()
    }
}

impl ProtoReqNw {
    /// Re-arm a FREE slot for a freshly accepted submission.
    pub fn rearm(&mut self, id: ReqId, cmd: NwCmd, uid: Uid, param: u64, notify: Option<Notify>) {
        self.id = id;
        self.cmd = cmd;
        self.uid = uid;
        self.param = param;
        self.result = ResultCode::NoError;
        self.ts = TransitionLog::default();
        self.link = None;
        self.notify = notify;
    }
}

/// In-pool envelope for a frame (inference) request.
pub struct ProtoReqFrame {
    pub id: ReqId,
    pub cmd: FrameCmd,
    pub uid: Uid,
    pub frame_id: u32,
    pub result: ResultCode,
    pub ts: TransitionLog,
    pub link: Option<Uid>,
    /// Set by a later cancel submission; checked cooperatively, the
    /// in-flight hardware request is never interrupted.
    pub request_cancel: bool,
    pub notify: Option<Notify>,
}

impl Default for ProtoReqFrame {
    fn default() -> Self {
        Self {
            id: REQ_ID_INVALID,
            cmd: FrameCmd::Q,
            uid: 0,
            frame_id: 0,
            result: ResultCode::NoError,
            ts: TransitionLog::default(),
            link: None,
            request_cancel: false,
            notify: None,
        }
    }
}

impl fmt::Debug for ProtoReqFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtoReqFrame")
            .field("id", &self.id)
            .field("uid", &self.uid)
            .field("frame_id", &self.frame_id)
            .field("result", &self.result)
            .field("request_cancel", &self.request_cancel)
            .finish()
    }
}

impl ProtoReqFrame {
    pub fn rearm(&mut self, id: ReqId, uid: Uid, frame_id: u32, notify: Option<Notify>) {
        self.id = id;
        self.cmd = FrameCmd::Q;
        self.uid = uid;
        self.frame_id = frame_id;
        self.result = ResultCode::NoError;
        self.ts = TransitionLog::default();
        self.link = None;
        self.request_cancel = false;
        self.notify = notify;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn req_ids_increase_then_roll_over() {
        let mut gen = ReqIdGen::new();
        let mut prev = gen.next();
        assert_eq!(prev, REQ_ID_INITIAL);
        for _ in 0..1000 {
            let id = gen.next();
            assert!(id > prev);
            assert_ne!(id, REQ_ID_INVALID);
            prev = id;
        }
    }

    #[test]
    fn rollover_resets_to_initial() {
        let mut gen = ReqIdGen { next: REQ_ID_ROLLOVER };
        assert_eq!(gen.next(), REQ_ID_ROLLOVER);
        assert_eq!(gen.next(), REQ_ID_INITIAL);
    }

    #[test]
    fn transition_log_tracks_path_and_open_slot() {
        let mut ts = TransitionLog::default();
        let t0 = Instant::now();
        ts.record(ReqState::Requested, t0);
        ts.record(ReqState::Processing, t0 + Duration::from_millis(5));
        assert_eq!(ts.path(), vec![ReqState::Requested, ReqState::Processing]);
        assert_eq!(ts.current_state(), Some(ReqState::Processing));
        assert_eq!(ts.in_state_since(), Some(t0 + Duration::from_millis(5)));
    }

    #[test]
    fn transition_log_keeps_newest_when_full() {
        let mut ts = TransitionLog::default();
        let t0 = Instant::now();
        for i in 0u64..12 {
            let st = if i % 2 == 0 { ReqState::Requested } else { ReqState::Processing };
            ts.record(st, t0 + Duration::from_millis(i));
        }
        let path = ts.path();
        assert_eq!(path.len(), 8);
        assert_eq!(*path.last().unwrap(), ReqState::Processing);
    }
}
