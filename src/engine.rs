// CLASSIFICATION: COMMUNITY
// Filename: engine.rs v1.2
// Author: Lukas Bower
// Date Modified: 2026-04-07

//! Request-lifecycle state engine.
//!
//! One `run_once` pass is strictly ordered: drain firmware completions,
//! scan for deadline overruns, apply cancel markers, admit new submissions
//! and publish whatever may go to hardware. The pass never blocks; anything
//! that cannot proceed yet is retried on a later pass. The poller thread is
//! the only caller during normal operation, so the engine itself needs no
//! locking.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::cmd::{DriverErr, NwCmd, ResultCode};
use crate::config::ProtoConfig;
use crate::fault::{self, FaultInspector};
use crate::lsm::Lsm;
use crate::mailbox::{FrameMboxMsg, MailboxTransport, NwMboxMsg};
use crate::policy::{policy, CompletionAction};
use crate::req::{
    ProtoReqFrame, ProtoReqNw, ReqId, ReqIdGen, ReqState, TransitionLog, Uid, REQ_ID_INVALID,
};
use crate::session::{CompletionNotice, Notify, SubmitQueues};
use crate::sref::{SessionRefTable, SessionState};

/// Work accounted by one engine pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassStats {
    pub completed: usize,
    pub timed_out: usize,
    pub cancelled: usize,
    pub admitted: usize,
    pub published: usize,
    pub rejected: usize,
}

impl PassStats {
    pub fn total(&self) -> usize {
        self.completed + self.timed_out + self.cancelled + self.admitted + self.published
            + self.rejected
    }
}

/// Bounded ring of recent `(req_id, new_state)` transitions, shared with
/// the pool hooks. Feeds fault dumps and the transition-legality tests.
pub struct TransitionTrace {
    cap: usize,
    inner: Mutex<VecDeque<(ReqId, ReqState)>>,
}

impl TransitionTrace {
    fn new(cap: usize) -> Self {
        Self { cap, inner: Mutex::new(VecDeque::with_capacity(cap)) }
    }

    fn push(&self, id: ReqId, state: ReqState) {
        let mut g = match self.inner.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        if g.len() == self.cap {
            g.pop_front();
        }
        g.push_back((id, state));
    }

    /// Recent transitions, oldest first.
    pub fn recent(&self) -> Vec<(ReqId, ReqState)> {
        match self.inner.lock() {
            Ok(g) => g.iter().copied().collect(),
            Err(p) => p.into_inner().iter().copied().collect(),
        }
    }

    /// The state path one request was observed to take.
    pub fn path_of(&self, id: ReqId) -> Vec<ReqState> {
        self.recent().into_iter().filter(|(i, _)| *i == id).map(|(_, s)| s).collect()
    }
}

/// Transition-legality matrix. REQUESTED may force-complete directly
/// (timeout, vanished session); STUCKED drains to FREE only after the late
/// response has been discarded.
fn legal_transition(from: ReqState, to: ReqState) -> bool {
    matches!(
        (from, to),
        (ReqState::Free, ReqState::Requested)
            | (ReqState::Requested, ReqState::Processing)
            | (ReqState::Requested, ReqState::Completed)
            | (ReqState::Processing, ReqState::Completed)
            | (ReqState::Completed, ReqState::Free)
            | (ReqState::Completed, ReqState::Stucked)
            | (ReqState::Stucked, ReqState::Free)
    )
}

fn state_expired(ts: &TransitionLog, limit: Duration) -> bool {
    match ts.in_state_since() {
        Some(entered) => entered.elapsed() >= limit,
        None => false,
    }
}

/// The protocol driver state engine. Owned by the polling thread during
/// normal operation; tests drive `run_once` directly.
pub struct Engine {
    cfg: ProtoConfig,
    queues: Arc<SubmitQueues>,
    transport: Box<dyn MailboxTransport>,
    inspector: Box<dyn FaultInspector>,
    nw_pool: Lsm<ProtoReqNw>,
    frame_pool: Lsm<ProtoReqFrame>,
    sref: SessionRefTable,
    ids: ReqIdGen,
    /// One in-flight frame per session slot, indexed by UID.
    frame_busy: Vec<Option<ReqId>>,
    trace: Arc<TransitionTrace>,
}

impl Engine {
    pub fn new(
        cfg: ProtoConfig,
        queues: Arc<SubmitQueues>,
        transport: Box<dyn MailboxTransport>,
        inspector: Box<dyn FaultInspector>,
    ) -> Self {
        let trace = Arc::new(TransitionTrace::new(512));
        let mut nw_pool = Lsm::new("nw", cfg.nw_slots);
        let t = trace.clone();
        nw_pool.set_hook(Box::new(move |st, req: &mut ProtoReqNw| {
            req.ts.record(st, Instant::now());
            t.push(req.id, st);
        }));
        nw_pool.set_transition_check(legal_transition);

        let mut frame_pool = Lsm::new("frame", cfg.frame_slots);
        let t = trace.clone();
        frame_pool.set_hook(Box::new(move |st, req: &mut ProtoReqFrame| {
            req.ts.record(st, Instant::now());
            t.push(req.id, st);
        }));
        frame_pool.set_transition_check(legal_transition);

        let frame_busy = vec![None; cfg.max_sessions];
        Self {
            cfg,
            queues,
            transport,
            inspector,
            nw_pool,
            frame_pool,
            sref: SessionRefTable::new(),
            ids: ReqIdGen::new(),
            frame_busy,
            trace,
        }
    }

    /// Work predicate for the polling thread. Blocked REQUESTED entries
    /// count as work; the poller's progress accounting keeps them from
    /// spinning the thread.
    pub fn has_work(&self) -> bool {
        self.queues.has_work()
            || self.transport.has_inbound()
            || self.nw_pool.count(ReqState::Requested) > 0
            || self.nw_pool.count(ReqState::Completed) > 0
            || self.frame_pool.count(ReqState::Requested) > 0
            || self.frame_pool.count(ReqState::Completed) > 0
    }

    /// Run one full engine pass. Completions drain before new admissions,
    /// and the timeout scan runs after completions so a result arriving in
    /// the same pass can never be flagged as timed out.
    pub fn run_once(&mut self) -> PassStats {
        let mut stats = PassStats::default();
        self.drain_results(&mut stats);
        self.process_completed(&mut stats);
        self.scan_timeouts(&mut stats);
        self.process_completed(&mut stats);
        self.drain_cancels(&mut stats);
        self.admit_nw(&mut stats);
        self.admit_frames(&mut stats);
        self.publish_nw(&mut stats);
        self.publish_frames(&mut stats);
        self.process_completed(&mut stats);
        stats
    }

    // --- completion drain ---------------------------------------------

    fn drain_results(&mut self, stats: &mut PassStats) {
        while let Some(res) = self.transport.nw_get() {
            if let Some(idx) = self.nw_pool.find_in(ReqState::Processing, |r| r.id == res.id) {
                self.nw_pool.get_mut(idx).result = ResultCode::from_wire(res.result);
                self.nw_pool.move_entry(idx, ReqState::Completed);
                stats.completed += 1;
            } else if let Some(idx) = self.nw_pool.find_in(ReqState::Stucked, |r| r.id == res.id) {
                warn!("late nw response for quarantined request {} discarded", res.id);
                self.nw_pool.move_entry(idx, ReqState::Free);
            } else {
                warn!("nw response for unknown request {} dropped", res.id);
            }
        }
        while let Some(res) = self.transport.frame_get() {
            if let Some(idx) = self.frame_pool.find_in(ReqState::Processing, |r| r.id == res.id) {
                self.frame_pool.get_mut(idx).result = ResultCode::from_wire(res.result);
                self.frame_pool.move_entry(idx, ReqState::Completed);
                stats.completed += 1;
            } else if let Some(idx) = self.frame_pool.find_in(ReqState::Stucked, |r| r.id == res.id)
            {
                warn!("late frame response for quarantined request {} discarded", res.id);
                self.frame_pool.move_entry(idx, ReqState::Free);
            } else {
                warn!("frame response for unknown request {} dropped", res.id);
            }
        }
    }

    fn process_completed(&mut self, stats: &mut PassStats) {
        self.process_completed_nw(stats);
        self.process_completed_frames(stats);
    }

    fn process_completed_nw(&mut self, stats: &mut PassStats) {
        for idx in self.nw_pool.indices_in(ReqState::Completed) {
            if self.nw_pool.state_of(idx) != ReqState::Completed {
                continue;
            }
            let (id, cmd, uid, result) = {
                let r = self.nw_pool.get(idx);
                (r.id, r.cmd, r.uid, r.result)
            };
            let ok = result == ResultCode::NoError;
            match policy(cmd).on_complete {
                CompletionAction::ActivateOnSuccess => {
                    if ok {
                        let _ = self.sref.set_state(uid, SessionState::Active);
                    } else {
                        // Failed LOAD tears the fresh session ref back down.
                        if let Err(e) = self.sref.unlink_nw(self.nw_pool.get_mut(idx)) {
                            warn!("load failure unlink: {}", e);
                        }
                        if let Err(e) = self.sref.drop_ref(uid) {
                            warn!("load failure drop_ref: {}", e);
                        }
                    }
                }
                CompletionAction::TeardownIfLast => {
                    let last = self.sref.is_last_ref(uid, id);
                    if let Err(e) = self.sref.unlink_nw(self.nw_pool.get_mut(idx)) {
                        warn!("unload unlink: {}", e);
                    }
                    if last {
                        // Session goes away whether or not the unload itself
                        // succeeded.
                        let _ = self.sref.set_state(uid, SessionState::Invalid);
                        if let Err(e) = self.sref.drop_ref(uid) {
                            warn!("unload drop_ref: {}", e);
                        }
                    }
                }
                CompletionAction::StopWhenLast => {
                    if self.streamoff_must_wait(uid, id) {
                        // Completion blocked until the rest of the
                        // session's work drains; retried next pass.
                        continue;
                    }
                    if self.sref.is_last_ref(uid, id) {
                        let _ = self.sref.set_state(uid, SessionState::Inactive);
                    }
                }
                CompletionAction::ClearCallbacks | CompletionAction::None => {}
            }

            if self.nw_pool.get(idx).link.is_some() {
                if let Err(e) = self.sref.unlink_nw(self.nw_pool.get_mut(idx)) {
                    warn!("nw unlink on completion: {}", e);
                }
            }
            let wire = self.nw_pool.get(idx).result.wire();
            if let Some(mut cb) = self.nw_pool.get_mut(idx).notify.take() {
                cb(CompletionNotice { req_id: id, uid, result: wire, cancelled: false });
            }
            let dest = if self.nw_pool.get(idx).result.quarantines() {
                ReqState::Stucked
            } else {
                ReqState::Free
            };
            debug!("nw {:?} req {} completed with {:?} -> {:?}", cmd, id, result, dest);
            self.nw_pool.move_entry(idx, dest);
            stats.completed += 1;
        }
    }

    fn process_completed_frames(&mut self, stats: &mut PassStats) {
        for idx in self.frame_pool.indices_in(ReqState::Completed) {
            if self.frame_pool.state_of(idx) != ReqState::Completed {
                continue;
            }
            let (id, uid) = {
                let r = self.frame_pool.get(idx);
                (r.id, r.uid)
            };
            if self.frame_pool.get(idx).link.is_some() {
                if let Err(e) = self.sref.unlink_frame(self.frame_pool.get_mut(idx)) {
                    warn!("frame unlink on completion: {}", e);
                }
            }
            let slot = uid as usize;
            if slot < self.frame_busy.len() && self.frame_busy[slot] == Some(id) {
                self.frame_busy[slot] = None;
            }
            let (result, cancelled) = {
                let r = self.frame_pool.get(idx);
                (r.result, r.request_cancel)
            };
            if let Some(mut cb) = self.frame_pool.get_mut(idx).notify.take() {
                cb(CompletionNotice { req_id: id, uid, result: result.wire(), cancelled });
            }
            let dest = if result.quarantines() { ReqState::Stucked } else { ReqState::Free };
            debug!("frame req {} completed with {:?} -> {:?}", id, result, dest);
            self.frame_pool.move_entry(idx, dest);
            stats.completed += 1;
        }
    }

    /// STREAMOFF holds its completion while the session still has other
    /// in-flight work. A sibling STREAMOFF that has itself completed no
    /// longer counts, so the last one to be processed flips the session.
    fn streamoff_must_wait(&self, uid: Uid, self_id: ReqId) -> bool {
        let Some((nw_ids, frame_ids)) = self.sref.linked_ids(uid) else {
            return false;
        };
        if !frame_ids.is_empty() {
            return true;
        }
        for &other in nw_ids.iter().filter(|&&i| i != self_id) {
            match self.nw_pool.find(|r| r.id == other) {
                Some(oidx) => {
                    let e = self.nw_pool.get(oidx);
                    if e.cmd != NwCmd::Streamoff
                        || self.nw_pool.state_of(oidx) != ReqState::Completed
                    {
                        return true;
                    }
                }
                None => continue,
            }
        }
        false
    }

    // --- timeout scan ---------------------------------------------------

    fn scan_timeouts(&mut self, stats: &mut PassStats) {
        use crate::lsm::Verdict;

        let t = self.cfg.timeouts;
        let mut hw_fault = false;

        if let Some(limit) = t.nw_requested {
            self.nw_pool.for_each_in(ReqState::Requested, |req| {
                if state_expired(&req.ts, limit) {
                    warn!("nw req {} timed out in REQUESTED (uid={})", req.id, req.uid);
                    req.result = ResultCode::Driver(DriverErr::SchedTimeout);
                    stats.timed_out += 1;
                    Verdict::Move(ReqState::Completed)
                } else {
                    Verdict::Keep
                }
            });
        }
        if let Some(limit) = t.nw_processing {
            self.nw_pool.for_each_in(ReqState::Processing, |req| {
                if state_expired(&req.ts, limit) {
                    error!("nw req {} timed out in PROCESSING (uid={})", req.id, req.uid);
                    req.result = ResultCode::Driver(DriverErr::NpuHwTimeout);
                    stats.timed_out += 1;
                    hw_fault = true;
                    Verdict::Move(ReqState::Completed)
                } else {
                    Verdict::Keep
                }
            });
        }
        if let Some(limit) = t.frame_requested {
            self.frame_pool.for_each_in(ReqState::Requested, |req| {
                if state_expired(&req.ts, limit) {
                    warn!("frame req {} timed out in REQUESTED (uid={})", req.id, req.uid);
                    req.result = ResultCode::Driver(DriverErr::SchedTimeout);
                    stats.timed_out += 1;
                    Verdict::Move(ReqState::Completed)
                } else {
                    Verdict::Keep
                }
            });
        }
        if let Some(limit) = t.frame_processing {
            self.frame_pool.for_each_in(ReqState::Processing, |req| {
                if state_expired(&req.ts, limit) {
                    error!("frame req {} timed out in PROCESSING (uid={})", req.id, req.uid);
                    req.result = ResultCode::Driver(DriverErr::NpuHwTimeout);
                    stats.timed_out += 1;
                    hw_fault = true;
                    Verdict::Move(ReqState::Completed)
                } else {
                    Verdict::Keep
                }
            });
        }

        if hw_fault {
            self.fault_dump("firmware stopped answering (PROCESSING timeout)");
        }
    }

    fn fault_dump(&mut self, reason: &str) {
        if !fault::dump_allowed() {
            debug!("fault dump suppressed by rate limit: {}", reason);
            return;
        }
        error!("npu fault: {}", reason);
        self.inspector.capture_fw_log();
        self.inspector.dump_registers();
        let rows = self.sref.snapshot();
        self.inspector.list_sessions(&rows);
        for (id, st) in self.trace.recent().iter().rev().take(16) {
            error!("  recent transition: req {} -> {:?}", id, st);
        }
    }

    /// Dump the session table; called by the poller when the pipeline has
    /// been idle suspiciously long.
    pub fn idle_diagnostics(&mut self) {
        warn!("pipeline idle beyond threshold; dumping session table");
        let rows = self.sref.snapshot();
        self.inspector.list_sessions(&rows);
    }

    // --- cancellation -----------------------------------------------------

    fn drain_cancels(&mut self, stats: &mut PassStats) {
        for uid in self.queues.take_cancels() {
            let slot = uid as usize;
            if slot >= self.frame_busy.len() {
                warn!("cancel for uid {} outside session range", uid);
                continue;
            }
            let Some(id) = self.frame_busy[slot] else {
                debug!("cancel for uid {} with no frame in flight", uid);
                continue;
            };
            if let Some(idx) = self.frame_pool.find_in(ReqState::Requested, |r| r.id == id) {
                // Not yet published; complete as cancelled right away.
                let r = self.frame_pool.get_mut(idx);
                r.request_cancel = true;
                r.result = ResultCode::Driver(DriverErr::Cancelled);
                self.frame_pool.move_entry(idx, ReqState::Completed);
                stats.cancelled += 1;
            } else if let Some(idx) = self.frame_pool.find_in(ReqState::Processing, |r| r.id == id)
            {
                // Already at the hardware; mark and honor the eventual
                // completion as cancelled.
                self.frame_pool.get_mut(idx).request_cancel = true;
                stats.cancelled += 1;
                debug!("frame req {} marked for cooperative cancel", id);
            }
        }
    }

    // --- admission --------------------------------------------------------

    fn reject(notify: Option<Notify>, uid: Uid, err: DriverErr) {
        if let Some(mut cb) = notify {
            cb(CompletionNotice {
                req_id: REQ_ID_INVALID,
                uid,
                result: err.wire(),
                cancelled: false,
            });
        }
    }

    fn admit_nw(&mut self, stats: &mut PassStats) {
        loop {
            if self.nw_pool.count(ReqState::Free) == 0 {
                break;
            }
            let Some(sub) = self.queues.take_nw() else {
                break;
            };
            let pol = policy(sub.cmd);
            // Session-side validation happens before the slot leaves FREE,
            // so rejected submissions never enter the state machine.
            if pol.session_linked {
                if sub.cmd == NwCmd::Load {
                    if let Err(e) = self.sref.register(sub.uid) {
                        warn!("load rejected: {}", e);
                        Self::reject(sub.notify, sub.uid, DriverErr::SessionExists);
                        stats.rejected += 1;
                        continue;
                    }
                } else if !self.sref.contains(sub.uid) {
                    warn!("{:?} rejected: session {} not found", sub.cmd, sub.uid);
                    Self::reject(sub.notify, sub.uid, DriverErr::SessionNotFound);
                    stats.rejected += 1;
                    continue;
                }
            }
            let Some(idx) = self.nw_pool.get_entry(ReqState::Free) else {
                break;
            };
            let id = self.ids.next();
            self.nw_pool.get_mut(idx).rearm(id, sub.cmd, sub.uid, sub.param, sub.notify);
            if pol.session_linked {
                if let Err(e) = self.sref.link_nw(self.nw_pool.get_mut(idx)) {
                    warn!("nw link failed: {}", e);
                    let notify = self.nw_pool.get_mut(idx).notify.take();
                    self.nw_pool.put_entry(idx, ReqState::Free);
                    Self::reject(notify, sub.uid, DriverErr::SessionNotFound);
                    stats.rejected += 1;
                    continue;
                }
            }
            self.nw_pool.put_entry(idx, ReqState::Requested);
            debug!("nw {:?} accepted as req {} (uid={})", sub.cmd, id, sub.uid);
            stats.admitted += 1;
        }
    }

    fn admit_frames(&mut self, stats: &mut PassStats) {
        loop {
            if self.frame_pool.count(ReqState::Free) == 0 {
                break;
            }
            let Some(sub) = self.queues.take_frame() else {
                break;
            };
            let slot = sub.uid as usize;
            if slot >= self.cfg.max_sessions {
                warn!("frame rejected: uid {} outside session range", sub.uid);
                Self::reject(sub.notify, sub.uid, DriverErr::InvalidUid);
                stats.rejected += 1;
                continue;
            }
            if !self.sref.contains(sub.uid) {
                warn!("frame rejected: session {} not found", sub.uid);
                Self::reject(sub.notify, sub.uid, DriverErr::SessionNotFound);
                stats.rejected += 1;
                continue;
            }
            if self.frame_busy[slot].is_some() {
                warn!("frame rejected: session {} slot busy", sub.uid);
                Self::reject(sub.notify, sub.uid, DriverErr::SlotBusy);
                stats.rejected += 1;
                continue;
            }
            let Some(idx) = self.frame_pool.get_entry(ReqState::Free) else {
                break;
            };
            let id = self.ids.next();
            self.frame_pool.get_mut(idx).rearm(id, sub.uid, sub.frame_id, sub.notify);
            if let Err(e) = self.sref.link_frame(self.frame_pool.get_mut(idx)) {
                warn!("frame link failed: {}", e);
                let notify = self.frame_pool.get_mut(idx).notify.take();
                self.frame_pool.put_entry(idx, ReqState::Free);
                Self::reject(notify, sub.uid, DriverErr::SessionNotFound);
                stats.rejected += 1;
                continue;
            }
            self.frame_busy[slot] = Some(id);
            self.frame_pool.put_entry(idx, ReqState::Requested);
            debug!("frame accepted as req {} (uid={}, frame_id={})", id, sub.uid, sub.frame_id);
            stats.admitted += 1;
        }
    }

    // --- publication --------------------------------------------------

    fn publish_nw(&mut self, stats: &mut PassStats) {
        let mut local_pending: Vec<usize> = Vec::new();
        for idx in self.nw_pool.indices_in(ReqState::Requested) {
            if self.nw_pool.state_of(idx) != ReqState::Requested {
                continue;
            }
            let (id, cmd, uid, param) = {
                let r = self.nw_pool.get(idx);
                (r.id, r.cmd, r.uid, r.param)
            };
            let pol = policy(cmd);
            if pol.local_only {
                self.nw_pool.move_entry(idx, ReqState::Processing);
                local_pending.push(idx);
                continue;
            }
            if pol.session_linked {
                let st = self.sref.state(uid);
                if st.is_none() {
                    // Session raced away while the request sat queued.
                    self.nw_pool.get_mut(idx).result =
                        ResultCode::Driver(DriverErr::SessionNotFound);
                    self.nw_pool.move_entry(idx, ReqState::Completed);
                    stats.rejected += 1;
                    continue;
                }
                if !(pol.can_publish)(st) {
                    continue;
                }
            }
            let msg = NwMboxMsg { id, cmd: cmd.wire(), uid, param };
            match self.transport.nw_put(&msg) {
                Ok(true) => {
                    debug!("nw {:?} req {} published", cmd, id);
                    stats.published += 1;
                    self.nw_pool.move_entry(idx, ReqState::Processing);
                    if cmd == NwCmd::Streamoff
                        && self.sref.state(uid) == Some(SessionState::Active)
                    {
                        let _ = self.sref.set_state(uid, SessionState::Stopping);
                    }
                }
                Ok(false) => break,
                Err(e) => {
                    error!("nw publish failed: {}", e);
                    self.nw_pool.get_mut(idx).result =
                        ResultCode::Driver(DriverErr::TransportDown);
                    self.nw_pool.move_entry(idx, ReqState::Completed);
                    stats.rejected += 1;
                }
            }
        }
        // CLEAR_CB never touches hardware; it suppresses the session's
        // other callbacks and completes in the same pass.
        for idx in local_pending {
            let (id, uid) = {
                let r = self.nw_pool.get(idx);
                (r.id, r.uid)
            };
            self.apply_clear_cb(uid, id);
            self.nw_pool.get_mut(idx).result = ResultCode::NoError;
            self.nw_pool.move_entry(idx, ReqState::Completed);
            stats.published += 1;
        }
    }

    fn publish_frames(&mut self, stats: &mut PassStats) {
        for idx in self.frame_pool.indices_in(ReqState::Requested) {
            if self.frame_pool.state_of(idx) != ReqState::Requested {
                continue;
            }
            let (id, uid, frame_id) = {
                let r = self.frame_pool.get(idx);
                (r.id, r.uid, r.frame_id)
            };
            let st = self.sref.state(uid);
            if st.is_none() {
                // Session raced away while the frame sat queued.
                self.frame_pool.get_mut(idx).result =
                    ResultCode::Driver(DriverErr::SessionNotFound);
                self.frame_pool.move_entry(idx, ReqState::Completed);
                stats.rejected += 1;
                continue;
            }
            if st != Some(SessionState::Active) {
                continue;
            }
            let msg = FrameMboxMsg { id, uid, frame_id };
            match self.transport.frame_put(&msg) {
                Ok(true) => {
                    debug!("frame req {} published (uid={})", id, uid);
                    stats.published += 1;
                    self.frame_pool.move_entry(idx, ReqState::Processing);
                }
                Ok(false) => break,
                Err(e) => {
                    error!("frame publish failed: {}", e);
                    self.frame_pool.get_mut(idx).result =
                        ResultCode::Driver(DriverErr::TransportDown);
                    self.frame_pool.move_entry(idx, ReqState::Completed);
                    stats.rejected += 1;
                }
            }
        }
    }

    fn apply_clear_cb(&mut self, uid: Uid, except: ReqId) {
        let others = self.sref.force_clear_cb(uid, except);
        let mut cleared = 0usize;
        for id in others {
            if let Some(i) = self.nw_pool.find(|r| r.id == id) {
                self.nw_pool.get_mut(i).notify = None;
                cleared += 1;
            } else if let Some(i) = self.frame_pool.find(|r| r.id == id) {
                self.frame_pool.get_mut(i).notify = None;
                cleared += 1;
            }
        }
        info!("clear_cb for session {} suppressed {} callbacks", uid, cleared);
    }

    // --- shutdown -------------------------------------------------------

    /// Force-complete everything still in flight and clear the session
    /// table; runs on the poller thread right before it exits.
    pub fn shutdown_drain(&mut self) {
        while let Some(sub) = self.queues.take_nw() {
            Self::reject(sub.notify, sub.uid, DriverErr::Cancelled);
        }
        while let Some(sub) = self.queues.take_frame() {
            Self::reject(sub.notify, sub.uid, DriverErr::Cancelled);
        }
        for st in [ReqState::Requested, ReqState::Processing] {
            for idx in self.nw_pool.indices_in(st) {
                self.nw_pool.get_mut(idx).result = ResultCode::Driver(DriverErr::Cancelled);
                self.nw_pool.move_entry(idx, ReqState::Completed);
            }
            for idx in self.frame_pool.indices_in(st) {
                let r = self.frame_pool.get_mut(idx);
                r.result = ResultCode::Driver(DriverErr::Cancelled);
                r.request_cancel = true;
                self.frame_pool.move_entry(idx, ReqState::Completed);
            }
        }
        let mut stats = PassStats::default();
        self.process_completed(&mut stats);
        for uid in self.sref.uids() {
            let _ = self.sref.drop_ref(uid);
        }
        info!("engine drained on shutdown ({} completions delivered)", stats.completed);
    }

    // --- introspection ----------------------------------------------------

    pub fn session_state(&self, uid: Uid) -> Option<SessionState> {
        self.sref.state(uid)
    }

    pub fn session_count(&self) -> usize {
        self.sref.len()
    }

    pub fn nw_count(&self, state: ReqState) -> usize {
        self.nw_pool.count(state)
    }

    pub fn frame_count(&self, state: ReqState) -> usize {
        self.frame_pool.count(state)
    }

    pub fn trace(&self) -> Arc<TransitionTrace> {
        self.trace.clone()
    }
}
