// CLASSIFICATION: COMMUNITY
// Filename: sref.rs v0.8
// Author: Lukas Bower
// Date Modified: 2026-02-19

//! Session reference tracker: maps a session UID to its activity state and
//! the lists of in-flight requests it owns. The lists hold request ids
//! only — the request envelopes themselves live in the LSM pools, and
//! membership here is a borrowed relationship.

use std::collections::HashMap;

use log::{info, warn};
use thiserror::Error;

use crate::req::{ProtoReqFrame, ProtoReqNw, ReqId, Uid};

/// Coarse session activity state gating which nw commands are legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Registered (LOAD accepted) but not yet streaming.
    #[default]
    Inactive,
    /// LOAD completed successfully; frames may flow.
    Active,
    /// STREAMOFF in flight, draining remaining work.
    Stopping,
    /// Torn down; only removal remains.
    Invalid,
}

/// One entry per registered session.
#[derive(Debug, Default)]
struct SessionRef {
    s_state: SessionState,
    nw: Vec<ReqId>,
    frames: Vec<ReqId>,
}

/// Read-only listing row for diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct SessionSnapshot {
    pub uid: Uid,
    pub s_state: SessionState,
    pub nw_inflight: usize,
    pub frame_inflight: usize,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SrefError {
    #[error("session {0} not found")]
    NotFound(Uid),
    #[error("session {0} already registered")]
    AlreadyRegistered(Uid),
    #[error("request {req} already linked to session {uid}")]
    DoubleLink { req: ReqId, uid: Uid },
    #[error("request {0} carries no session link")]
    NotLinked(ReqId),
    #[error("request {req} not owned by session {uid}")]
    NotOwned { req: ReqId, uid: Uid },
}

/// UID-indexed registry of active sessions.
#[derive(Default)]
pub struct SessionRefTable {
    map: HashMap<Uid, SessionRef>,
}

impl SessionRefTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session in INACTIVE; called when its LOAD is accepted.
    pub fn register(&mut self, uid: Uid) -> Result<(), SrefError> {
        if self.map.contains_key(&uid) {
            return Err(SrefError::AlreadyRegistered(uid));
        }
        self.map.insert(uid, SessionRef::default());
        info!("session {} registered", uid);
        Ok(())
    }

    /// Remove a session entry. Outstanding linked requests are a
    /// should-not-happen diagnostic, not a failure: the entry is removed
    /// either way.
    pub fn drop_ref(&mut self, uid: Uid) -> Result<(), SrefError> {
        let entry = self.map.remove(&uid).ok_or(SrefError::NotFound(uid))?;
        if !entry.nw.is_empty() || !entry.frames.is_empty() {
            warn!(
                "session {} dropped with outstanding requests (nw={}, frames={})",
                uid,
                entry.nw.len(),
                entry.frames.len()
            );
        }
        info!("session {} dropped", uid);
        Ok(())
    }

    pub fn contains(&self, uid: Uid) -> bool {
        self.map.contains_key(&uid)
    }

    pub fn state(&self, uid: Uid) -> Option<SessionState> {
        self.map.get(&uid).map(|e| e.s_state)
    }

    pub fn set_state(&mut self, uid: Uid, state: SessionState) -> Result<(), SrefError> {
        let entry = self.map.get_mut(&uid).ok_or(SrefError::NotFound(uid))?;
        info!("session {} state {:?} -> {:?}", uid, entry.s_state, state);
        entry.s_state = state;
        Ok(())
    }

    /// Attach a nw request to its owning session's list.
    pub fn link_nw(&mut self, req: &mut ProtoReqNw) -> Result<(), SrefError> {
        if let Some(uid) = req.link {
            return Err(SrefError::DoubleLink { req: req.id, uid });
        }
        let entry = self.map.get_mut(&req.uid).ok_or(SrefError::NotFound(req.uid))?;
        entry.nw.push(req.id);
        req.link = Some(req.uid);
        Ok(())
    }

    pub fn link_frame(&mut self, req: &mut ProtoReqFrame) -> Result<(), SrefError> {
        if let Some(uid) = req.link {
            return Err(SrefError::DoubleLink { req: req.id, uid });
        }
        let entry = self.map.get_mut(&req.uid).ok_or(SrefError::NotFound(req.uid))?;
        entry.frames.push(req.id);
        req.link = Some(req.uid);
        Ok(())
    }

    /// Detach a nw request after an ownership walk of the session's list.
    /// The walk is O(n) but per-session in-flight counts are small.
    pub fn unlink_nw(&mut self, req: &mut ProtoReqNw) -> Result<(), SrefError> {
        let uid = req.link.ok_or(SrefError::NotLinked(req.id))?;
        let entry = self.map.get_mut(&uid).ok_or(SrefError::NotFound(uid))?;
        let pos = entry
            .nw
            .iter()
            .position(|&id| id == req.id)
            .ok_or(SrefError::NotOwned { req: req.id, uid })?;
        entry.nw.remove(pos);
        req.link = None;
        Ok(())
    }

    pub fn unlink_frame(&mut self, req: &mut ProtoReqFrame) -> Result<(), SrefError> {
        let uid = req.link.ok_or(SrefError::NotLinked(req.id))?;
        let entry = self.map.get_mut(&uid).ok_or(SrefError::NotFound(uid))?;
        let pos = entry
            .frames
            .iter()
            .position(|&id| id == req.id)
            .ok_or(SrefError::NotOwned { req: req.id, uid })?;
        entry.frames.remove(pos);
        req.link = None;
        Ok(())
    }

    /// True iff `req_id` is the sole remaining request linked to `uid`.
    pub fn is_last_ref(&self, uid: Uid, req_id: ReqId) -> bool {
        match self.map.get(&uid) {
            Some(e) => {
                e.nw.len() + e.frames.len() == 1
                    && (e.nw.contains(&req_id) || e.frames.contains(&req_id))
            }
            None => false,
        }
    }

    /// Ids of all requests linked to `uid` except `except`; the engine
    /// nulls their completion callbacks on the fault-recovery path.
    pub fn force_clear_cb(&self, uid: Uid, except: ReqId) -> Vec<ReqId> {
        match self.map.get(&uid) {
            Some(e) => e
                .nw
                .iter()
                .chain(e.frames.iter())
                .copied()
                .filter(|&id| id != except)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Linked request ids, `(nw, frames)`.
    pub fn linked_ids(&self, uid: Uid) -> Option<(&[ReqId], &[ReqId])> {
        self.map.get(&uid).map(|e| (e.nw.as_slice(), e.frames.as_slice()))
    }

    pub fn uids(&self) -> Vec<Uid> {
        self.map.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn snapshot(&self) -> Vec<SessionSnapshot> {
        let mut rows: Vec<SessionSnapshot> = self
            .map
            .iter()
            .map(|(&uid, e)| SessionSnapshot {
                uid,
                s_state: e.s_state,
                nw_inflight: e.nw.len(),
                frame_inflight: e.frames.len(),
            })
            .collect();
        rows.sort_by_key(|r| r.uid);
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::NwCmd;

    fn nw_req(id: ReqId, uid: Uid) -> ProtoReqNw {
        let mut r = ProtoReqNw::default();
        r.rearm(id, NwCmd::Load, uid, 0, None);
        r
    }

    fn frame_req(id: ReqId, uid: Uid) -> ProtoReqFrame {
        let mut r = ProtoReqFrame::default();
        r.rearm(id, uid, 0, None);
        r
    }

    #[test]
    fn register_then_drop_is_clean() {
        let mut t = SessionRefTable::new();
        t.register(7).unwrap();
        assert_eq!(t.state(7), Some(SessionState::Inactive));
        t.drop_ref(7).unwrap();
        assert!(!t.contains(7));
    }

    #[test]
    fn duplicate_register_fails() {
        let mut t = SessionRefTable::new();
        t.register(7).unwrap();
        assert_eq!(t.register(7), Err(SrefError::AlreadyRegistered(7)));
    }

    #[test]
    fn drop_with_outstanding_still_removes() {
        let mut t = SessionRefTable::new();
        t.register(7).unwrap();
        let mut r = nw_req(1, 7);
        t.link_nw(&mut r).unwrap();
        // Warns, but the entry goes away regardless.
        t.drop_ref(7).unwrap();
        assert!(!t.contains(7));
    }

    #[test]
    fn link_unlink_round_trip_restores_emptiness() {
        let mut t = SessionRefTable::new();
        t.register(7).unwrap();
        let mut r = nw_req(1, 7);
        t.link_nw(&mut r).unwrap();
        assert_eq!(t.linked_ids(7).unwrap().0.len(), 1);
        t.unlink_nw(&mut r).unwrap();
        assert!(t.linked_ids(7).unwrap().0.is_empty());
        assert!(r.link.is_none());
    }

    #[test]
    fn double_link_is_rejected() {
        let mut t = SessionRefTable::new();
        t.register(7).unwrap();
        let mut r = nw_req(1, 7);
        t.link_nw(&mut r).unwrap();
        assert_eq!(t.link_nw(&mut r), Err(SrefError::DoubleLink { req: 1, uid: 7 }));
    }

    #[test]
    fn unlink_foreign_request_is_not_owned() {
        let mut t = SessionRefTable::new();
        t.register(7).unwrap();
        let mut r = nw_req(1, 7);
        t.link_nw(&mut r).unwrap();
        // Forge a request claiming linkage it never had.
        let mut forged = nw_req(2, 7);
        forged.link = Some(7);
        assert_eq!(t.unlink_nw(&mut forged), Err(SrefError::NotOwned { req: 2, uid: 7 }));
    }

    #[test]
    fn is_last_ref_truth_table() {
        let mut t = SessionRefTable::new();
        t.register(7).unwrap();
        assert!(!t.is_last_ref(7, 1));
        let mut a = nw_req(1, 7);
        t.link_nw(&mut a).unwrap();
        assert!(t.is_last_ref(7, 1));
        let mut b = frame_req(2, 7);
        t.link_frame(&mut b).unwrap();
        assert!(!t.is_last_ref(7, 1));
        assert!(!t.is_last_ref(7, 2));
        t.unlink_nw(&mut a).unwrap();
        assert!(t.is_last_ref(7, 2));
        assert!(!t.is_last_ref(8, 2));
    }

    #[test]
    fn force_clear_cb_excludes_self() {
        let mut t = SessionRefTable::new();
        t.register(7).unwrap();
        let mut a = nw_req(1, 7);
        let mut b = nw_req(2, 7);
        let mut c = frame_req(3, 7);
        t.link_nw(&mut a).unwrap();
        t.link_nw(&mut b).unwrap();
        t.link_frame(&mut c).unwrap();
        let mut others = t.force_clear_cb(7, 2);
        others.sort_unstable();
        assert_eq!(others, vec![1, 3]);
    }
}
