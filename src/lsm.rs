// CLASSIFICATION: COMMUNITY
// Filename: lsm.rs v0.9
// Author: Lukas Bower
// Date Modified: 2026-02-11

//! List-state-machine container: a fixed-capacity pool of typed entries,
//! each tagged with one [`ReqState`]. "Lists" are per-state index queues
//! over the same slot array, so moving an entry between lists is a metadata
//! update, never a copy.
//!
//! A registered hook fires on every transition (timestamp stamping, trace
//! capture). An optional legality matrix turns an illegal transition into a
//! panic: by the time a bad transition is attempted the machine's
//! invariants are already gone, and continuing would corrupt live slots.

use std::collections::VecDeque;

use log::trace;

use crate::req::{ReqState, REQ_STATE_COUNT};

/// Transition hook: `(new_state, entry)`.
pub type Hook<T> = Box<dyn FnMut(ReqState, &mut T) + Send>;

/// Legality check: `(from, to) -> allowed`.
pub type TransitionCheck = fn(ReqState, ReqState) -> bool;

/// Per-entry verdict returned by [`Lsm::for_each_in`] callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Keep,
    Move(ReqState),
}

struct Slot<T> {
    state: ReqState,
    /// Popped via `get_entry` and not yet re-attached.
    detached: bool,
    payload: T,
}

/// Fixed-capacity state-tagged pool.
pub struct Lsm<T> {
    name: &'static str,
    slots: Vec<Slot<T>>,
    lists: [VecDeque<usize>; REQ_STATE_COUNT],
    hook: Option<Hook<T>>,
    check: Option<TransitionCheck>,
}

impl<T: Default> Lsm<T> {
    /// Create a pool of `capacity` default entries, all tagged FREE.
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        let mut free = VecDeque::with_capacity(capacity);
        for i in 0..capacity {
            slots.push(Slot { state: ReqState::Free, detached: false, payload: T::default() });
            free.push_back(i);
        }
        let mut lists: [VecDeque<usize>; REQ_STATE_COUNT] = Default::default();
        lists[ReqState::Free.idx()] = free;
        Self { name, slots, lists, hook: None, check: None }
    }
}

impl<T> Lsm<T> {
    /// Install the transition hook. Replaces any previous hook.
    pub fn set_hook(&mut self, hook: Hook<T>) {
        self.hook = Some(hook);
    }

    /// Install the transition legality matrix. A violating move panics.
    pub fn set_transition_check(&mut self, check: TransitionCheck) {
        self.check = Some(check);
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn count(&self, state: ReqState) -> usize {
        self.lists[state.idx()].len()
    }

    pub fn state_of(&self, idx: usize) -> ReqState {
        self.slots[idx].state
    }

    pub fn get(&self, idx: usize) -> &T {
        &self.slots[idx].payload
    }

    pub fn get_mut(&mut self, idx: usize) -> &mut T {
        &mut self.slots[idx].payload
    }

    /// Detach and return one entry currently tagged `state`, oldest first.
    /// The caller must re-attach it with [`Lsm::put_entry`] before the end
    /// of the engine pass; a detached entry belongs to no list.
    pub fn get_entry(&mut self, state: ReqState) -> Option<usize> {
        let idx = self.lists[state.idx()].pop_front()?;
        let slot = &mut self.slots[idx];
        if slot.detached || slot.state != state {
            panic!("lsm[{}]: list corruption at slot {}", self.name, idx);
        }
        slot.detached = true;
        Some(idx)
    }

    /// Re-attach a detached entry under `state`.
    pub fn put_entry(&mut self, idx: usize, state: ReqState) {
        self.transition(idx, state);
    }

    /// Move an attached entry to `state`.
    pub fn move_entry(&mut self, idx: usize, state: ReqState) {
        self.transition(idx, state);
    }

    fn transition(&mut self, idx: usize, to: ReqState) {
        let from = self.slots[idx].state;
        let detached = self.slots[idx].detached;
        // Re-attaching a rejected entry to its own list is a no-op, not a
        // transition; no hook fires.
        if detached && from == to {
            self.slots[idx].detached = false;
            self.lists[to.idx()].push_back(idx);
            return;
        }
        if let Some(check) = self.check {
            if !check(from, to) {
                panic!(
                    "lsm[{}]: illegal transition {:?} -> {:?} at slot {}",
                    self.name, from, to, idx
                );
            }
        }
        if !detached {
            let list = &mut self.lists[from.idx()];
            match list.iter().position(|&i| i == idx) {
                Some(pos) => {
                    list.remove(pos);
                }
                None => panic!("lsm[{}]: slot {} missing from {:?} list", self.name, idx, from),
            }
        }
        let slot = &mut self.slots[idx];
        slot.state = to;
        slot.detached = false;
        self.lists[to.idx()].push_back(idx);
        if let Some(hook) = self.hook.as_mut() {
            hook(to, &mut self.slots[idx].payload);
        }
        trace!("lsm[{}]: slot {} {:?} -> {:?}", self.name, idx, from, to);
    }

    /// Snapshot of the indices currently tagged `state`, oldest first.
    pub fn indices_in(&self, state: ReqState) -> Vec<usize> {
        self.lists[state.idx()].iter().copied().collect()
    }

    /// Walk a snapshot of the entries in `state`; the callback's verdict
    /// may move the current entry. Only the current entry may be moved
    /// mid-walk, which the snapshot-and-recheck discipline guarantees.
    pub fn for_each_in<F>(&mut self, state: ReqState, mut f: F)
    where
        F: FnMut(&mut T) -> Verdict,
    {
        for idx in self.indices_in(state) {
            if self.slots[idx].state != state || self.slots[idx].detached {
                continue;
            }
            match f(&mut self.slots[idx].payload) {
                Verdict::Keep => {}
                Verdict::Move(to) => self.transition(idx, to),
            }
        }
    }

    /// Find an entry in `state` matching the predicate.
    pub fn find_in<F>(&self, state: ReqState, pred: F) -> Option<usize>
    where
        F: Fn(&T) -> bool,
    {
        self.lists[state.idx()].iter().copied().find(|&i| pred(&self.slots[i].payload))
    }

    /// Find a live (non-FREE) entry matching the predicate. FREE slots are
    /// excluded: their payloads are stale envelopes from earlier requests.
    pub fn find<F>(&self, pred: F) -> Option<usize>
    where
        F: Fn(&T) -> bool,
    {
        self.slots
            .iter()
            .enumerate()
            .find(|(_, s)| s.state != ReqState::Free && !s.detached && pred(&s.payload))
            .map(|(i, _)| i)
    }
}
