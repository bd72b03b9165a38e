//! Bounds Descriptor Queue (BDQ): the pointer-metadata store state machine.
//!
//! One BDQ slot is allocated per `bndstr`/`bndclr`/`bndsrch` micro-op
//! (`spec.md` §4.1, §4.8). Each slot walks `b_init → b_occChk →
//! (b_bndStr | b_fail) → b_done`, mirroring the MCQ shape but writing
//! (or searching) the Hash-based Bounds Table instead of only reading it.

use crate::common::{BoundsOp, MicroOp, is_killed_by_branch};
use crate::hbt::BoundsDescriptor;

/// Lifecycle state of a BDQ entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BdqState {
    /// Allocated, awaiting the AGU-computed address and payload.
    #[default]
    Init,
    /// Address known; checking way occupancy before committing a write.
    OccChk,
    /// Writing (or clearing) the chosen HBT way.
    BndStr,
    /// Occupancy check found no eligible way (table row full).
    Fail,
    /// Write (or search) complete.
    Done,
}

/// A single BDQ slot.
#[derive(Clone, Debug)]
pub struct BdqEntry {
    /// The underlying micro-op (`bounds_op` selects store/clear/search).
    pub uop: MicroOp,
    /// Pointer value the descriptor is keyed on, once delivered.
    pub addr: Option<u64>,
    /// The bounds payload to write, for `Store`; unused for `Clear`/`Search`.
    pub descriptor: BoundsDescriptor,
    /// Whether an occupancy-check or store probe has been issued and not
    /// yet answered.
    pub executed: bool,
    /// Whether the ROB has committed the parent instruction.
    pub committed: bool,
    /// Way chosen by the occupancy check.
    pub way: u32,
    /// Number of ways rejected so far during occupancy checking.
    pub count: u32,
    /// State machine position.
    pub state: BdqState,
    /// Occupancy flag.
    pub valid: bool,
}

impl Default for BdqEntry {
    fn default() -> Self {
        Self {
            uop: MicroOp::default(),
            addr: None,
            descriptor: BoundsDescriptor::default(),
            executed: false,
            committed: false,
            way: 0,
            count: 0,
            state: BdqState::default(),
            valid: false,
        }
    }
}

impl BdqEntry {
    /// Whether the entry is ready to dequeue: valid, committed, and
    /// resolved (`spec.md` §4.8).
    #[must_use]
    pub fn dequeuable(&self) -> bool {
        self.valid && self.committed && matches!(self.state, BdqState::Done | BdqState::Fail)
    }

    /// Advances past occupancy-check: `occupied` is the pluggable
    /// `occ_check` predicate's verdict for the current way (`spec.md` §9
    /// open question 1 applies symmetrically to BDQ occupancy checking).
    pub fn on_occ_check_response(&mut self, way_free: bool, hbt_num_way: u32) {
        self.executed = false;
        if way_free || self.uop.bounds_op != BoundsOp::Store {
            self.state = BdqState::BndStr;
        } else if self.count + 1 < hbt_num_way {
            self.count += 1;
            self.way = self.count;
        } else {
            self.state = BdqState::Fail;
        }
    }

    /// Advances past the store/clear/search write once the DCache
    /// acknowledges it.
    pub fn on_store_ack(&mut self) {
        self.executed = false;
        self.state = BdqState::Done;
    }
}

/// Bounds Descriptor Queue — fixed-capacity circular buffer of [`BdqEntry`].
pub struct Bdq {
    entries: Vec<BdqEntry>,
    head: usize,
    tail: usize,
    count: usize,
}

impl Bdq {
    /// Creates an empty BDQ with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let mut entries = Vec::with_capacity(capacity);
        entries.resize_with(capacity, BdqEntry::default);
        Self {
            entries,
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    /// Queue capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Number of valid entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether the queue is full (`bdq_full`).
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.count == self.entries.len()
    }

    /// Allocates a BDQ slot for a dispatched bounds-metadata op
    /// (`spec.md` §3, §4.1).
    ///
    /// # Panics
    ///
    /// Panics (invariant 2) if the slot at `tail` is still valid.
    pub fn allocate(&mut self, uop: MicroOp) -> Option<usize> {
        if self.is_full() {
            return None;
        }
        let idx = self.tail;
        assert!(!self.entries[idx].valid, "bdq slot {idx} double-enqueued");

        self.entries[idx] = BdqEntry {
            uop,
            valid: true,
            ..BdqEntry::default()
        };

        self.tail = (self.tail + 1) % self.entries.len();
        self.count += 1;
        Some(idx)
    }

    /// Immutable access to a slot.
    #[must_use]
    pub fn get(&self, idx: usize) -> &BdqEntry {
        &self.entries[idx]
    }

    /// Mutable access to a slot.
    pub fn get_mut(&mut self, idx: usize) -> &mut BdqEntry {
        &mut self.entries[idx]
    }

    /// Iterates every valid slot's index, oldest first.
    pub fn for_each_valid_idx(&self, mut f: impl FnMut(usize, &BdqEntry)) {
        if self.count == 0 {
            return;
        }
        let mut idx = self.head;
        for _ in 0..self.count {
            if self.entries[idx].valid {
                f(idx, &self.entries[idx]);
            }
            idx = (idx + 1) % self.entries.len();
        }
    }

    /// Age-priority search for the oldest slot awaiting an occupancy-check
    /// response this cycle.
    #[must_use]
    pub fn find_occ_check_candidate(&self) -> Option<usize> {
        self.find_in_state(BdqState::OccChk)
    }

    /// Age-priority search for the oldest slot awaiting a store/clear/search
    /// response this cycle.
    #[must_use]
    pub fn find_store_candidate(&self) -> Option<usize> {
        self.find_in_state(BdqState::BndStr)
    }

    fn find_in_state(&self, state: BdqState) -> Option<usize> {
        if self.count == 0 {
            return None;
        }
        let mut idx = self.head;
        for _ in 0..self.count {
            let e = &self.entries[idx];
            if e.valid && e.state == state && !e.executed {
                return Some(idx);
            }
            idx = (idx + 1) % self.entries.len();
        }
        None
    }

    /// Dequeues the head entry if it is resolved and committed; bumps the
    /// appropriate `num_bndstr`/`num_bndclr`/`num_bndsrch` counter in
    /// `stats` via the caller, since this type has no stats dependency of
    /// its own.
    pub fn try_dequeue_head(&mut self) -> Option<BdqEntry> {
        if self.count == 0 || !self.entries[self.head].dequeuable() {
            return None;
        }
        let entry = self.entries[self.head].clone();
        self.entries[self.head] = BdqEntry::default();
        self.head = (self.head + 1) % self.entries.len();
        self.count -= 1;
        Some(entry)
    }

    /// Branch-mispredict squash.
    pub fn kill_mispredicted(&mut self, new_tail: usize, resolved_mask: u32) {
        if self.count == 0 {
            self.tail = new_tail;
            return;
        }
        let mut idx = self.head;
        let mut new_count = 0;
        for _ in 0..self.count {
            if self.entries[idx].valid {
                if is_killed_by_branch(self.entries[idx].uop.br_mask, resolved_mask, true) {
                    self.entries[idx] = BdqEntry::default();
                } else {
                    new_count += 1;
                }
            }
            idx = (idx + 1) % self.entries.len();
        }
        self.tail = new_tail;
        self.count = new_count;
    }

    /// Exception squash: BDQ is fully reset (`spec.md` §4.9).
    pub fn flush_all(&mut self) {
        for e in &mut self.entries {
            *e = BdqEntry::default();
        }
        self.head = 0;
        self.tail = 0;
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_uop() -> MicroOp {
        MicroOp {
            uses_bdq: true,
            bounds_op: BoundsOp::Store,
            ..MicroOp::default()
        }
    }

    #[test]
    fn occ_check_free_way_proceeds_to_store() {
        let mut entry = BdqEntry {
            uop: store_uop(),
            state: BdqState::OccChk,
            valid: true,
            ..BdqEntry::default()
        };
        entry.on_occ_check_response(true, 4);
        assert_eq!(entry.state, BdqState::BndStr);
    }

    #[test]
    fn occ_check_exhaustion_fails() {
        let mut entry = BdqEntry {
            uop: store_uop(),
            state: BdqState::OccChk,
            valid: true,
            ..BdqEntry::default()
        };
        for _ in 0..4 {
            entry.on_occ_check_response(false, 4);
        }
        assert_eq!(entry.state, BdqState::Fail);
    }

    #[test]
    fn clear_skips_occupancy_checking() {
        let mut entry = BdqEntry {
            uop: MicroOp {
                uses_bdq: true,
                bounds_op: BoundsOp::Clear,
                ..MicroOp::default()
            },
            state: BdqState::OccChk,
            valid: true,
            ..BdqEntry::default()
        };
        entry.on_occ_check_response(false, 4);
        assert_eq!(entry.state, BdqState::BndStr);
    }

    #[test]
    fn dequeue_accepts_done_or_fail() {
        let mut bdq = Bdq::new(4);
        let idx = bdq.allocate(store_uop()).unwrap();
        bdq.get_mut(idx).committed = true;
        bdq.get_mut(idx).state = BdqState::Fail;
        assert!(bdq.try_dequeue_head().is_some());
    }

    #[test]
    fn store_then_ack_reaches_done() {
        let mut entry = BdqEntry {
            uop: store_uop(),
            state: BdqState::BndStr,
            valid: true,
            ..BdqEntry::default()
        };
        entry.on_store_ack();
        assert_eq!(entry.state, BdqState::Done);
    }
}
