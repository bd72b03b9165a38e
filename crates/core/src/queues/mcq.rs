//! Memory-Check Queue (MCQ): the bounds-check state machine.
//!
//! One MCQ slot is allocated per non-fence, non-excepted memory-touching
//! micro-op (`spec.md` §4.1). Each slot walks `m_init → m_bndChk →
//! (m_done | m_fail)` as it probes the Hash-based Bounds Table
//! (`spec.md` §4.7).

use crate::common::{MicroOp, is_killed_by_branch};

/// Lifecycle state of an MCQ entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum McqState {
    /// Allocated, awaiting the AGU-computed address.
    #[default]
    Init,
    /// Address known; probing the HBT.
    BndChk,
    /// Exhausted all `hbt_num_way` probes without a match.
    Fail,
    /// A probe matched; ready to commit and dequeue.
    Done,
}

/// A single MCQ slot.
#[derive(Clone, Debug)]
pub struct McqEntry {
    /// The underlying micro-op, forced to `mem_cmd = Read`, `mem_size =
    /// Nop`, `uses_mcq = true` at allocation (`spec.md` §3).
    pub uop: MicroOp,
    /// Pointer value being checked, PAC included, once delivered.
    pub addr: Option<u64>,
    /// Whether a probe for the current way has been issued and not yet
    /// answered.
    pub executed: bool,
    /// Whether the ROB has committed the parent load/store.
    pub committed: bool,
    /// Whether the original access was a signed load (feeds
    /// `num_signed_inst` vs `num_unsigned_inst`).
    pub signed: bool,
    /// Current probe position within the HBT row.
    pub way: u32,
    /// Number of failed probes so far.
    pub count: u32,
    /// State machine position.
    pub state: McqState,
    /// Occupancy flag.
    pub valid: bool,
}

impl Default for McqEntry {
    fn default() -> Self {
        Self {
            uop: MicroOp::default(),
            addr: None,
            executed: false,
            committed: false,
            signed: false,
            way: 0,
            count: 0,
            state: McqState::default(),
            valid: false,
        }
    }
}

impl McqEntry {
    /// Whether the entry is ready to dequeue: valid, committed, and
    /// resolved to `m_done` (`spec.md` §4.7).
    #[must_use]
    pub fn dequeuable(&self) -> bool {
        self.valid && self.committed && self.state == McqState::Done
    }

    /// Advances the state machine on a bounds-probe response.
    ///
    /// `matched` is the result of the pluggable `bnd_check` predicate over
    /// `{resp.data, addr, way}` (`spec.md` §9 open question 1).
    pub fn on_probe_response(&mut self, matched: bool, hbt_num_way: u32) {
        self.executed = false;
        if matched {
            self.state = McqState::Done;
        } else if self.count + 1 < hbt_num_way {
            self.count += 1;
            self.way = self.count;
        } else {
            self.state = McqState::Fail;
        }
    }
}

/// Memory-Check Queue — fixed-capacity circular buffer of [`McqEntry`].
pub struct Mcq {
    entries: Vec<McqEntry>,
    head: usize,
    tail: usize,
    count: usize,
}

impl Mcq {
    /// Creates an empty MCQ with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let mut entries = Vec::with_capacity(capacity);
        entries.resize_with(capacity, McqEntry::default);
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

    /// Whether the queue is full (`mcq_full`).
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.count == self.entries.len()
    }

    /// Allocates an MCQ slot, forcing the micro-op into its bounds-probe
    /// shape (`spec.md` §3, §4.1).
    ///
    /// # Panics
    ///
    /// Panics (invariant 2) if the slot at `tail` is still valid.
    pub fn allocate(&mut self, mut uop: MicroOp, signed: bool) -> Option<usize> {
        if self.is_full() {
            return None;
        }
        let idx = self.tail;
        assert!(!self.entries[idx].valid, "mcq slot {idx} double-enqueued");

        uop.mem_cmd = crate::common::MemCmd::Read;
        uop.mem_size = crate::common::MemSize::Nop;
        uop.uses_mcq = true;

        self.entries[idx] = McqEntry {
            uop,
            signed,
            valid: true,
            ..McqEntry::default()
        };

        self.tail = (self.tail + 1) % self.entries.len();
        self.count += 1;
        Some(idx)
    }

    /// Immutable access to a slot.
    #[must_use]
    pub fn get(&self, idx: usize) -> &McqEntry {
        &self.entries[idx]
    }

    /// Mutable access to a slot.
    pub fn get_mut(&mut self, idx: usize) -> &mut McqEntry {
        &mut self.entries[idx]
    }

    /// Iterates every valid slot's index, oldest first.
    pub fn for_each_valid_idx(&self, mut f: impl FnMut(usize, &McqEntry)) {
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

    /// Age-priority search for the oldest slot in `m_bndChk` that hasn't
    /// executed this cycle (`mcq_load_idx`, `spec.md` §4.2).
    #[must_use]
    pub fn find_probe_candidate(&self) -> Option<usize> {
        if self.count == 0 {
            return None;
        }
        let mut idx = self.head;
        for _ in 0..self.count {
            let e = &self.entries[idx];
            if e.valid && e.state == McqState::BndChk && !e.executed {
                return Some(idx);
            }
            idx = (idx + 1) % self.entries.len();
        }
        None
    }

    /// Dequeues the head entry if it is resolved and committed; otherwise
    /// a no-op (`spec.md` §4.7: "Dequeue iff valid ∧ committed ∧
    /// state=m_done").
    pub fn try_dequeue_head(&mut self) -> Option<McqEntry> {
        if self.count == 0 || !self.entries[self.head].dequeuable() {
            return None;
        }
        let entry = self.entries[self.head].clone();
        self.entries[self.head] = McqEntry::default();
        self.head = (self.head + 1) % self.entries.len();
        self.count -= 1;
        Some(entry)
    }

    /// Branch-mispredict squash: clears `valid` on any slot killed by the
    /// resolved branch, and rewinds `tail`.
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
                    self.entries[idx] = McqEntry::default();
                } else {
                    new_count += 1;
                }
            }
            idx = (idx + 1) % self.entries.len();
        }
        self.tail = new_tail;
        self.count = new_count;
    }

    /// Exception squash: MCQ is fully reset (`spec.md` §4.9).
    pub fn flush_all(&mut self) {
        for e in &mut self.entries {
            *e = McqEntry::default();
        }
        self.head = 0;
        self.tail = 0;
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_match_reaches_done() {
        let mut entry = McqEntry {
            state: McqState::BndChk,
            valid: true,
            ..McqEntry::default()
        };
        entry.on_probe_response(true, 4);
        assert_eq!(entry.state, McqState::Done);
    }

    #[test]
    fn probe_miss_retries_until_exhausted() {
        let mut entry = McqEntry {
            state: McqState::BndChk,
            valid: true,
            ..McqEntry::default()
        };
        for expected_count in 1..4 {
            entry.on_probe_response(false, 4);
            assert_eq!(entry.state, McqState::BndChk);
            assert_eq!(entry.count, expected_count);
        }
        entry.on_probe_response(false, 4);
        assert_eq!(entry.state, McqState::Fail);
    }

    #[test]
    fn dequeue_requires_committed_and_done() {
        let mut mcq = Mcq::new(4);
        let idx = mcq.allocate(MicroOp::default(), false).unwrap();
        assert!(mcq.try_dequeue_head().is_none());

        mcq.get_mut(idx).state = McqState::Done;
        assert!(mcq.try_dequeue_head().is_none());

        mcq.get_mut(idx).committed = true;
        assert!(mcq.try_dequeue_head().is_some());
        assert!(mcq.len() == 0);
    }

    #[test]
    fn exhaustion_matches_spec_scenario_five() {
        // spec.md §8 scenario 5: hbt_num_way=4, all probes fail.
        let mut mcq = Mcq::new(2);
        let idx = mcq.allocate(MicroOp::default(), false).unwrap();
        mcq.get_mut(idx).state = McqState::BndChk;
        for _ in 0..4 {
            mcq.get_mut(idx).on_probe_response(false, 4);
        }
        assert_eq!(mcq.get(idx).state, McqState::Fail);
    }
}
