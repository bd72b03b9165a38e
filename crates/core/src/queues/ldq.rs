//! Load Queue (LDQ).
//!
//! Holds in-flight loads from dispatch through commit. Tracks execution,
//! forwarding, and the order-violation/observation bits LCAM sets
//! (`spec.md` §3, §4.5).

use crate::common::{MicroOp, PhysAddr, VirtAddr, is_killed_by_branch};

/// Number of cycles a load stays blocked after firing, so the same LDQ
/// slot cannot re-fire for the following two cycles (`spec.md` §4.2,
/// `p1_block_load_mask` / `p2_block_load_mask`).
const FIRE_BLOCK_CYCLES: u8 = 2;

/// A single LDQ slot.
#[derive(Clone, Debug)]
pub struct LdqEntry {
    /// The dispatched load micro-op.
    pub uop: MicroOp,
    /// Translated (or still-virtual) address, once the AGU has delivered
    /// one. `None` before address generation.
    pub addr: Option<u64>,
    /// Whether `addr` still needs DTLB translation.
    pub addr_is_virtual: bool,
    /// Whether the translated address targets uncacheable memory.
    pub addr_is_uncacheable: bool,
    /// Whether the load has fired a (possibly since-nacked) DCache
    /// request.
    pub executed: bool,
    /// Set by LCAM when an in-flight response must be dropped rather than
    /// written back (`spec.md` §4.5/§4.6).
    pub execute_ignore: bool,
    /// Whether the load has a committed, observable result.
    pub succeeded: bool,
    /// Set by LCAM on a detected memory-ordering violation.
    pub order_fail: bool,
    /// Set when a release search finds this load's block was released.
    pub observed: bool,
    /// Bitmask of STQ slots that were live and older than this load at
    /// dispatch (`st_dep_mask`).
    pub st_dep_mask: u64,
    /// STQ index immediately younger than this load at dispatch.
    pub youngest_stq_idx: usize,
    /// Whether this load's data came from store-to-load forwarding.
    pub forward_std_val: bool,
    /// The STQ index forwarded from, if `forward_std_val`.
    pub forward_stq_idx: Option<usize>,
    /// The writeback value presented on `iresp`/`fresp` once `succeeded`,
    /// sized/sign-extended per `uop.mem_size`/`uop.mem_signed` (`spec.md`
    /// §4.6 `debug_wb_data`).
    pub debug_wb_data: Option<u64>,
    /// Cycles remaining before this slot may fire again (fire-block).
    pub blocked_cycles: u8,
    /// Occupancy flag.
    pub valid: bool,
}

impl Default for LdqEntry {
    fn default() -> Self {
        Self {
            uop: MicroOp::default(),
            addr: None,
            addr_is_virtual: false,
            addr_is_uncacheable: false,
            executed: false,
            execute_ignore: false,
            succeeded: false,
            order_fail: false,
            observed: false,
            st_dep_mask: 0,
            youngest_stq_idx: 0,
            forward_std_val: false,
            forward_stq_idx: None,
            debug_wb_data: None,
            blocked_cycles: 0,
            valid: false,
        }
    }
}

impl LdqEntry {
    /// Whether this slot is currently fire-blocked
    /// (`p1_block_load_mask`/`p2_block_load_mask`).
    #[must_use]
    pub fn blocked(&self) -> bool {
        self.blocked_cycles > 0
    }

    /// Virtual address, if one has been delivered and not yet translated.
    #[must_use]
    pub fn vaddr(&self) -> Option<VirtAddr> {
        (self.addr_is_virtual).then(|| self.addr.map(VirtAddr::new)).flatten()
    }

    /// Physical address, if translated.
    #[must_use]
    pub fn paddr(&self) -> Option<PhysAddr> {
        (!self.addr_is_virtual).then(|| self.addr.map(PhysAddr::new)).flatten()
    }
}

/// Load Queue — fixed-capacity circular buffer of [`LdqEntry`].
pub struct Ldq {
    entries: Vec<LdqEntry>,
    head: usize,
    tail: usize,
    count: usize,
}

impl Ldq {
    /// Creates an empty LDQ with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let mut entries = Vec::with_capacity(capacity);
        entries.resize_with(capacity, LdqEntry::default);
        Self {
            entries,
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    /// Queue capacity (`numLdqEntries`).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Number of valid entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether the LDQ holds no valid entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Whether the LDQ has no free slots (`ldq_full`).
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.count == self.entries.len()
    }

    /// Index of the oldest valid entry.
    #[must_use]
    pub fn head(&self) -> usize {
        self.head
    }

    /// Index the next entry will be allocated at.
    #[must_use]
    pub fn tail(&self) -> usize {
        self.tail
    }

    /// Allocates a slot for a dispatched load (`spec.md` §4.1). Returns
    /// the allocated index, or `None` if the LDQ is full.
    ///
    /// # Panics
    ///
    /// Panics (invariant 2) if the slot at `tail` is somehow still valid —
    /// a bug in caller bookkeeping, not a recoverable condition.
    pub fn allocate(&mut self, uop: MicroOp, st_dep_mask: u64, youngest_stq_idx: usize) -> Option<usize> {
        if self.is_full() {
            return None;
        }
        let idx = self.tail;
        assert!(!self.entries[idx].valid, "ldq slot {idx} double-enqueued");

        self.entries[idx] = LdqEntry {
            uop,
            st_dep_mask,
            youngest_stq_idx,
            valid: true,
            ..LdqEntry::default()
        };

        self.tail = (self.tail + 1) % self.entries.len();
        self.count += 1;
        Some(idx)
    }

    /// Immutable access to a slot.
    #[must_use]
    pub fn get(&self, idx: usize) -> &LdqEntry {
        &self.entries[idx]
    }

    /// Mutable access to a slot.
    pub fn get_mut(&mut self, idx: usize) -> &mut LdqEntry {
        &mut self.entries[idx]
    }

    /// Iterates over every valid slot's index.
    pub fn for_each_valid_idx(&self, mut f: impl FnMut(usize, &LdqEntry)) {
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

    /// Decrements every slot's fire-block countdown; call once per cycle.
    pub fn decay_blocks(&mut self) {
        for e in &mut self.entries {
            if e.blocked_cycles > 0 {
                e.blocked_cycles -= 1;
            }
        }
    }

    /// Marks `idx` fire-blocked for the next two cycles.
    pub fn block_fire(&mut self, idx: usize) {
        self.entries[idx].blocked_cycles = FIRE_BLOCK_CYCLES;
    }

    /// Dequeues the head entry on commit (`spec.md` §4.9). The caller must
    /// have already checked `uses_ldq` on the committing ROB entry.
    ///
    /// # Panics
    ///
    /// Panics if the head is empty, or if the committing load has not
    /// executed/forwarded and succeeded — both are ROB/LSU protocol
    /// violations, not recoverable conditions (spec.md §3 invariant 5, §4.9).
    pub fn commit_head(&mut self) -> LdqEntry {
        assert!(self.count > 0, "ldq commit on empty queue");
        let entry = self.entries[self.head].clone();
        assert!(entry.valid, "ldq commit on invalid head slot");
        assert!(
            entry.succeeded && (entry.executed || entry.forward_std_val),
            "ldq commit before load finished: {entry:?}"
        );

        self.entries[self.head] = LdqEntry::default();
        self.head = (self.head + 1) % self.entries.len();
        self.count -= 1;
        entry
    }

    /// Branch-mispredict squash (`spec.md` §4.9): moves `tail` back to
    /// `new_tail` and invalidates any valid slot whose `br_mask` is killed
    /// by the resolved branch.
    ///
    /// # Panics
    ///
    /// Panics if a committed-equivalent entry were killed; LDQ entries
    /// have no `committed` flag (only STQ does), so this only asserts the
    /// queue stays internally consistent.
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
                    self.entries[idx] = LdqEntry::default();
                } else {
                    new_count += 1;
                }
            }
            idx = (idx + 1) % self.entries.len();
        }
        self.tail = new_tail;
        self.count = new_count;
    }

    /// Exception squash (`spec.md` §4.9): `head = tail = 0`, every slot
    /// invalidated.
    pub fn flush_all(&mut self) {
        for e in &mut self.entries {
            *e = LdqEntry::default();
        }
        self.head = 0;
        self.tail = 0;
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load_uop() -> MicroOp {
        MicroOp {
            uses_ldq: true,
            ..MicroOp::default()
        }
    }

    #[test]
    fn allocate_and_commit_round_trip() {
        let mut ldq = Ldq::new(4);
        let idx = ldq.allocate(load_uop(), 0, 0).unwrap();
        assert_eq!(ldq.len(), 1);

        ldq.get_mut(idx).executed = true;
        ldq.get_mut(idx).succeeded = true;

        let entry = ldq.commit_head();
        assert!(entry.succeeded);
        assert!(ldq.is_empty());
    }

    #[test]
    #[should_panic(expected = "ldq commit before load finished")]
    fn commit_before_finished_panics() {
        let mut ldq = Ldq::new(4);
        let _ = ldq.allocate(load_uop(), 0, 0);
        let _ = ldq.commit_head();
    }

    #[test]
    fn full_queue_rejects_allocation() {
        let mut ldq = Ldq::new(2);
        assert!(ldq.allocate(load_uop(), 0, 0).is_some());
        assert!(ldq.allocate(load_uop(), 0, 0).is_some());
        assert!(ldq.is_full());
        assert!(ldq.allocate(load_uop(), 0, 0).is_none());
    }

    #[test]
    fn branch_kill_invalidates_only_dependent_slots() {
        let mut ldq = Ldq::new(4);
        let mut independent = load_uop();
        independent.br_mask = 0b0010;
        let mut dependent = load_uop();
        dependent.br_mask = 0b0001;

        let i0 = ldq.allocate(independent, 0, 0).unwrap();
        let i1 = ldq.allocate(dependent, 0, 0).unwrap();

        ldq.kill_mispredicted(i1, 0b0001);

        assert!(ldq.get(i0).valid);
        assert!(!ldq.get(i1).valid);
        assert_eq!(ldq.len(), 1);
    }

    #[test]
    fn fire_block_decays_after_two_cycles() {
        let mut ldq = Ldq::new(2);
        let idx = ldq.allocate(load_uop(), 0, 0).unwrap();
        ldq.block_fire(idx);
        assert!(ldq.get(idx).blocked());
        ldq.decay_blocks();
        assert!(ldq.get(idx).blocked());
        ldq.decay_blocks();
        assert!(!ldq.get(idx).blocked());
    }

    #[test]
    fn exception_flush_resets_head_and_tail() {
        let mut ldq = Ldq::new(4);
        let _ = ldq.allocate(load_uop(), 0, 0);
        let _ = ldq.allocate(load_uop(), 0, 0);
        ldq.flush_all();
        assert!(ldq.is_empty());
        assert_eq!(ldq.head(), 0);
        assert_eq!(ldq.tail(), 0);
    }
}
