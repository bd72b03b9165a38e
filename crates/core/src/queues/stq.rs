//! Store Queue (STQ).
//!
//! Holds stores from dispatch through retirement to the data cache. Tracks
//! three head pointers as the spec requires: `head` (oldest live entry),
//! `commit_head` (oldest not-yet-committed entry), and `execute_head`
//! (oldest committed-but-not-yet-drained-to-memory entry).

use crate::common::{MicroOp, is_killed_by_branch};

/// A single STQ slot.
#[derive(Clone, Debug)]
pub struct StqEntry {
    /// The dispatched store (or AMO) micro-op.
    pub uop: MicroOp,
    /// Translated (or still-virtual) address.
    pub addr: Option<u64>,
    /// Whether `addr` still needs DTLB translation.
    pub addr_is_virtual: bool,
    /// Store data, once resolved.
    pub data: Option<u64>,
    /// Whether the ROB has committed this store (§4.9).
    pub committed: bool,
    /// Whether the store has been written to the data cache.
    pub succeeded: bool,
    /// Occupancy flag.
    pub valid: bool,
}

impl Default for StqEntry {
    fn default() -> Self {
        Self {
            uop: MicroOp::default(),
            addr: None,
            addr_is_virtual: false,
            data: None,
            committed: false,
            succeeded: false,
            valid: false,
        }
    }
}

/// Store Queue — fixed-capacity circular buffer of [`StqEntry`] with three
/// walking pointers (`spec.md` §3).
pub struct Stq {
    entries: Vec<StqEntry>,
    head: usize,
    tail: usize,
    commit_head: usize,
    execute_head: usize,
    count: usize,
}

impl Stq {
    /// Creates an empty STQ with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let mut entries = Vec::with_capacity(capacity);
        entries.resize_with(capacity, StqEntry::default);
        Self {
            entries,
            head: 0,
            tail: 0,
            commit_head: 0,
            execute_head: 0,
            count: 0,
        }
    }

    /// Queue capacity (`numStqEntries`).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Number of valid entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether the STQ holds no valid entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Whether the STQ has no free slots (`stq_full`).
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.count == self.entries.len()
    }

    /// Index of the oldest live entry.
    #[must_use]
    pub fn head(&self) -> usize {
        self.head
    }

    /// Index the next entry will be allocated at.
    #[must_use]
    pub fn tail(&self) -> usize {
        self.tail
    }

    /// Index of the oldest not-yet-committed entry.
    #[must_use]
    pub fn commit_head(&self) -> usize {
        self.commit_head
    }

    /// Index of the oldest committed-but-undrained entry.
    #[must_use]
    pub fn execute_head(&self) -> usize {
        self.execute_head
    }

    /// Allocates a slot for a dispatched store (`spec.md` §4.1). Returns
    /// the allocated index, or `None` if the STQ is full.
    ///
    /// # Panics
    ///
    /// Panics (invariant 2) if the slot at `tail` is still valid.
    pub fn allocate(&mut self, uop: MicroOp) -> Option<usize> {
        if self.is_full() {
            return None;
        }
        let idx = self.tail;
        assert!(!self.entries[idx].valid, "stq slot {idx} double-enqueued");

        self.entries[idx] = StqEntry {
            uop,
            valid: true,
            ..StqEntry::default()
        };

        self.tail = (self.tail + 1) % self.entries.len();
        self.count += 1;
        Some(idx)
    }

    /// Immutable access to a slot.
    #[must_use]
    pub fn get(&self, idx: usize) -> &StqEntry {
        &self.entries[idx]
    }

    /// Mutable access to a slot.
    pub fn get_mut(&mut self, idx: usize) -> &mut StqEntry {
        &mut self.entries[idx]
    }

    /// Iterates every valid slot's index, oldest first.
    pub fn for_each_valid_idx(&self, mut f: impl FnMut(usize, &StqEntry)) {
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

    /// Marks slot `idx` committed and advances `commit_head` through any
    /// now-committed run (`spec.md` §4.9).
    pub fn mark_committed(&mut self, idx: usize) {
        self.entries[idx].committed = true;
        while self.commit_head != self.tail && self.entries[self.commit_head].committed {
            self.commit_head = (self.commit_head + 1) % self.entries.len();
        }
    }

    /// Advances `execute_head` past slot `idx` once the DCache has
    /// accepted its drain request (`spec.md` §4.4).
    pub fn advance_execute_head(&mut self) {
        if self.execute_head != self.tail {
            self.execute_head = (self.execute_head + 1) % self.entries.len();
        }
    }

    /// Rewinds `execute_head` to `idx` on a store nack, if `idx` is older
    /// than the current `execute_head` (`spec.md` §4.6).
    pub fn rewind_execute_head(&mut self, idx: usize) {
        if self.age_from_head(idx) < self.age_from_head(self.execute_head) {
            self.execute_head = idx;
        }
    }

    /// Distance of `idx` from `head`, used to compare two indices' ages
    /// within the live window without signed wraparound arithmetic.
    fn age_from_head(&self, idx: usize) -> usize {
        let cap = self.entries.len();
        (idx + cap - self.head) % cap
    }

    /// Dequeues the head entry once it has succeeded (ordinary store) or a
    /// fence has been externally marked ordered (`spec.md` §4.9).
    ///
    /// # Panics
    ///
    /// Panics if the STQ is empty, or if the head is not actually
    /// committed — dequeuing an uncommitted store would violate invariant
    /// 8 (a committed store is the only kind ever dequeued this way).
    pub fn dequeue_head(&mut self) -> StqEntry {
        assert!(self.count > 0, "stq dequeue on empty queue");
        let entry = self.entries[self.head].clone();
        assert!(entry.committed, "stq dequeue of uncommitted store");

        self.entries[self.head] = StqEntry::default();
        self.head = (self.head + 1) % self.entries.len();
        self.count -= 1;
        if self.execute_head == (self.head + self.entries.len() - 1) % self.entries.len() {
            self.execute_head = self.head;
        }
        entry
    }

    /// Branch-mispredict squash (`spec.md` §4.9). Invalidates any valid,
    /// non-committed slot whose `br_mask` is killed by the resolved
    /// branch, and moves `tail` back to `new_tail`.
    ///
    /// # Panics
    ///
    /// Panics if a *committed* entry would be killed — invariant 8 forbids
    /// this and a violation indicates the caller computed `new_tail`
    /// incorrectly (e.g. rolled back past a point of no return).
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
                    assert!(
                        !self.entries[idx].committed,
                        "branch kill tried to squash committed stq slot {idx}"
                    );
                    self.entries[idx] = StqEntry::default();
                } else {
                    new_count += 1;
                }
            }
            idx = (idx + 1) % self.entries.len();
        }
        self.tail = new_tail;
        self.count = new_count;
        if self.age_from_head(self.commit_head) > self.age_from_head(self.tail) {
            self.commit_head = self.tail;
        }
        if self.age_from_head(self.execute_head) > self.age_from_head(self.tail) {
            self.execute_head = self.tail;
        }
    }

    /// Exception squash (`spec.md` §4.9): `tail = commit_head`, and any
    /// non-committed, non-succeeded store is invalidated.
    pub fn exception_flush(&mut self) {
        self.tail = self.commit_head;
        let mut idx = self.head;
        let mut new_count = 0;
        loop {
            if idx == self.tail {
                break;
            }
            if self.entries[idx].valid
                && !self.entries[idx].committed
                && !self.entries[idx].succeeded
            {
                self.entries[idx] = StqEntry::default();
            } else if self.entries[idx].valid {
                new_count += 1;
            }
            idx = (idx + 1) % self.entries.len();
        }
        self.count = new_count;
        if self.age_from_head(self.execute_head) > self.age_from_head(self.tail) {
            self.execute_head = self.tail;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_uop() -> MicroOp {
        MicroOp {
            uses_stq: true,
            ..MicroOp::default()
        }
    }

    #[test]
    fn allocate_commit_and_dequeue() {
        let mut stq = Stq::new(4);
        let idx = stq.allocate(store_uop()).unwrap();
        stq.mark_committed(idx);
        assert_eq!(stq.commit_head(), (idx + 1) % 4);

        stq.get_mut(idx).succeeded = true;
        let entry = stq.dequeue_head();
        assert!(entry.committed && entry.succeeded);
        assert!(stq.is_empty());
    }

    #[test]
    #[should_panic(expected = "stq dequeue of uncommitted store")]
    fn dequeue_uncommitted_panics() {
        let mut stq = Stq::new(4);
        let _ = stq.allocate(store_uop());
        let _ = stq.dequeue_head();
    }

    #[test]
    fn commit_head_advances_through_consecutive_commits() {
        let mut stq = Stq::new(4);
        let i0 = stq.allocate(store_uop()).unwrap();
        let i1 = stq.allocate(store_uop()).unwrap();
        let _i2 = stq.allocate(store_uop()).unwrap();

        stq.mark_committed(i1);
        assert_eq!(stq.commit_head(), i0);

        stq.mark_committed(i0);
        assert_eq!(stq.commit_head(), (i1 + 1) % 4);
    }

    #[test]
    fn committed_store_survives_branch_kill() {
        let mut stq = Stq::new(4);
        let mut uop = store_uop();
        uop.br_mask = 0b0001;
        let idx = stq.allocate(uop).unwrap();
        stq.mark_committed(idx);

        // A kill that doesn't touch committed entries is fine.
        stq.kill_mispredicted(idx, 0b0010);
        assert!(stq.get(idx).valid);
    }

    #[test]
    #[should_panic(expected = "branch kill tried to squash committed stq slot")]
    fn branch_kill_of_committed_slot_panics() {
        let mut stq = Stq::new(4);
        let mut uop = store_uop();
        uop.br_mask = 0b0001;
        let idx = stq.allocate(uop).unwrap();
        stq.mark_committed(idx);
        stq.kill_mispredicted(idx, 0b0001);
    }

    #[test]
    fn rewind_execute_head_only_moves_backward() {
        let mut stq = Stq::new(4);
        let i0 = stq.allocate(store_uop()).unwrap();
        let _i1 = stq.allocate(store_uop()).unwrap();
        stq.advance_execute_head();
        assert_ne!(stq.execute_head(), i0);
        stq.rewind_execute_head(i0);
        assert_eq!(stq.execute_head(), i0);
    }
}
