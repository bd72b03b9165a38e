//! Load-Compare-Address-Match: the associative search engine that enforces
//! memory ordering between speculative loads and older stores, and locates
//! store-to-load forwarding candidates (`spec.md` §4.5).
//!
//! Every search here is a full scan of LDQ (and, for loads, STQ) — no
//! index, no early exit beyond the predicate itself, matching the
//! associative (CAM-like) hardware the component is named after.

use crate::age::youngest_older_store;
use crate::common::{PhysAddr, gen_byte_mask};
use crate::queues::{Ldq, Stq};

/// Result of scanning one fired store or load through LCAM this cycle.
#[derive(Clone, Debug, Default)]
pub struct LcamResult {
    /// LDQ indices LCAM determined have already-observed, already-executed
    /// results that raced ahead of an older store or load — a memory
    /// ordering violation (`spec.md` §4.5, §7).
    pub order_fail_idx: Vec<usize>,
    /// LDQ indices whose in-flight DCache response must be dropped because
    /// ordering was violated before the response landed.
    pub execute_ignore_idx: Vec<usize>,
    /// LDQ indices whose in-flight DCache request must be cancelled
    /// (`s1_kill`) because a younger, not-yet-resolved load with the same
    /// address raced ahead.
    pub kill_inflight_idx: Vec<usize>,
}

/// Marks every valid LDQ entry whose physical cache-block address matches
/// `released_block` as observed (`do_release_search`, `spec.md` §4.5).
pub fn do_release_search(ldq: &mut Ldq, released_block: u64) {
    let cap = ldq.capacity();
    let head = ldq.head();
    let len = ldq.len();
    for step in 0..len {
        let idx = (head + step) % cap;
        let entry = ldq.get(idx);
        if let Some(paddr) = entry.paddr() {
            if paddr.block_addr() == released_block {
                ldq.get_mut(idx).observed = true;
            }
        }
    }
}

/// Scans every LDQ entry that is older than `store_idx` (per its
/// `st_dep_mask`) and overlaps the store's address/bytes, and raises an
/// order-fail or execute-ignore as the ordering rule demands
/// (`do_st_search`, `spec.md` §4.5).
///
/// `stq_capacity`/`stq_head` are needed to compare two stores' relative
/// age when deciding whether an existing forward is now stale.
pub fn do_st_search(ldq: &mut Ldq, stq: &Stq, store_idx: usize, stq_capacity: usize, stq_head: usize) -> LcamResult {
    let mut result = LcamResult::default();
    let store = stq.get(store_idx);
    let Some(saddr) = store.addr else {
        return result;
    };
    if store.addr_is_virtual {
        return result;
    }
    let spaddr = PhysAddr::new(saddr);
    let smask = gen_byte_mask(spaddr, store.uop.mem_size.bytes());

    let cap = ldq.capacity();
    let head = ldq.head();
    let len = ldq.len();
    for step in 0..len {
        let idx = (head + step) % cap;
        let entry = ldq.get(idx).clone();
        if !entry.valid || entry.st_dep_mask & (1u64 << store_idx) == 0 {
            continue;
        }
        let Some(lpaddr) = entry.paddr() else {
            continue;
        };
        if lpaddr.dword_addr() != spaddr.dword_addr() {
            continue;
        }
        let lmask = gen_byte_mask(lpaddr, entry.uop.mem_size.bytes());
        if lmask & smask == 0 {
            continue;
        }

        let stale_forward = !entry.forward_std_val
            || entry
                .forward_stq_idx
                .is_some_and(|f| f != store_idx && crate::age::is_older(stq_capacity, stq_head, f, store_idx));
        if !stale_forward {
            continue;
        }

        if entry.succeeded {
            result.order_fail_idx.push(idx);
            ldq.get_mut(idx).order_fail = true;
        } else {
            result.execute_ignore_idx.push(idx);
            ldq.get_mut(idx).execute_ignore = true;
        }
    }
    result
}

/// Scans every other valid, non-virtual LDQ entry overlapping `searcher`'s
/// address/bytes and enforces load/load ordering (`do_ld_search`,
/// `spec.md` §4.5 "Load ↔ Load ordering").
pub fn do_ld_ordering_search(ldq: &mut Ldq, searcher_idx: usize, ldq_capacity: usize, ldq_head: usize) -> LcamResult {
    let mut result = LcamResult::default();
    let searcher = ldq.get(searcher_idx).clone();
    let Some(spaddr) = searcher.paddr() else {
        return result;
    };
    let smask = gen_byte_mask(spaddr, searcher.uop.mem_size.bytes());

    let cap = ldq.capacity();
    let head = ldq.head();
    let len = ldq.len();
    for step in 0..len {
        let idx = (head + step) % cap;
        if idx == searcher_idx {
            continue;
        }
        let other = ldq.get(idx).clone();
        if !other.valid || other.addr_is_virtual {
            continue;
        }
        let Some(opaddr) = other.paddr() else {
            continue;
        };
        if opaddr.dword_addr() != spaddr.dword_addr() {
            continue;
        }
        let omask = gen_byte_mask(opaddr, other.uop.mem_size.bytes());
        if omask & smask == 0 {
            continue;
        }

        if crate::age::is_older(ldq_capacity, ldq_head, idx, searcher_idx) {
            if other.observed && other.executed {
                if searcher.succeeded {
                    result.order_fail_idx.push(searcher_idx);
                    ldq.get_mut(searcher_idx).order_fail = true;
                } else {
                    result.execute_ignore_idx.push(searcher_idx);
                    ldq.get_mut(searcher_idx).execute_ignore = true;
                }
            }
        } else if !other.executed || other.order_fail {
            result.kill_inflight_idx.push(idx);
            let younger = ldq.get_mut(idx);
            younger.executed = false;
            younger.forward_std_val = false;
        }
    }
    result
}

/// Scans STQ for forwarding candidates to `load_idx`, returning the set of
/// STQ indices whose bytes fully cover the load (`ldst_forward_matches`)
/// and those that merely overlap (`ldst_addr_matches`, which blocks
/// forwarding and kills the DC request) — `do_ld_search`'s forwarding half
/// (`spec.md` §4.5).
#[derive(Clone, Copy, Debug, Default)]
pub struct ForwardMatches {
    /// Bitmask of STQ indices whose write fully covers the load's bytes.
    pub forward_matches: u64,
    /// Bitmask of STQ indices that overlap the load at all (superset of
    /// `forward_matches`).
    pub addr_matches: u64,
}

pub fn do_ld_forward_search(ldq: &Ldq, stq: &Stq, load_idx: usize) -> ForwardMatches {
    let mut out = ForwardMatches::default();
    let load = ldq.get(load_idx);
    let Some(lpaddr) = load.paddr() else {
        return out;
    };
    if load.uop.mem_cmd == crate::common::MemCmd::Fence || load.uop.is_amo {
        return out;
    }
    let lmask = gen_byte_mask(lpaddr, load.uop.mem_size.bytes());

    stq.for_each_valid_idx(|sidx, sentry| {
        if load.st_dep_mask & (1u64 << sidx) == 0 {
            return;
        }
        let Some(saddr) = sentry.addr else {
            return;
        };
        if sentry.addr_is_virtual {
            return;
        }
        let spaddr = PhysAddr::new(saddr);
        if spaddr.dword_addr() != lpaddr.dword_addr() {
            return;
        }
        let smask = gen_byte_mask(spaddr, sentry.uop.mem_size.bytes());
        if smask & lmask == 0 {
            return;
        }
        out.addr_matches |= 1u64 << sidx;
        if sentry.uop.mem_cmd != crate::common::MemCmd::Fence
            && !sentry.uop.is_amo
            && (lmask & !smask) == 0
        {
            out.forward_matches |= 1u64 << sidx;
        }
    });
    out
}

/// Resolves the final forwarding decision for a load: picks the youngest
/// store older than the load from `matches.addr_matches`, and confirms it
/// is also in `matches.forward_matches` (`spec.md` §4.5 "Forwarding
/// selection").
#[must_use]
pub fn resolve_forward(matches: ForwardMatches, st_dep_mask: u64, youngest_stq_idx: usize, stq_capacity: usize) -> Option<usize> {
    let chosen = youngest_older_store(stq_capacity, matches.addr_matches, st_dep_mask, youngest_stq_idx)?;
    (matches.forward_matches & (1u64 << chosen) != 0).then_some(chosen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{MemCmd, MemSize, MicroOp};

    fn load_uop(size: MemSize) -> MicroOp {
        MicroOp {
            uses_ldq: true,
            mem_cmd: MemCmd::Read,
            mem_size: size,
            ..MicroOp::default()
        }
    }

    fn store_uop(size: MemSize) -> MicroOp {
        MicroOp {
            uses_stq: true,
            mem_cmd: MemCmd::Write,
            mem_size: size,
            ..MicroOp::default()
        }
    }

    #[test]
    fn release_search_marks_matching_block() {
        let mut ldq = Ldq::new(4);
        let idx = ldq.allocate(load_uop(MemSize::Word), 0, 0).unwrap();
        ldq.get_mut(idx).addr = Some(0x1000);
        ldq.get_mut(idx).addr_is_virtual = false;

        do_release_search(&mut ldq, 0x1000);
        assert!(ldq.get(idx).observed);
    }

    #[test]
    fn st_search_flags_order_fail_on_succeeded_overlap() {
        let mut ldq = Ldq::new(4);
        let mut stq = Stq::new(4);

        let sidx = stq.allocate(store_uop(MemSize::Word)).unwrap();
        stq.get_mut(sidx).addr = Some(0x2000);

        let lidx = ldq.allocate(load_uop(MemSize::Word), 1u64 << sidx, sidx + 1).unwrap();
        let l = ldq.get_mut(lidx);
        l.addr = Some(0x2000);
        l.addr_is_virtual = false;
        l.succeeded = true;

        let result = do_st_search(&mut ldq, &stq, sidx, 4, 0);
        assert_eq!(result.order_fail_idx, vec![lidx]);
        assert!(ldq.get(lidx).order_fail);
    }

    #[test]
    fn st_search_skips_load_forwarded_from_same_store() {
        let mut ldq = Ldq::new(4);
        let mut stq = Stq::new(4);

        let sidx = stq.allocate(store_uop(MemSize::Word)).unwrap();
        stq.get_mut(sidx).addr = Some(0x3000);

        let lidx = ldq.allocate(load_uop(MemSize::Word), 1u64 << sidx, sidx + 1).unwrap();
        let l = ldq.get_mut(lidx);
        l.addr = Some(0x3000);
        l.addr_is_virtual = false;
        l.succeeded = true;
        l.forward_std_val = true;
        l.forward_stq_idx = Some(sidx);

        let result = do_st_search(&mut ldq, &stq, sidx, 4, 0);
        assert!(result.order_fail_idx.is_empty());
    }

    #[test]
    fn forward_matches_require_full_byte_coverage() {
        let mut ldq = Ldq::new(4);
        let mut stq = Stq::new(4);

        let sidx = stq.allocate(store_uop(MemSize::Byte)).unwrap();
        stq.get_mut(sidx).addr = Some(0x4000);

        let lidx = ldq.allocate(load_uop(MemSize::Word), 1u64 << sidx, sidx + 1).unwrap();
        ldq.get_mut(lidx).addr = Some(0x4000);

        let matches = do_ld_forward_search(&ldq, &stq, lidx);
        assert!(matches.addr_matches & (1u64 << sidx) != 0);
        assert!(matches.forward_matches & (1u64 << sidx) == 0);
    }

    #[test]
    fn resolve_forward_picks_youngest_eligible_store() {
        let matches = ForwardMatches {
            forward_matches: 0b0110,
            addr_matches: 0b0110,
        };
        let chosen = resolve_forward(matches, 0b0110, 4, 8);
        assert_eq!(chosen, Some(2));
    }
}
