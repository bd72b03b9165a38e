//! LSU fault kinds and the oldest-wins exception mux's candidate type.
//!
//! `spec.md` §7 describes error *kinds*, not Rust types: address
//! misalignment, page faults, access faults, a memory-ordering violation,
//! and the two bounds co-engine terminal failures. This mirrors the
//! reference simulator's `Trap` enum, one variant per kind, but derives
//! `thiserror::Error` instead of hand-rolling `Display`.

use thiserror::Error;

use super::addr::VirtAddr;
use super::uop::RobTag;

/// A fault raised by some LSU component, destined for the ROB's `lxcpt`
/// if it is the oldest such fault this cycle (`spec.md` §7, §4.3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum LsuFault {
    /// Load address not aligned to its access width.
    #[error("load address misaligned: {0:#x}")]
    LoadAddressMisaligned(u64),
    /// Load violated page-table permissions.
    #[error("load page fault: {0:#x}")]
    LoadPageFault(u64),
    /// Load hit a physical-memory access fault.
    #[error("load access fault: {0:#x}")]
    LoadAccessFault(u64),
    /// Store address not aligned to its access width.
    #[error("store address misaligned: {0:#x}")]
    StoreAddressMisaligned(u64),
    /// Store violated page-table permissions.
    #[error("store page fault: {0:#x}")]
    StorePageFault(u64),
    /// Store hit a physical-memory access fault.
    #[error("store access fault: {0:#x}")]
    StoreAccessFault(u64),
    /// LCAM detected a load that observed memory before an older store to
    /// the same bytes became visible (`MINI_EXCEPTION_MEM_ORDERING`).
    #[error("memory-ordering violation on ldq slot {0}")]
    MemOrderingViolation(usize),
    /// MCQ exhausted all `hbt_num_way` probes without a matching bounds
    /// descriptor.
    #[error("bounds check failed on mcq slot {0}")]
    BoundsCheckFailed(usize),
    /// BDQ exhausted all `hbt_num_way` probes without finding a free (or
    /// matching) bounds-table slot.
    #[error("occupancy check failed on bdq slot {0}")]
    OccupancyCheckFailed(usize),
}

impl LsuFault {
    /// Builds a load-side fault from a virtual address, given the TLB's
    /// report (`page_fault` xor `access_fault`, or a raw misalignment).
    #[must_use]
    pub fn load_fault(addr: VirtAddr, page_fault: bool, access_fault: bool) -> Option<Self> {
        if page_fault {
            Some(Self::LoadPageFault(addr.val()))
        } else if access_fault {
            Some(Self::LoadAccessFault(addr.val()))
        } else {
            None
        }
    }

    /// Builds a store-side fault from a virtual address, given the TLB's
    /// report.
    #[must_use]
    pub fn store_fault(addr: VirtAddr, page_fault: bool, access_fault: bool) -> Option<Self> {
        if page_fault {
            Some(Self::StorePageFault(addr.val()))
        } else if access_fault {
            Some(Self::StoreAccessFault(addr.val()))
        } else {
            None
        }
    }
}

/// A fault candidate tagged with the ROB age needed to pick the oldest
/// offender when several components fault in the same cycle
/// (`spec.md` §7: "surface to the ROB ... with the oldest offender
/// selected by ROB-relative age").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FaultCandidate {
    /// The fault itself.
    pub fault: LsuFault,
    /// ROB tag of the faulting instruction, used for age comparison.
    pub rob_tag: RobTag,
    /// Whether the faulting uop was killed by a branch resolved this same
    /// cycle; killed uops' exceptions are suppressed (`spec.md` §7).
    pub killed_by_branch: bool,
}
