//! Micro-op descriptor as seen by the LSU.
//!
//! The front-end (decode/rename/dispatch) is out of scope; this module only
//! models the fields of a dispatched micro-op that the LSU actually reads:
//! which queue(s) it uses, its access width/command, and the bookkeeping
//! (ROB tag, branch mask, register destination/type) needed to route
//! responses and to kill speculative state.

use std::fmt;

/// Unique tag assigned by the ROB to an in-flight instruction.
///
/// The front-end and ROB are external collaborators (`spec.md` §1); this
/// crate only carries the tag around for ordering and response routing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct RobTag(pub u64);

/// Memory command a micro-op asks the LSU to perform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MemCmd {
    /// Ordinary load (also the command MCQ/BDQ entries are forced to while
    /// probing the HBT).
    #[default]
    Read,
    /// Ordinary store, or the bounds-store phase of a BDQ entry.
    Write,
    /// Atomic read-modify-write (AMO).
    Amo,
    /// `SFENCE.VMA`-style TLB fence.
    Sfence,
    /// A memory-ordering fence (`FENCE` / `FENCE.I`).
    Fence,
}

/// Access width of a memory operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MemSize {
    /// 1 byte.
    Byte,
    /// 2 bytes.
    Half,
    /// 4 bytes.
    Word,
    /// 8 bytes.
    Double,
    /// No data transfer (fences, MCQ/BDQ probes use size 0 per spec.md §3).
    #[default]
    Nop,
}

impl MemSize {
    /// Width in bytes, used for `GenByteMask` and overlap checks.
    #[must_use]
    pub fn bytes(self) -> u32 {
        match self {
            MemSize::Byte => 1,
            MemSize::Half => 2,
            MemSize::Word => 4,
            MemSize::Double => 8,
            MemSize::Nop => 0,
        }
    }
}

/// Register file destination class, used to route a load's response onto
/// the integer (`iresp`) or floating-point (`fresp`) writeback channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DstRegType {
    /// Integer destination register (or no destination, e.g. `x0`).
    #[default]
    Integer,
    /// Floating-point destination register.
    FloatingPoint,
}

/// Bounds-descriptor operation class carried by a BDQ entry, used to key
/// the `num_bndstr` / `num_bndclr` / `num_bndsrch` counters at dequeue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BoundsOp {
    /// Store a new bounds descriptor.
    #[default]
    Store,
    /// Clear (invalidate) an existing bounds descriptor.
    Clear,
    /// Search for an existing bounds descriptor without mutating it.
    Search,
}

/// A dispatched micro-op, as far as the LSU needs to know about it.
///
/// Exactly one of `uses_ldq`, `uses_stq` may be set (spec.md §3 invariant
/// 3); `uses_mcq` may additionally be set on any non-fence, non-excepted
/// memory access, and `uses_bdq` is mutually exclusive with all three.
#[derive(Clone, Debug, PartialEq)]
pub struct MicroOp {
    /// ROB tag, used for age comparisons and response routing.
    pub rob_tag: RobTag,
    /// Bitmask of in-flight branches this uop is speculated past; a
    /// misprediction clearing any of these bits kills the uop.
    pub br_mask: u32,
    /// Destination architectural register index (0 if none / fence).
    pub dst_reg: u32,
    /// Destination register file class, for `iresp`/`fresp` routing.
    pub dst_rtype: DstRegType,
    /// Memory command.
    pub mem_cmd: MemCmd,
    /// Access width.
    pub mem_size: MemSize,
    /// Whether a load's result is sign-extended.
    pub mem_signed: bool,
    /// Whether this is an AMO; affects forwarding (AMOs block it) and
    /// store-execute-head advancement.
    pub is_amo: bool,
    /// Whether this uop allocates an LDQ slot.
    pub uses_ldq: bool,
    /// Whether this uop allocates an STQ slot.
    pub uses_stq: bool,
    /// Whether this uop allocates an MCQ slot (bounds check).
    pub uses_mcq: bool,
    /// Whether this uop allocates a BDQ slot (bounds descriptor op).
    pub uses_bdq: bool,
    /// Bounds-descriptor operation class, meaningful only when `uses_bdq`.
    pub bounds_op: BoundsOp,
    /// Whether the front-end already marked this uop excepted at dispatch
    /// (dropped rather than enqueued, per spec.md §4.1).
    pub excepted: bool,
}

impl Default for MicroOp {
    fn default() -> Self {
        Self {
            rob_tag: RobTag::default(),
            br_mask: 0,
            dst_reg: 0,
            dst_rtype: DstRegType::default(),
            mem_cmd: MemCmd::default(),
            mem_size: MemSize::default(),
            mem_signed: false,
            is_amo: false,
            uses_ldq: false,
            uses_stq: false,
            uses_mcq: false,
            uses_bdq: false,
            bounds_op: BoundsOp::default(),
            excepted: false,
        }
    }
}

impl fmt::Display for RobTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rob#{}", self.0)
    }
}

/// Returns `true` if `br_mask` is killed by a resolved branch, i.e. it has
/// any bit set in `resolved_mask` that mispredicted.
///
/// `resolved_mask` has exactly the bit of the resolving branch set;
/// `mispredict` says whether that branch went the wrong way.
#[must_use]
pub fn is_killed_by_branch(br_mask: u32, resolved_mask: u32, mispredict: bool) -> bool {
    mispredict && (br_mask & resolved_mask) != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn killed_only_on_mispredict_and_dependency() {
        assert!(is_killed_by_branch(0b0101, 0b0001, true));
        assert!(!is_killed_by_branch(0b0101, 0b0010, true));
        assert!(!is_killed_by_branch(0b0101, 0b0001, false));
    }

    #[test]
    fn default_uop_uses_no_queue() {
        let uop = MicroOp::default();
        assert!(!uop.uses_ldq && !uop.uses_stq && !uop.uses_mcq && !uop.uses_bdq);
    }
}
