//! External-collaborator interfaces.
//!
//! `spec.md` §1 lists the decode/rename/dispatch front-end, the ROB, the
//! data cache, the DTLB, the AGUs, and the CSR file as out-of-scope
//! external collaborators, specified only at their interface (§6). This
//! module is that interface, expressed as traits so tests can substitute
//! `mockall`-generated doubles for the cache and TLB (`SPEC_FULL.md`
//! §10.4) instead of a real cache/TLB simulator.

use crate::common::{MemCmd, MemSize, PhysAddr, VirtAddr};

/// A translation request driven to the DTLB (`spec.md` §6 "To DTLB").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TlbRequest {
    /// Virtual address to translate.
    pub vaddr: VirtAddr,
    /// Access width, needed for alignment-adjacent permission checks.
    pub size: MemSize,
    /// Command: `Read` for loads/bounds-probes, `Write` for stores.
    pub cmd: MemCmd,
}

/// The DTLB's same-cycle report (`spec.md` §4.3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TlbResponse {
    /// Translated physical address (only meaningful if `!miss`).
    pub paddr: PhysAddr,
    /// Whether the TLB must walk the page table (miss ⇒ retry later).
    pub miss: bool,
    /// Page-table permission violation.
    pub page_fault: bool,
    /// Physical-memory access-fault.
    pub access_fault: bool,
    /// Whether the target physical page is cacheable.
    pub cacheable: bool,
}

impl TlbResponse {
    /// A successful, cacheable translation with no faults.
    #[must_use]
    pub fn hit(paddr: PhysAddr) -> Self {
        Self {
            paddr,
            miss: false,
            page_fault: false,
            access_fault: false,
            cacheable: true,
        }
    }

    /// A miss requiring the caller to retry (`load_retry` / `sta_retry`).
    #[must_use]
    pub fn miss() -> Self {
        Self {
            paddr: PhysAddr(0),
            miss: true,
            page_fault: false,
            access_fault: false,
            cacheable: true,
        }
    }
}

/// The DTLB port: drives `mem_width` translation requests per cycle and
/// the `SFENCE.VMA` flush.
#[cfg_attr(any(test, feature = "test-support"), mockall::automock)]
pub trait DtlbPort {
    /// Translates a virtual address, returning the same-cycle report.
    fn translate(&mut self, req: TlbRequest) -> TlbResponse;

    /// Flushes the TLB (`SFENCE.VMA`).
    fn sfence(&mut self);
}

/// A request issued to the data cache (`spec.md` §6 "To DCache").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DCacheRequest {
    /// Physical address, already translated.
    pub paddr: PhysAddr,
    /// Access width.
    pub size: MemSize,
    /// Command.
    pub cmd: MemCmd,
    /// Store data, present for `Write`/`Amo`.
    pub data: Option<u64>,
    /// Whether this request originates from the hella shim rather than
    /// the pipelined load/store path.
    pub is_hella: bool,
}

/// The data cache's outcome for one request this cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DCacheOutcome {
    /// The request fired and the load's data is available same-cycle
    /// (`req.fire()` in `spec.md` §4.4).
    Fired {
        /// Response payload (irrelevant for stores).
        data: u64,
    },
    /// The request fired but the cache will nack it next cycle (`spec.md`
    /// §4.6): the caller should treat this like `Fired` for port
    /// accounting but must expect a retry.
    Nacked,
    /// Backpressure: the port had no free request slot this cycle.
    Blocked,
}

/// The DCache port: one request per lane, with `s1_kill` to cancel an
/// already-issued request.
#[cfg_attr(any(test, feature = "test-support"), mockall::automock)]
pub trait DCachePort {
    /// Issues a request, returning its same-cycle outcome.
    fn issue(&mut self, req: DCacheRequest) -> DCacheOutcome;

    /// Cancels the in-flight request issued last cycle on this port, if
    /// any (`s1_kill`).
    fn kill_inflight(&mut self);
}
