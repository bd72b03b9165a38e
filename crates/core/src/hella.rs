//! The "hella" shim: a six-state sequencer servicing one non-pipelined
//! scalar memory request at a time, used for scalar debug/DMA traffic
//! (`spec.md` §4.10, glossary).
//!
//! Must not starve pipelined traffic beyond the one lane `hella_incoming`/
//! `hella_wakeup` are scheduled on (§4.2, §9): this type only models the
//! sequencer's own state and issues its requests through the same
//! [`DCachePort`]/[`DtlbPort`] the pipelined path uses, on whichever lane
//! the caller passes it.

use crate::common::{MemCmd, MemSize, PhysAddr, VirtAddr};
use crate::ports::{DCacheOutcome, DCacheRequest, DCachePort, DtlbPort, TlbRequest};
use tracing::warn;

/// The six states from `spec.md` §4.10.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum HellaState {
    /// Accepts a new request.
    #[default]
    Ready,
    /// Runs TLB translation and, if ready, fires the DCache request.
    S1,
    /// Checks exceptions latched from `S1`.
    S2,
    /// Reports a nack from `S2`.
    S2Nack,
    /// Awaits the (already-available, in this synchronous model) response.
    Wait,
    /// Re-fires the DCache request after a nack or backpressure.
    Replay,
    /// Swallows a stray late response before returning to `Ready`.
    Dead,
}

/// A scalar request accepted by the shim.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HellaRequest {
    pub vaddr: VirtAddr,
    pub size: MemSize,
    pub cmd: MemCmd,
    pub signed: bool,
    pub data: Option<u64>,
}

/// The shim's resolved outcome for one cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HellaOutcome {
    /// Whether `req.ready` should assert this cycle (shim is `Ready` with
    /// no request in flight).
    pub ready: bool,
    /// `s2_nack`: a nack was reported this cycle.
    pub s2_nack: bool,
    /// `s2_xcpt`: a translation exception was reported this cycle.
    pub s2_xcpt: bool,
    /// The final response payload, once available.
    pub response: Option<u64>,
}

/// The hella request sequencer.
#[derive(Clone, Debug, Default)]
pub struct HellaShim {
    state: HellaState,
    saved_req: Option<HellaRequest>,
    saved_paddr: Option<PhysAddr>,
    faulted: bool,
}

impl HellaShim {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> HellaState {
        self.state
    }

    /// Advances the shim by one cycle. `incoming` is only consulted while
    /// `Ready`; `tlb`/`dc` are the shared ports, issued on whichever lane
    /// the arbiter awarded the shim this cycle.
    pub fn tick(&mut self, incoming: Option<HellaRequest>, tlb: &mut dyn DtlbPort, dc: &mut dyn DCachePort) -> HellaOutcome {
        let mut out = HellaOutcome::default();

        match self.state {
            HellaState::Ready => {
                out.ready = true;
                if let Some(req) = incoming {
                    self.saved_req = Some(req);
                    self.state = HellaState::S1;
                }
            }
            HellaState::S1 => {
                let req = self.saved_req.expect("hella S1 with no saved request");
                let resp = tlb.translate(TlbRequest { vaddr: req.vaddr, size: req.size, cmd: req.cmd });
                if resp.miss {
                    // Stay in S1; the DTLB is expected to resolve the miss
                    // out-of-band and re-present a hit on a later cycle.
                    return out;
                }
                self.faulted = resp.page_fault || resp.access_fault;
                self.saved_paddr = Some(resp.paddr);
                if self.faulted {
                    self.state = HellaState::S2;
                } else {
                    self.issue_dc(dc, &mut out);
                }
            }
            HellaState::S2 => {
                out.s2_xcpt = true;
                self.reset();
            }
            HellaState::S2Nack => {
                out.s2_nack = true;
                self.state = HellaState::Replay;
            }
            HellaState::Wait => {
                // Response became available the same cycle DC fired
                // (synchronous port model); nothing further to await.
                self.state = HellaState::Dead;
            }
            HellaState::Replay => {
                self.issue_dc(dc, &mut out);
            }
            HellaState::Dead => {
                warn!("hella request dropped into h_dead, swallowing stray response");
                self.reset();
            }
        }

        out
    }

    fn issue_dc(&mut self, dc: &mut dyn DCachePort, out: &mut HellaOutcome) {
        let req = self.saved_req.expect("hella dc issue with no saved request");
        let paddr = self.saved_paddr.expect("hella dc issue before translation");
        let outcome = dc.issue(DCacheRequest {
            paddr,
            size: req.size,
            cmd: req.cmd,
            data: req.data,
            is_hella: true,
        });
        match outcome {
            DCacheOutcome::Fired { data } => {
                out.response = Some(data);
                self.state = HellaState::Wait;
            }
            DCacheOutcome::Nacked => {
                self.state = HellaState::S2Nack;
            }
            DCacheOutcome::Blocked => {
                self.state = HellaState::Replay;
            }
        }
    }

    fn reset(&mut self) {
        self.saved_req = None;
        self.saved_paddr = None;
        self.faulted = false;
        self.state = HellaState::Ready;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{MockDCachePort, MockDtlbPort, TlbResponse};

    fn req() -> HellaRequest {
        HellaRequest {
            vaddr: VirtAddr::new(0x1000),
            size: MemSize::Word,
            cmd: MemCmd::Read,
            signed: false,
            data: None,
        }
    }

    #[test]
    fn ready_with_no_request_asserts_ready() {
        let mut shim = HellaShim::new();
        let mut tlb = MockDtlbPort::new();
        let mut dc = MockDCachePort::new();
        let out = shim.tick(None, &mut tlb, &mut dc);
        assert!(out.ready);
        assert_eq!(shim.state(), HellaState::Ready);
    }

    #[test]
    fn full_round_trip_fire_path() {
        let mut shim = HellaShim::new();
        let mut tlb = MockDtlbPort::new();
        let mut dc = MockDCachePort::new();

        let _ = shim.tick(Some(req()), &mut tlb, &mut dc);
        assert_eq!(shim.state(), HellaState::S1);

        let _ = tlb.expect_translate().return_once(|_| TlbResponse::hit(PhysAddr::new(0x1000)));
        let _ = dc.expect_issue().return_once(|_| DCacheOutcome::Fired { data: 0xABCD });
        let out = shim.tick(None, &mut tlb, &mut dc);
        assert_eq!(out.response, Some(0xABCD));
        assert_eq!(shim.state(), HellaState::Wait);

        let mut tlb2 = MockDtlbPort::new();
        let mut dc2 = MockDCachePort::new();
        let _ = shim.tick(None, &mut tlb2, &mut dc2);
        assert_eq!(shim.state(), HellaState::Dead);

        let mut tlb3 = MockDtlbPort::new();
        let mut dc3 = MockDCachePort::new();
        let out3 = shim.tick(None, &mut tlb3, &mut dc3);
        assert_eq!(shim.state(), HellaState::Ready);
        assert!(out3.ready);
    }

    #[test]
    fn nack_replays() {
        let mut shim = HellaShim::new();
        let mut tlb = MockDtlbPort::new();
        let mut dc = MockDCachePort::new();
        let _ = shim.tick(Some(req()), &mut tlb, &mut dc);

        let _ = tlb.expect_translate().return_once(|_| TlbResponse::hit(PhysAddr::new(0x1000)));
        let _ = dc.expect_issue().return_once(|_| DCacheOutcome::Nacked);
        let _ = shim.tick(None, &mut tlb, &mut dc);
        assert_eq!(shim.state(), HellaState::S2Nack);

        let mut tlb2 = MockDtlbPort::new();
        let mut dc2 = MockDCachePort::new();
        let out = shim.tick(None, &mut tlb2, &mut dc2);
        assert!(out.s2_nack);
        assert_eq!(shim.state(), HellaState::Replay);
    }
}
