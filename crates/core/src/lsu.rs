//! The top-level `Lsu`: wires the four queues, the bounds co-engine, LCAM,
//! the fire arbiter's supporting primitives, and commit/kill into one
//! cycle-stepped unit.
//!
//! Mirrors the "sample inputs, compute next-state, swap" discipline
//! `spec.md` §9 calls for: callers push dispatch and AGU-delivered
//! addresses onto the queues between ticks, then [`Lsu::tick`] advances
//! translation, firing, the bounds co-engine, and commit/kill by exactly
//! one cycle, reading and writing `&mut dyn` ports for the data cache and
//! DTLB the way the reference simulator reads and writes `Cpu` fields.

use crate::age;
use crate::arbiter::{self, FireKind, FireRequest};
use crate::commit::{self, BranchInfo, CommitSlot};
use crate::common::{
    BoundsOp, FaultCandidate, LsuFault, MemCmd, MemSize, MicroOp, PhysAddr, VirtAddr,
};
use crate::config::LsuConfig;
use crate::hbt::{self, BoundsDescriptor};
use crate::hella::{HellaOutcome, HellaRequest, HellaShim};
use crate::lcam;
use crate::ports::{DCacheOutcome, DCacheRequest, DCachePort, DtlbPort, TlbRequest};
use crate::queues::{Bdq, Ldq, Mcq, Stq};
use crate::stats::LsuStats;
use tracing::{debug, info, trace, warn};

/// Allocation result for one dispatched micro-op (`spec.md` §4.1).
#[derive(Clone, Copy, Debug, Default)]
pub struct DispatchSlot {
    pub ldq_idx: Option<usize>,
    pub stq_idx: Option<usize>,
    pub mcq_idx: Option<usize>,
    pub bdq_idx: Option<usize>,
    pub ldq_full: bool,
    pub stq_full: bool,
    pub mcq_full: bool,
    pub bdq_full: bool,
}

/// Everything `Lsu::tick` needs beyond the queues' own state: the commit
/// stream, branch resolution, exception signal, and an optional hella
/// request and cache release (`spec.md` §6).
#[derive(Clone, Debug, Default)]
pub struct CycleInputs {
    pub commit_slots: Vec<CommitSlot>,
    pub branch: Option<BranchInfo>,
    pub exception: bool,
    pub release_block_addr: Option<u64>,
    pub hella_request: Option<HellaRequest>,
}

/// Everything observable about one cycle's advance.
#[derive(Clone, Debug, Default)]
pub struct CycleOutputs {
    /// Fault candidates raised this cycle, pre-mux.
    pub faults: Vec<FaultCandidate>,
    /// The oldest-wins exception mux's verdict (`spec.md` §7).
    pub exception: Option<LsuFault>,
    /// The hella shim's outcome this cycle.
    pub hella: HellaOutcome,
    /// The load that became observable this cycle (forwarded or cache-read),
    /// with its `iresp`/`fresp` payload (`spec.md` §4.6 `debug_wb_data`).
    pub load_writeback: Option<LoadWriteback>,
}

/// One load's writeback value, surfaced the cycle it becomes observable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadWriteback {
    pub ldq_idx: usize,
    pub data: u64,
}

/// A pluggable bounds-match predicate (`spec.md` §9 open question 1):
/// given the probed descriptor and the pointer being checked, decides
/// whether the descriptor authenticates that pointer.
pub type BoundsCheckFn = Box<dyn FnMut(BoundsDescriptor, u64) -> bool>;

/// A pluggable way-occupancy predicate for BDQ stores: given the probed
/// descriptor at the current way, decides whether that way is free to
/// write.
pub type OccupancyCheckFn = Box<dyn FnMut(BoundsDescriptor) -> bool>;

/// Out-of-order Load/Store Unit with an integrated pointer-bounds co-engine.
pub struct Lsu {
    config: LsuConfig,
    ldq: Ldq,
    stq: Stq,
    mcq: Mcq,
    bdq: Bdq,
    stats: LsuStats,
    hella: HellaShim,
    bnd_check: BoundsCheckFn,
    occ_check: OccupancyCheckFn,
}

impl Lsu {
    /// Builds a fresh LSU, sized per `config`, with the reference
    /// single-probe bounds/occupancy predicates (`spec.md` §9: "the
    /// reference hardware treats them as `true`").
    #[must_use]
    pub fn new(config: LsuConfig) -> Self {
        Self {
            ldq: Ldq::new(config.num_ldq_entries),
            stq: Stq::new(config.num_stq_entries),
            mcq: Mcq::new(config.num_mcq_entries),
            bdq: Bdq::new(config.num_bdq_entries),
            stats: LsuStats::new(),
            hella: HellaShim::new(),
            bnd_check: Box::new(|_, _| true),
            occ_check: Box::new(|_| true),
            config,
        }
    }

    /// Installs a custom bounds-match predicate, overriding the default
    /// single-probe pass.
    pub fn with_bounds_check(mut self, f: impl FnMut(BoundsDescriptor, u64) -> bool + 'static) -> Self {
        self.bnd_check = Box::new(f);
        self
    }

    /// Installs a custom way-occupancy predicate, overriding the default
    /// single-probe pass.
    pub fn with_occupancy_check(mut self, f: impl FnMut(BoundsDescriptor) -> bool + 'static) -> Self {
        self.occ_check = Box::new(f);
        self
    }

    #[must_use]
    pub fn config(&self) -> &LsuConfig {
        &self.config
    }

    #[must_use]
    pub fn stats(&self) -> &LsuStats {
        &self.stats
    }

    #[must_use]
    pub fn ldq(&self) -> &Ldq {
        &self.ldq
    }

    #[must_use]
    pub fn stq(&self) -> &Stq {
        &self.stq
    }

    #[must_use]
    pub fn mcq(&self) -> &Mcq {
        &self.mcq
    }

    #[must_use]
    pub fn bdq(&self) -> &Bdq {
        &self.bdq
    }

    /// Live-store mask: one bit per currently-valid STQ slot (`spec.md`
    /// §3's `live_store_mask`, recomputed rather than walked incrementally
    /// since STQ occupancy already tracks exactly this set).
    #[must_use]
    fn live_store_mask(&self) -> u64 {
        let mut mask = 0u64;
        self.stq.for_each_valid_idx(|idx, _| mask |= 1u64 << idx);
        mask
    }

    /// Dispatch phase (`spec.md` §4.1): allocates LDQ/STQ/MCQ/BDQ slots for
    /// one wave of up to `core_width` micro-ops, left to right.
    ///
    /// # Panics
    ///
    /// Panics if a micro-op sets more than one of `uses_ldq`/`uses_stq`
    /// (invariant 3 — a front-end bug, not a recoverable condition).
    pub fn dispatch(&mut self, uops: &[MicroOp]) -> Vec<DispatchSlot> {
        let mut live_mask = self.live_store_mask();
        let mut slots = Vec::with_capacity(uops.len());

        for uop in uops {
            assert!(
                !(uop.uses_ldq && uop.uses_stq),
                "micro-op sets both uses_ldq and uses_stq"
            );
            let mut slot = DispatchSlot::default();
            if uop.excepted {
                slots.push(slot);
                continue;
            }

            if uop.uses_ldq {
                let youngest_stq_idx = self.stq.tail();
                match self.ldq.allocate(uop.clone(), live_mask, youngest_stq_idx) {
                    Some(idx) => {
                        debug!(idx, rob_tag = uop.rob_tag.0, "ldq allocate");
                        slot.ldq_idx = Some(idx);
                    }
                    None => {
                        warn!(rob_tag = uop.rob_tag.0, "ldq full, dispatch stalled");
                        slot.ldq_full = true;
                    }
                }
            }
            if uop.uses_stq {
                match self.stq.allocate(uop.clone()) {
                    Some(idx) => {
                        debug!(idx, rob_tag = uop.rob_tag.0, "stq allocate");
                        live_mask |= 1u64 << idx;
                        slot.stq_idx = Some(idx);
                    }
                    None => {
                        warn!(rob_tag = uop.rob_tag.0, "stq full, dispatch stalled");
                        slot.stq_full = true;
                    }
                }
            }
            let is_fence = matches!(uop.mem_cmd, MemCmd::Fence | MemCmd::Sfence);
            if self.config.enable_wyfy && !is_fence && (uop.uses_ldq || uop.uses_stq) {
                match self.mcq.allocate(uop.clone(), uop.mem_signed) {
                    Some(idx) => {
                        debug!(idx, rob_tag = uop.rob_tag.0, "mcq allocate");
                        slot.mcq_idx = Some(idx);
                    }
                    None => {
                        warn!(rob_tag = uop.rob_tag.0, "mcq full, dispatch stalled");
                        slot.mcq_full = true;
                    }
                }
            }
            if self.config.enable_wyfy && uop.uses_bdq {
                match self.bdq.allocate(uop.clone()) {
                    Some(idx) => {
                        debug!(idx, rob_tag = uop.rob_tag.0, "bdq allocate");
                        slot.bdq_idx = Some(idx);
                    }
                    None => {
                        warn!(rob_tag = uop.rob_tag.0, "bdq full, dispatch stalled");
                        slot.bdq_full = true;
                    }
                }
            }
            slots.push(slot);
        }
        slots
    }

    /// AGU delivery of a load's effective address (`spec.md` §4.7
    /// "`init→bndChk` on AGU delivery" applies to the linked MCQ slot too).
    pub fn deliver_load_address(&mut self, ldq_idx: usize, mcq_idx: Option<usize>, vaddr: VirtAddr) {
        let e = self.ldq.get_mut(ldq_idx);
        e.addr = Some(vaddr.strip_pac().val());
        e.addr_is_virtual = true;
        if let Some(idx) = mcq_idx {
            let m = self.mcq.get_mut(idx);
            m.addr = Some(vaddr.val());
            m.state = crate::queues::McqState::BndChk;
        }
    }

    /// AGU delivery of a store's effective address.
    pub fn deliver_store_address(&mut self, stq_idx: usize, mcq_idx: Option<usize>, vaddr: VirtAddr) {
        let e = self.stq.get_mut(stq_idx);
        e.addr = Some(vaddr.strip_pac().val());
        e.addr_is_virtual = true;
        if let Some(idx) = mcq_idx {
            let m = self.mcq.get_mut(idx);
            m.addr = Some(vaddr.val());
            m.state = crate::queues::McqState::BndChk;
        }
    }

    /// Delivery of a store's data operand, independent of its address
    /// (`STD`, which may arrive on a different cycle/lane than `STA`).
    pub fn deliver_store_data(&mut self, stq_idx: usize, data: u64) {
        self.stq.get_mut(stq_idx).data = Some(data);
    }

    /// AGU delivery of a bounds-descriptor op's pointer and payload.
    pub fn deliver_bdq_address(&mut self, bdq_idx: usize, vaddr: VirtAddr, descriptor: BoundsDescriptor) {
        let e = self.bdq.get_mut(bdq_idx);
        e.addr = Some(vaddr.val());
        e.descriptor = descriptor;
        e.state = crate::queues::BdqState::OccChk;
    }

    /// Records a cache-line release, marking every LDQ entry covering that
    /// block as observed (`do_release_search`, `spec.md` §4.5).
    pub fn on_release(&mut self, block_addr: u64) {
        lcam::do_release_search(&mut self.ldq, block_addr & !0x3f);
    }

    /// Advances the LSU by one cycle: translation, firing, the bounds
    /// co-engine, commit, and kill, in that order (`spec.md` §4.2-§4.9).
    pub fn tick(&mut self, tlb: &mut dyn DtlbPort, dc: &mut dyn DCachePort, inputs: CycleInputs) -> CycleOutputs {
        self.stats.tick();
        self.ldq.decay_blocks();

        let mut faults = Vec::new();

        if let Some(block) = inputs.release_block_addr {
            self.on_release(block);
        }

        faults.extend(self.run_store_translate(tlb));

        let grants = arbiter::arbitrate(self.config.mem_width.max(1), &self.fire_requests());
        let granted = |kind: FireKind| grants.iter().any(|g| g.kind == kind);

        let mut load_writeback = None;
        if let Some(kind) = self.pending_load_kind() {
            if granted(kind) {
                let (load_faults, wb) = self.run_load_translate_and_fire(tlb, dc);
                faults.extend(load_faults);
                load_writeback = wb;
            }
        }
        if granted(FireKind::StoreCommit) {
            self.run_store_commit(dc);
        }
        // Both MCQ probes and BDQ occupancy checks read the same HBT port
        // (`FireKind::BndLoad`), so at most one of them fires per cycle;
        // `fire_requests` prefers the MCQ probe when both are pending.
        if granted(FireKind::BndLoad) {
            if self.mcq.find_probe_candidate().is_some() {
                self.run_bounds_probe(dc);
            } else {
                self.run_bounds_occ_check(dc);
            }
        }
        if granted(FireKind::BndStore) {
            self.run_bounds_store(dc);
        }

        let hella = self.hella.tick(inputs.hella_request, tlb, dc);

        commit::commit_cycle(&mut self.ldq, &mut self.stq, &mut self.mcq, &mut self.bdq, &inputs.commit_slots, &mut self.stats);

        if let Some(branch) = inputs.branch {
            if branch.valid && branch.mispredict {
                debug!(new_ldq_tail = branch.new_ldq_tail, new_stq_tail = branch.new_stq_tail, "branch kill");
            }
            commit::branch_kill(&mut self.ldq, &mut self.stq, &mut self.mcq, &mut self.bdq, &branch);
            for f in &mut faults {
                if crate::common::is_killed_by_branch(self.rob_tag_br_mask(f.rob_tag), branch.resolved_mask, branch.mispredict) {
                    f.killed_by_branch = true;
                }
            }
        }
        if inputs.exception {
            debug!("exception flush");
            commit::exception_flush(&mut self.ldq, &mut self.stq, &mut self.mcq, &mut self.bdq);
        }

        let exception = crate::exception::select_oldest_fault(&faults);
        if let Some(fault) = &exception {
            info!(?fault, "oldest fault surfaced to rob");
        }

        CycleOutputs { faults, exception, hella, load_writeback }
    }

    /// Best-effort `br_mask` lookup for a fault's originating ROB tag, used
    /// only to decide whether a same-cycle branch kill suppresses it.
    /// Returns 0 (never killed) if the originating slot already drained.
    fn rob_tag_br_mask(&self, rob_tag: crate::common::RobTag) -> u32 {
        let mut found = 0;
        self.ldq.for_each_valid_idx(|_, e| {
            if e.uop.rob_tag == rob_tag {
                found = e.uop.br_mask;
            }
        });
        found
    }

    /// Which load-side `FireKind` has a ready candidate this cycle, without
    /// mutating any state — mirrors the guard conditions in
    /// `run_load_translate_and_fire`/`run_load_wakeup`.
    fn pending_load_kind(&self) -> Option<FireKind> {
        let translate_ready = age::oldest_satisfying(self.ldq.capacity(), self.ldq.head(), |i| {
            let e = self.ldq.get(i);
            e.valid && e.addr_is_virtual && e.addr.is_some() && !e.blocked()
        })
        .is_some();
        if translate_ready {
            return Some(FireKind::LoadIncoming);
        }
        let wakeup_ready = age::oldest_satisfying(self.ldq.capacity(), self.ldq.head(), |i| {
            let e = self.ldq.get(i);
            e.valid && e.addr.is_some() && !e.addr_is_virtual && !e.executed && !e.succeeded && !e.blocked()
        })
        .is_some();
        wakeup_ready.then_some(FireKind::LoadWakeup)
    }

    /// Whether `run_store_commit` has a ready candidate this cycle, without
    /// mutating any state — mirrors its own guard conditions.
    fn store_commit_ready(&self) -> bool {
        if self.stq.is_empty() || self.stq.execute_head() == self.stq.tail() {
            return false;
        }
        let entry = self.stq.get(self.stq.execute_head());
        entry.valid && entry.committed && !entry.addr_is_virtual && !entry.succeeded && entry.addr.is_some() && entry.data.is_some()
    }

    /// Builds this cycle's `FireRequest`s for the DCache-contending phases
    /// (`spec.md` §4.2): load translate/wakeup, store commit, and the
    /// bounds co-engine's probe/occupancy-check/store reads. Every request
    /// targets the last lane or lane 0 per `arbiter::lane_restriction`, so
    /// the placeholder `lane` here is never consulted.
    fn fire_requests(&self) -> Vec<FireRequest> {
        let mut requests = Vec::new();
        if let Some(kind) = self.pending_load_kind() {
            requests.push(FireRequest { kind, lane: 0, stq_idx: None });
        }
        if self.store_commit_ready() {
            requests.push(FireRequest { kind: FireKind::StoreCommit, lane: 0, stq_idx: None });
        }
        // Both queues read the HBT through the same port; prefer the MCQ
        // probe when both are pending so only one `BndLoad` request is
        // ever emitted per cycle.
        if self.mcq.find_probe_candidate().is_some() || self.bdq.find_occ_check_candidate().is_some() {
            requests.push(FireRequest { kind: FireKind::BndLoad, lane: 0, stq_idx: None });
        }
        if self.bdq.find_store_candidate().is_some() {
            requests.push(FireRequest { kind: FireKind::BndStore, lane: 0, stq_idx: None });
        }
        requests
    }

    fn run_load_translate_and_fire(&mut self, tlb: &mut dyn DtlbPort, dc: &mut dyn DCachePort) -> (Vec<FaultCandidate>, Option<LoadWriteback>) {
        let mut faults = Vec::new();
        let Some(idx) = age::oldest_satisfying(self.ldq.capacity(), self.ldq.head(), |i| {
            let e = self.ldq.get(i);
            e.valid && e.addr_is_virtual && e.addr.is_some() && !e.blocked()
        }) else {
            return (faults, self.run_load_wakeup(dc));
        };

        let vaddr = VirtAddr::new(self.ldq.get(idx).addr.unwrap());
        let size = self.ldq.get(idx).uop.mem_size;
        let resp = tlb.translate(TlbRequest { vaddr, size, cmd: MemCmd::Read });
        if resp.miss {
            return (faults, self.run_load_wakeup(dc));
        }

        let rob_tag = self.ldq.get(idx).uop.rob_tag;
        if let Some(fault) = LsuFault::load_fault(vaddr, resp.page_fault, resp.access_fault) {
            faults.push(FaultCandidate { fault, rob_tag, killed_by_branch: false });
            return (faults, None);
        }

        {
            let e = self.ldq.get_mut(idx);
            e.addr = Some(resp.paddr.val());
            e.addr_is_virtual = false;
            e.addr_is_uncacheable = !resp.cacheable;
        }
        let writeback = self.fire_load(idx, dc);
        (faults, writeback)
    }

    fn run_load_wakeup(&mut self, dc: &mut dyn DCachePort) -> Option<LoadWriteback> {
        let idx = age::oldest_satisfying(self.ldq.capacity(), self.ldq.head(), |i| {
            let e = self.ldq.get(i);
            e.valid && e.addr.is_some() && !e.addr_is_virtual && !e.executed && !e.succeeded && !e.blocked()
        })?;
        self.fire_load(idx, dc)
    }

    fn fire_load(&mut self, idx: usize, dc: &mut dyn DCachePort) -> Option<LoadWriteback> {
        let cap = self.ldq.capacity();
        let head = self.ldq.head();
        let ord = lcam::do_ld_ordering_search(&mut self.ldq, idx, cap, head);
        self.stats.order_fails += ord.order_fail_idx.len() as u64;
        if !ord.order_fail_idx.is_empty() {
            debug!(?ord.order_fail_idx, "lcam order fail");
        }
        if !ord.kill_inflight_idx.is_empty() {
            dc.kill_inflight();
        }
        if ord.kill_inflight_idx.contains(&idx) {
            return None;
        }

        let entry = self.ldq.get(idx).clone();
        let matches = lcam::do_ld_forward_search(&self.ldq, &self.stq, idx);
        let forward_idx = lcam::resolve_forward(matches, entry.st_dep_mask, entry.youngest_stq_idx, self.stq.capacity());

        if let Some(sidx) = forward_idx {
            trace!(ldq_idx = idx, stq_idx = sidx, "store-to-load forward");
            let data = self.stq.get(sidx).data.unwrap_or(0);
            let value = forward_value(data, entry.uop.mem_size, entry.uop.mem_signed);
            let e = self.ldq.get_mut(idx);
            e.succeeded = true;
            e.forward_std_val = true;
            e.forward_stq_idx = Some(sidx);
            e.executed = false;
            e.debug_wb_data = Some(value);
            self.stats.forwards_taken += 1;
            return Some(LoadWriteback { ldq_idx: idx, data: value });
        }

        let Some(paddr) = entry.paddr() else { return None };
        self.stats.mem_req += 1;
        self.stats.mem_size += u64::from(entry.uop.mem_size.bytes());
        match dc.issue(DCacheRequest { paddr, size: entry.uop.mem_size, cmd: MemCmd::Read, data: None, is_hella: false }) {
            DCacheOutcome::Fired { data } => {
                self.stats.cache_hit += 1;
                let e = self.ldq.get_mut(idx);
                if e.execute_ignore {
                    e.execute_ignore = false;
                    e.executed = false;
                    None
                } else {
                    let value = forward_value(data, entry.uop.mem_size, entry.uop.mem_signed);
                    e.executed = true;
                    e.succeeded = true;
                    e.debug_wb_data = Some(value);
                    Some(LoadWriteback { ldq_idx: idx, data: value })
                }
            }
            DCacheOutcome::Nacked => {
                self.stats.cache_miss += 1;
                self.stats.nacks_observed += 1;
                warn!(ldq_idx = idx, "load nacked, entering retry backoff");
                let e = self.ldq.get_mut(idx);
                e.executed = false;
                self.ldq.block_fire(idx);
                None
            }
            DCacheOutcome::Blocked => None,
        }
    }

    fn run_store_translate(&mut self, tlb: &mut dyn DtlbPort) -> Vec<FaultCandidate> {
        let mut faults = Vec::new();
        let Some(idx) = age::oldest_satisfying(self.stq.capacity(), self.stq.head(), |i| {
            let e = self.stq.get(i);
            e.valid && e.addr_is_virtual && e.addr.is_some()
        }) else {
            return faults;
        };

        let vaddr = VirtAddr::new(self.stq.get(idx).addr.unwrap());
        let size = self.stq.get(idx).uop.mem_size;
        let resp = tlb.translate(TlbRequest { vaddr, size, cmd: MemCmd::Write });
        if resp.miss {
            return faults;
        }

        let rob_tag = self.stq.get(idx).uop.rob_tag;
        if let Some(fault) = LsuFault::store_fault(vaddr, resp.page_fault, resp.access_fault) {
            faults.push(FaultCandidate { fault, rob_tag, killed_by_branch: false });
            return faults;
        }

        {
            let e = self.stq.get_mut(idx);
            e.addr = Some(resp.paddr.val());
            e.addr_is_virtual = false;
        }

        let result = lcam::do_st_search(&mut self.ldq, &self.stq, idx, self.stq.capacity(), self.stq.head());
        self.stats.order_fails += result.order_fail_idx.len() as u64;
        for ldq_idx in result.order_fail_idx {
            let load_rob_tag = self.ldq.get(ldq_idx).uop.rob_tag;
            faults.push(FaultCandidate {
                fault: LsuFault::MemOrderingViolation(ldq_idx),
                rob_tag: load_rob_tag,
                killed_by_branch: false,
            });
        }
        faults
    }

    fn run_store_commit(&mut self, dc: &mut dyn DCachePort) {
        if self.stq.is_empty() || self.stq.execute_head() == self.stq.tail() {
            return;
        }
        let idx = self.stq.execute_head();
        let entry = self.stq.get(idx).clone();
        if !entry.valid || !entry.committed || entry.addr_is_virtual || entry.succeeded {
            return;
        }
        let (Some(addr), Some(data)) = (entry.addr, entry.data) else {
            return;
        };
        self.stats.mem_req += 1;
        self.stats.mem_size += u64::from(entry.uop.mem_size.bytes());
        match dc.issue(DCacheRequest {
            paddr: PhysAddr::new(addr),
            size: entry.uop.mem_size,
            cmd: MemCmd::Write,
            data: Some(data),
            is_hella: false,
        }) {
            DCacheOutcome::Fired { .. } => {
                self.stats.cache_hit += 1;
                self.stq.get_mut(idx).succeeded = true;
                self.stq.advance_execute_head();
            }
            DCacheOutcome::Nacked => {
                self.stats.cache_miss += 1;
                self.stats.nacks_observed += 1;
                warn!(stq_idx = idx, "store commit nacked, rewinding execute head");
                self.stq.rewind_execute_head(idx);
            }
            DCacheOutcome::Blocked => {}
        }
    }

    fn run_bounds_probe(&mut self, dc: &mut dyn DCachePort) {
        let Some(idx) = self.mcq.find_probe_candidate() else {
            return;
        };
        self.mcq.get_mut(idx).executed = true;
        let entry = self.mcq.get(idx).clone();
        let ptr = entry.addr.expect("mcq probe before address delivered");
        let paddr = hbt::hbt_addr_for(self.config.hbt_base_addr, VirtAddr::new(ptr), entry.way);

        self.stats.mem_req += 1;
        self.stats.mem_size += 8;
        match dc.issue(DCacheRequest { paddr, size: MemSize::Double, cmd: MemCmd::Read, data: None, is_hella: false }) {
            DCacheOutcome::Fired { data } => {
                self.stats.cache_hit += 1;
                let descriptor = BoundsDescriptor::unpack(data);
                let matched = (self.bnd_check)(descriptor, ptr);
                trace!(mcq_idx = idx, matched, "bounds probe response");
                self.mcq.get_mut(idx).on_probe_response(matched, self.config.hbt_num_way as u32);
            }
            DCacheOutcome::Nacked => {
                self.stats.cache_miss += 1;
                self.stats.nacks_observed += 1;
                warn!(mcq_idx = idx, way = self.mcq.get(idx).way, "bounds probe nacked, retrying next way");
                self.mcq.get_mut(idx).executed = false;
            }
            DCacheOutcome::Blocked => {
                self.mcq.get_mut(idx).executed = false;
            }
        }
    }

    fn run_bounds_occ_check(&mut self, dc: &mut dyn DCachePort) {
        let Some(idx) = self.bdq.find_occ_check_candidate() else {
            return;
        };
        self.bdq.get_mut(idx).executed = true;
        let entry = self.bdq.get(idx).clone();
        let ptr = entry.addr.expect("bdq occ check before address delivered");
        let paddr = hbt::hbt_addr_for(self.config.hbt_base_addr, VirtAddr::new(ptr), entry.way);

        self.stats.mem_req += 1;
        self.stats.mem_size += 8;
        match dc.issue(DCacheRequest { paddr, size: MemSize::Double, cmd: MemCmd::Read, data: None, is_hella: false }) {
            DCacheOutcome::Fired { data } => {
                self.stats.cache_hit += 1;
                let descriptor = BoundsDescriptor::unpack(data);
                let free = (self.occ_check)(descriptor);
                trace!(bdq_idx = idx, free, "occupancy check response");
                self.bdq.get_mut(idx).on_occ_check_response(free, self.config.hbt_num_way as u32);
            }
            DCacheOutcome::Nacked => {
                self.stats.cache_miss += 1;
                warn!(bdq_idx = idx, "occupancy check nacked, retrying next way");
                self.bdq.get_mut(idx).executed = false;
            }
            DCacheOutcome::Blocked => {
                self.bdq.get_mut(idx).executed = false;
            }
        }
    }

    fn run_bounds_store(&mut self, dc: &mut dyn DCachePort) {
        let Some(idx) = self.bdq.find_store_candidate() else {
            return;
        };
        self.bdq.get_mut(idx).executed = true;
        let entry = self.bdq.get(idx).clone();
        let ptr = entry.addr.expect("bdq store before address delivered");
        let paddr = hbt::hbt_addr_for(self.config.hbt_base_addr, VirtAddr::new(ptr), entry.way);
        let is_search = entry.uop.bounds_op == BoundsOp::Search;

        self.stats.mem_req += 1;
        self.stats.mem_size += 8;
        let req = DCacheRequest {
            paddr,
            size: MemSize::Double,
            cmd: if is_search { MemCmd::Read } else { MemCmd::Write },
            data: if is_search { None } else { Some(entry.descriptor.pack()) },
            is_hella: false,
        };
        match dc.issue(req) {
            DCacheOutcome::Fired { .. } => {
                self.stats.cache_hit += 1;
                debug!(bdq_idx = idx, is_search, "bounds descriptor write-back");
                self.bdq.get_mut(idx).on_store_ack();
            }
            DCacheOutcome::Nacked => {
                self.stats.cache_miss += 1;
                warn!(bdq_idx = idx, "bounds descriptor write-back nacked");
                self.bdq.get_mut(idx).executed = false;
            }
            DCacheOutcome::Blocked => {
                self.bdq.get_mut(idx).executed = false;
            }
        }
    }
}

/// Extracts a store-to-load forwarded value from a raw 64-bit store
/// payload, truncating to `size` bytes and sign-extending if `signed`
/// (`spec.md` §4.6: "a store-generator on STQ data ... then a
/// load-generator with size/sign").
fn forward_value(raw: u64, size: MemSize, signed: bool) -> u64 {
    match size {
        MemSize::Byte => {
            let v = raw as u8;
            if signed { (v as i8) as i64 as u64 } else { u64::from(v) }
        }
        MemSize::Half => {
            let v = raw as u16;
            if signed { (v as i16) as i64 as u64 } else { u64::from(v) }
        }
        MemSize::Word => {
            let v = raw as u32;
            if signed { (v as i32) as i64 as u64 } else { u64::from(v) }
        }
        MemSize::Double | MemSize::Nop => raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{MockDCachePort, MockDtlbPort, TlbResponse};

    fn load_uop(size: MemSize) -> MicroOp {
        MicroOp { uses_ldq: true, mem_cmd: MemCmd::Read, mem_size: size, ..MicroOp::default() }
    }

    fn store_uop(size: MemSize) -> MicroOp {
        MicroOp { uses_stq: true, mem_cmd: MemCmd::Write, mem_size: size, ..MicroOp::default() }
    }

    #[test]
    fn pure_forward_scenario() {
        // spec.md §8 scenario 1.
        let mut lsu = Lsu::new(LsuConfig { enable_wyfy: false, ..LsuConfig::default() });
        let slots = lsu.dispatch(&[store_uop(MemSize::Word), load_uop(MemSize::Word)]);
        let sidx = slots[0].stq_idx.unwrap();
        let lidx = slots[1].ldq_idx.unwrap();

        lsu.deliver_store_address(sidx, None, VirtAddr::new(0x4000));
        lsu.deliver_store_data(sidx, 0xDEAD);
        lsu.deliver_load_address(lidx, None, VirtAddr::new(0x4000));

        let mut tlb = MockDtlbPort::new();
        let _ = tlb.expect_translate().returning(|req| TlbResponse::hit(PhysAddr::new(req.vaddr.val())));
        let mut dc = MockDCachePort::new();

        let _ = lsu.tick(&mut tlb, &mut dc, CycleInputs::default());
        let _ = lsu.tick(&mut tlb, &mut dc, CycleInputs::default());

        let load = lsu.ldq().get(lidx);
        assert!(load.succeeded);
        assert!(load.forward_std_val);
        assert_eq!(load.forward_stq_idx, Some(sidx));
        assert_eq!(load.debug_wb_data, Some(0xDEAD));
    }

    #[test]
    fn mcq_bounds_hit_scenario() {
        // spec.md §8 scenario 4.
        let mut lsu = Lsu::new(LsuConfig::default());
        let slots = lsu.dispatch(&[load_uop(MemSize::Word)]);
        let lidx = slots[0].ldq_idx.unwrap();
        let midx = slots[0].mcq_idx.unwrap();

        let vaddr = VirtAddr::new(0x0000_2000_0000_1000);
        lsu.deliver_load_address(lidx, Some(midx), vaddr);
        assert_eq!(vaddr.pac(), 0x01);

        let mut tlb = MockDtlbPort::new();
        let _ = tlb.expect_translate().returning(|req| TlbResponse::hit(PhysAddr::new(req.vaddr.val())));
        let mut dc = MockDCachePort::new();
        let _ = dc.expect_issue().returning(|req| {
            if req.size == MemSize::Double {
                DCacheOutcome::Fired { data: BoundsDescriptor { lower: 0, upper: u64::MAX, occupied: true }.pack() }
            } else {
                DCacheOutcome::Fired { data: 0 }
            }
        });

        let _ = lsu.tick(&mut tlb, &mut dc, CycleInputs::default());
        assert_eq!(lsu.mcq().get(midx).state, crate::queues::McqState::Done);

        let _ = lsu.tick(
            &mut tlb,
            &mut dc,
            CycleInputs {
                commit_slots: vec![CommitSlot {
                    valid: true,
                    uses_ldq: true,
                    mcq_idx: Some(midx),
                    ..CommitSlot::default()
                }],
                ..CycleInputs::default()
            },
        );
        assert!(lsu.mcq().len() == 0);
        assert_eq!(lsu.stats().num_unsigned_inst, 1);
    }

    #[test]
    fn mcq_exhaustion_scenario() {
        // spec.md §8 scenario 5.
        let mut lsu = Lsu::new(LsuConfig::default());
        let slots = lsu.dispatch(&[load_uop(MemSize::Word)]);
        let lidx = slots[0].ldq_idx.unwrap();
        let midx = slots[0].mcq_idx.unwrap();
        lsu.deliver_load_address(lidx, Some(midx), VirtAddr::new(0x0000_2000_0000_1000));

        let mut tlb = MockDtlbPort::new();
        let _ = tlb.expect_translate().returning(|req| TlbResponse::hit(PhysAddr::new(req.vaddr.val())));
        let mut dc = MockDCachePort::new();
        let _ = dc.expect_issue().returning(|req| {
            if req.size == MemSize::Double {
                DCacheOutcome::Fired { data: 0 }
            } else {
                DCacheOutcome::Fired { data: 0 }
            }
        });

        for _ in 0..5 {
            let _ = lsu.tick(&mut tlb, &mut dc, CycleInputs::default());
        }
        assert_eq!(lsu.mcq().get(midx).state, crate::queues::McqState::Fail);
    }

    #[test]
    fn branch_mispredict_kills_younger_loads_only() {
        // spec.md §8 scenario 6.
        let mut lsu = Lsu::new(LsuConfig::default());
        let mut l0 = load_uop(MemSize::Word);
        l0.br_mask = 0;
        let mut l1 = load_uop(MemSize::Word);
        l1.br_mask = 0b1;
        let mut l2 = load_uop(MemSize::Word);
        l2.br_mask = 0b1;

        let slots = lsu.dispatch(&[l0, l1, l2]);
        let i0 = slots[0].ldq_idx.unwrap();
        let i1 = slots[1].ldq_idx.unwrap();

        let mut tlb = MockDtlbPort::new();
        let mut dc = MockDCachePort::new();
        let _ = lsu.tick(
            &mut tlb,
            &mut dc,
            CycleInputs {
                branch: Some(BranchInfo {
                    valid: true,
                    mispredict: true,
                    resolved_mask: 0b1,
                    new_ldq_tail: i1,
                    new_stq_tail: 0,
                    new_mcq_tail: 0,
                    new_bdq_tail: 0,
                }),
                ..CycleInputs::default()
            },
        );

        assert!(lsu.ldq().get(i0).valid);
        assert!(!lsu.ldq().get(i1).valid);
        assert_eq!(lsu.ldq().len(), 1);
    }
}
