//! Scenario runner for the LSU/bounds-co-engine simulator.
//!
//! Loads a JSON scenario (a sizing/policy config plus a program-order list
//! of memory and bounds-metadata ops), dispatches every op up front, then
//! ticks the `Lsu` one cycle at a time — retiring exactly the oldest
//! outstanding op each cycle once its result is ready — until every queue
//! has drained or `--max-cycles` is hit.

use std::collections::VecDeque;
use std::collections::HashMap;
use std::fs;
use std::process;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use lsu_core::commit::CommitSlot;
use lsu_core::common::{BoundsOp, MemCmd, MemSize, MicroOp, RobTag, VirtAddr};
use lsu_core::hbt::BoundsDescriptor;
use lsu_core::lsu::CycleInputs;
use lsu_core::ports::{DCacheOutcome, DCacheRequest, DCachePort, DtlbPort, TlbRequest, TlbResponse};
use lsu_core::{Lsu, LsuConfig};

#[derive(Parser, Debug)]
#[command(name = "lsu-sim", author, version, about = "Out-of-order load/store unit scenario runner")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Runs a scenario file to completion (or until `--max-cycles` is hit)
    /// and reports final statistics.
    Run {
        /// Path to a scenario JSON file.
        scenario: String,

        /// Cycle cap; the run stops early once every op has retired.
        #[arg(long, default_value_t = 200)]
        max_cycles: u64,

        /// Prints every op's final queue state alongside the stats summary.
        #[arg(long)]
        trace: bool,
    },
}

fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run { scenario, max_cycles, trace } => cmd_run(&scenario, max_cycles, trace),
    }
}

/// A scenario file: sizing/policy config plus a program-order op list.
#[derive(Debug, Deserialize)]
struct Scenario {
    #[serde(default)]
    config: LsuConfig,
    ops: Vec<OpSpec>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum SizeSpec {
    Byte,
    Half,
    Word,
    Double,
}

impl From<SizeSpec> for MemSize {
    fn from(size: SizeSpec) -> Self {
        match size {
            SizeSpec::Byte => MemSize::Byte,
            SizeSpec::Half => MemSize::Half,
            SizeSpec::Word => MemSize::Word,
            SizeSpec::Double => MemSize::Double,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum OpSpec {
    Load {
        size: SizeSpec,
        addr: u64,
        #[serde(default)]
        signed: bool,
    },
    Store {
        size: SizeSpec,
        addr: u64,
        data: u64,
    },
    BndStore {
        addr: u64,
        lower: u64,
        upper: u64,
    },
    BndClear {
        addr: u64,
    },
    BndSearch {
        addr: u64,
    },
}

impl OpSpec {
    fn to_micro_op(&self, rob_tag: u64) -> MicroOp {
        match self {
            OpSpec::Load { size, signed, .. } => MicroOp {
                rob_tag: RobTag(rob_tag),
                uses_ldq: true,
                mem_cmd: MemCmd::Read,
                mem_size: (*size).into(),
                mem_signed: *signed,
                ..MicroOp::default()
            },
            OpSpec::Store { size, .. } => MicroOp {
                rob_tag: RobTag(rob_tag),
                uses_stq: true,
                mem_cmd: MemCmd::Write,
                mem_size: (*size).into(),
                ..MicroOp::default()
            },
            OpSpec::BndStore { .. } => MicroOp {
                rob_tag: RobTag(rob_tag),
                uses_bdq: true,
                bounds_op: BoundsOp::Store,
                ..MicroOp::default()
            },
            OpSpec::BndClear { .. } => MicroOp {
                rob_tag: RobTag(rob_tag),
                uses_bdq: true,
                bounds_op: BoundsOp::Clear,
                ..MicroOp::default()
            },
            OpSpec::BndSearch { .. } => MicroOp {
                rob_tag: RobTag(rob_tag),
                uses_bdq: true,
                bounds_op: BoundsOp::Search,
                ..MicroOp::default()
            },
        }
    }
}

/// One dispatched op's queue assignment, tracked until it retires.
#[derive(Debug, Clone, Copy, Default)]
struct PendingOp {
    uses_ldq: bool,
    uses_stq: bool,
    ldq_idx: Option<usize>,
    stq_idx: Option<usize>,
    mcq_idx: Option<usize>,
    bdq_idx: Option<usize>,
}

impl PendingOp {
    fn commit_slot(self) -> CommitSlot {
        CommitSlot {
            valid: true,
            uses_ldq: self.uses_ldq,
            uses_stq: self.uses_stq,
            stq_idx: self.stq_idx,
            mcq_idx: self.mcq_idx,
            bdq_idx: self.bdq_idx,
            is_fence: false,
            mem_signed: false,
        }
    }
}

/// Identity-mapped DTLB: every translation hits, cacheable, no faults.
/// Scenarios exercise the bounds co-engine and LCAM, not page-table
/// behavior, so modeling a real page walker would add machinery nothing in
/// this harness reads.
struct IdentityTlb;

impl DtlbPort for IdentityTlb {
    fn translate(&mut self, req: TlbRequest) -> TlbResponse {
        TlbResponse::hit(lsu_core::common::PhysAddr::new(req.vaddr.val()))
    }

    fn sfence(&mut self) {}
}

/// A byte-addressable data cache stand-in: every request fires same-cycle,
/// never nacks or blocks. Backs ordinary loads/stores and the bounds
/// co-engine's HBT probes/stores alike, since both are just reads and
/// writes of a physical address as far as this model is concerned.
struct FlatMemory {
    bytes: HashMap<u64, u8>,
}

impl FlatMemory {
    fn new() -> Self {
        Self { bytes: HashMap::new() }
    }

    fn read(&self, addr: u64, size: u32) -> u64 {
        let mut word = 0u64;
        for i in 0..size {
            let byte = *self.bytes.get(&(addr + u64::from(i))).unwrap_or(&0);
            word |= u64::from(byte) << (8 * i);
        }
        word
    }

    fn write(&mut self, addr: u64, size: u32, data: u64) {
        for i in 0..size {
            let byte = ((data >> (8 * i)) & 0xff) as u8;
            let _ = self.bytes.insert(addr + u64::from(i), byte);
        }
    }
}

impl DCachePort for FlatMemory {
    fn issue(&mut self, req: DCacheRequest) -> DCacheOutcome {
        let bytes = req.size.bytes().max(1);
        match req.cmd {
            MemCmd::Read | MemCmd::Amo => DCacheOutcome::Fired { data: self.read(req.paddr.val(), bytes) },
            MemCmd::Write => {
                self.write(req.paddr.val(), bytes, req.data.unwrap_or(0));
                DCacheOutcome::Fired { data: 0 }
            }
            MemCmd::Fence | MemCmd::Sfence => DCacheOutcome::Fired { data: 0 },
        }
    }

    fn kill_inflight(&mut self) {}
}

fn cmd_run(path: &str, max_cycles: u64, trace: bool) {
    let text = fs::read_to_string(path).unwrap_or_else(|err| {
        eprintln!("failed to read scenario {path}: {err}");
        process::exit(1);
    });
    let scenario: Scenario = serde_json::from_str(&text).unwrap_or_else(|err| {
        eprintln!("failed to parse scenario {path}: {err}");
        process::exit(1);
    });

    let mut lsu = Lsu::new(scenario.config);
    let mut tlb = IdentityTlb;
    let mut mem = FlatMemory::new();

    let mut pending: VecDeque<PendingOp> = VecDeque::new();
    for (i, op) in scenario.ops.iter().enumerate() {
        let uop = op.to_micro_op(i as u64);
        let slot = lsu.dispatch(std::slice::from_ref(&uop))[0];

        match op {
            OpSpec::Load { addr, .. } => match slot.ldq_idx {
                Some(idx) => lsu.deliver_load_address(idx, slot.mcq_idx, VirtAddr::new(*addr)),
                None => {
                    eprintln!("op {i}: ldq full, dropping load");
                    continue;
                }
            },
            OpSpec::Store { addr, data, .. } => match slot.stq_idx {
                Some(idx) => {
                    lsu.deliver_store_address(idx, slot.mcq_idx, VirtAddr::new(*addr));
                    lsu.deliver_store_data(idx, *data);
                }
                None => {
                    eprintln!("op {i}: stq full, dropping store");
                    continue;
                }
            },
            OpSpec::BndStore { addr, lower, upper } => match slot.bdq_idx {
                Some(idx) => lsu.deliver_bdq_address(idx, VirtAddr::new(*addr), BoundsDescriptor { lower: *lower, upper: *upper, occupied: true }),
                None => {
                    eprintln!("op {i}: bdq full or enable_wyfy is off, dropping bounds-store");
                    continue;
                }
            },
            OpSpec::BndClear { addr } | OpSpec::BndSearch { addr } => match slot.bdq_idx {
                Some(idx) => lsu.deliver_bdq_address(idx, VirtAddr::new(*addr), BoundsDescriptor::default()),
                None => {
                    eprintln!("op {i}: bdq full or enable_wyfy is off, dropping op");
                    continue;
                }
            },
        }

        pending.push_back(PendingOp {
            uses_ldq: slot.ldq_idx.is_some(),
            uses_stq: slot.stq_idx.is_some(),
            ldq_idx: slot.ldq_idx,
            stq_idx: slot.stq_idx,
            mcq_idx: slot.mcq_idx,
            bdq_idx: slot.bdq_idx,
        });
    }

    let mut faults_seen = Vec::new();
    let mut load_values: HashMap<usize, u64> = HashMap::new();
    let mut cycle = 0u64;
    while cycle < max_cycles {
        let drained = pending.is_empty() && lsu.ldq().is_empty() && lsu.stq().is_empty() && lsu.mcq().len() == 0 && lsu.bdq().len() == 0;
        if drained {
            break;
        }

        let mut commit_slots = Vec::new();
        let ready = pending.front().is_some_and(|front| {
            !front.uses_ldq || front.ldq_idx.is_some_and(|idx| lsu.ldq().get(idx).valid && lsu.ldq().get(idx).succeeded)
        });
        if ready {
            if let Some(front) = pending.front() {
                commit_slots.push(front.commit_slot());
            }
        }

        let outcome = lsu.tick(&mut tlb, &mut mem, CycleInputs { commit_slots, ..CycleInputs::default() });
        for fault in &outcome.faults {
            if !fault.killed_by_branch {
                faults_seen.push((cycle, fault.fault, fault.rob_tag));
            }
        }
        if let Some(wb) = outcome.load_writeback {
            let _ = load_values.insert(wb.ldq_idx, wb.data);
        }
        if ready {
            if let Some(front) = pending.pop_front() {
                if let Some(idx) = front.ldq_idx {
                    if let Some(data) = load_values.remove(&idx) {
                        println!("cycle {cycle}: load retired, data=0x{data:x}");
                    }
                }
            }
        }
        cycle += 1;
    }

    for (cycle, fault, rob_tag) in &faults_seen {
        eprintln!("cycle {cycle}: {fault} ({rob_tag})");
    }
    if !pending.is_empty() {
        eprintln!("warning: {} op(s) did not retire within {max_cycles} cycles", pending.len());
    }

    if trace {
        println!("ldq len={} stq len={} mcq len={} bdq len={}", lsu.ldq().len(), lsu.stq().len(), lsu.mcq().len(), lsu.bdq().len());
    }
    println!("cycles elapsed: {cycle}");
    println!("{:#?}", lsu.stats());

    if !pending.is_empty() || !faults_seen.is_empty() {
        process::exit(1);
    }
}
