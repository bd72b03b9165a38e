//! Commit (in-order retirement) and kill (branch-mispredict squash,
//! exception recovery) orchestration across all four queues (`spec.md`
//! §4.9).

use crate::common::MemCmd;
use crate::queues::{Bdq, BdqState, Ldq, Mcq, McqState, Stq};
use crate::stats::LsuStats;
use tracing::debug;

/// One `coreWidth` commit lane's worth of information about the
/// instruction the ROB is retiring this cycle.
#[derive(Clone, Copy, Debug, Default)]
pub struct CommitSlot {
    pub valid: bool,
    pub uses_ldq: bool,
    pub uses_stq: bool,
    pub stq_idx: Option<usize>,
    pub mcq_idx: Option<usize>,
    pub bdq_idx: Option<usize>,
    pub is_fence: bool,
    pub mem_signed: bool,
}

/// Branch-resolution information driving the mispredict squash
/// (`spec.md` §4.9: `brinfo.valid ∧ mispredict ∧ ¬exception`).
#[derive(Clone, Copy, Debug)]
pub struct BranchInfo {
    pub valid: bool,
    pub mispredict: bool,
    pub resolved_mask: u32,
    pub new_ldq_tail: usize,
    pub new_stq_tail: usize,
    pub new_mcq_tail: usize,
    pub new_bdq_tail: usize,
}

/// Processes one cycle's commit stream: marks STQ/MCQ/BDQ slots committed,
/// dequeues LDQ heads, drains ready STQ heads, and dequeues resolved
/// MCQ/BDQ heads, bumping the relevant counters (`spec.md` §4.9, §9
/// "Counters are updated strictly at dequeue").
pub fn commit_cycle(ldq: &mut Ldq, stq: &mut Stq, mcq: &mut Mcq, bdq: &mut Bdq, slots: &[CommitSlot], stats: &mut LsuStats) {
    for slot in slots.iter().filter(|s| s.valid) {
        if slot.uses_stq {
            if let Some(idx) = slot.stq_idx {
                stq.mark_committed(idx);
            }
        }
        if slot.uses_ldq {
            let entry = ldq.commit_head();
            #[cfg(feature = "commit-log")]
            tracing::info!(rob_tag = entry.uop.rob_tag.0, ?entry.addr, "commit ldq");
            let _ = entry;
        }
        if (slot.uses_ldq || slot.uses_stq) && !slot.is_fence {
            if let Some(idx) = slot.mcq_idx {
                mcq.get_mut(idx).committed = true;
            }
        }
        if let Some(idx) = slot.bdq_idx {
            bdq.get_mut(idx).committed = true;
        }
    }

    drain_ready_stores(stq);
    drain_bounds_checks(mcq, stats);
    drain_bounds_descriptors(bdq, stats);
}

/// Dequeues the STQ head while it is committed and either has succeeded or
/// is an ordered fence (`spec.md` §4.9). Advances `execute_head` past a
/// drained fence, since a fence carries no cache request of its own.
fn drain_ready_stores(stq: &mut Stq) {
    loop {
        if stq.is_empty() {
            break;
        }
        let head = stq.get(stq.head());
        let is_fence = matches!(head.uop.mem_cmd, MemCmd::Fence | MemCmd::Sfence);
        let ready = head.committed && (head.succeeded || is_fence);
        if !ready {
            break;
        }
        #[cfg(feature = "commit-log")]
        tracing::info!(rob_tag = head.uop.rob_tag.0, ?head.addr, "commit stq");
        let _ = stq.dequeue_head();
        if is_fence {
            stq.advance_execute_head();
        }
    }
}

fn drain_bounds_checks(mcq: &mut Mcq, stats: &mut LsuStats) {
    while let Some(entry) = mcq.try_dequeue_head() {
        match entry.state {
            McqState::Done => {
                if entry.signed {
                    stats.num_signed_inst += 1;
                } else {
                    stats.num_unsigned_inst += 1;
                }
            }
            McqState::Fail => {
                debug!(rob_tag = entry.uop.rob_tag.0, "bounds check failed");
                stats.bounds_check_failures += 1;
            }
            McqState::Init | McqState::BndChk => unreachable!("mcq dequeue from non-terminal state"),
        }
    }
}

fn drain_bounds_descriptors(bdq: &mut Bdq, stats: &mut LsuStats) {
    while let Some(entry) = bdq.try_dequeue_head() {
        match entry.state {
            BdqState::Done => match entry.uop.bounds_op {
                crate::common::BoundsOp::Store => stats.num_bndstr += 1,
                crate::common::BoundsOp::Clear => stats.num_bndclr += 1,
                crate::common::BoundsOp::Search => stats.num_bndsrch += 1,
            },
            BdqState::Fail => {
                debug!(rob_tag = entry.uop.rob_tag.0, "occupancy check failed");
                stats.occupancy_check_failures += 1;
            }
            BdqState::Init | BdqState::OccChk | BdqState::BndStr => {
                unreachable!("bdq dequeue from non-terminal state")
            }
        }
    }
}

/// Applies a branch-mispredict squash to every queue (`spec.md` §4.9). A
/// no-op unless `info.valid && info.mispredict`; the spec explicitly
/// excludes the case where an exception is also pending this cycle
/// (`¬exception`), since [`exception_flush`] supersedes it.
pub fn branch_kill(ldq: &mut Ldq, stq: &mut Stq, mcq: &mut Mcq, bdq: &mut Bdq, info: &BranchInfo) {
    if !info.valid || !info.mispredict {
        return;
    }
    ldq.kill_mispredicted(info.new_ldq_tail, info.resolved_mask);
    stq.kill_mispredicted(info.new_stq_tail, info.resolved_mask);
    mcq.kill_mispredicted(info.new_mcq_tail, info.resolved_mask);
    bdq.kill_mispredicted(info.new_bdq_tail, info.resolved_mask);
}

/// Applies an exception squash to every queue (`spec.md` §4.9).
pub fn exception_flush(ldq: &mut Ldq, stq: &mut Stq, mcq: &mut Mcq, bdq: &mut Bdq) {
    ldq.flush_all();
    stq.exception_flush();
    mcq.flush_all();
    bdq.flush_all();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::MicroOp;

    fn load_uop() -> MicroOp {
        MicroOp { uses_ldq: true, ..MicroOp::default() }
    }

    #[test]
    fn commit_marks_stq_and_drains_succeeded_head() {
        let mut ldq = Ldq::new(4);
        let mut stq = Stq::new(4);
        let mut mcq = Mcq::new(4);
        let mut bdq = Bdq::new(4);
        let mut stats = LsuStats::new();

        let sidx = stq.allocate(MicroOp { uses_stq: true, ..MicroOp::default() }).unwrap();
        stq.get_mut(sidx).succeeded = true;

        let slots = [CommitSlot {
            valid: true,
            uses_stq: true,
            stq_idx: Some(sidx),
            ..CommitSlot::default()
        }];
        commit_cycle(&mut ldq, &mut stq, &mut mcq, &mut bdq, &slots, &mut stats);
        assert!(stq.is_empty());
    }

    #[test]
    fn commit_dequeues_finished_load_and_bounds_check() {
        let mut ldq = Ldq::new(4);
        let mut stq = Stq::new(4);
        let mut mcq = Mcq::new(4);
        let mut bdq = Bdq::new(4);
        let mut stats = LsuStats::new();

        let lidx = ldq.allocate(load_uop(), 0, 0).unwrap();
        ldq.get_mut(lidx).executed = true;
        ldq.get_mut(lidx).succeeded = true;

        let midx = mcq.allocate(MicroOp::default(), false).unwrap();
        mcq.get_mut(midx).state = McqState::Done;

        let slots = [CommitSlot {
            valid: true,
            uses_ldq: true,
            mcq_idx: Some(midx),
            ..CommitSlot::default()
        }];
        commit_cycle(&mut ldq, &mut stq, &mut mcq, &mut bdq, &slots, &mut stats);
        assert!(ldq.is_empty());
        assert_eq!(stats.num_unsigned_inst, 1);
    }

    #[test]
    fn branch_kill_noop_when_not_mispredict() {
        let mut ldq = Ldq::new(4);
        let mut stq = Stq::new(4);
        let mut mcq = Mcq::new(4);
        let mut bdq = Bdq::new(4);
        let idx = ldq.allocate(load_uop(), 0, 0).unwrap();

        branch_kill(&mut ldq, &mut stq, &mut mcq, &mut bdq, &BranchInfo {
            valid: true,
            mispredict: false,
            resolved_mask: 0xFFFF_FFFF,
            new_ldq_tail: 0,
            new_stq_tail: 0,
            new_mcq_tail: 0,
            new_bdq_tail: 0,
        });
        assert!(ldq.get(idx).valid);
    }

    #[test]
    fn exception_flush_resets_everything() {
        let mut ldq = Ldq::new(4);
        let mut stq = Stq::new(4);
        let mut mcq = Mcq::new(4);
        let mut bdq = Bdq::new(4);
        let _ = ldq.allocate(load_uop(), 0, 0);
        let _ = stq.allocate(MicroOp { uses_stq: true, ..MicroOp::default() });

        exception_flush(&mut ldq, &mut stq, &mut mcq, &mut bdq);
        assert!(ldq.is_empty());
        assert!(stq.is_empty());
    }
}
