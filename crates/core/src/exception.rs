//! Oldest-wins exception multiplexer (`spec.md` §7: "surface to the ROB
//! ... with the oldest offender selected by ROB-relative age"; §4.3:
//! "latched one cycle later and OR-reduced across lanes").
//!
//! Exceptions raised on uops killed by a branch resolved the same cycle are
//! suppressed (`spec.md` §7), matching the reference simulator's `r_xcpt`
//! latch discarding mispredicted-path faults.

use crate::common::{FaultCandidate, LsuFault};

/// Picks the single fault the ROB should see this cycle, if any: the
/// oldest (lowest ROB tag) candidate not suppressed by a same-cycle branch
/// kill.
#[must_use]
pub fn select_oldest_fault(candidates: &[FaultCandidate]) -> Option<LsuFault> {
    candidates
        .iter()
        .filter(|c| !c.killed_by_branch)
        .min_by_key(|c| c.rob_tag)
        .map(|c| c.fault)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::RobTag;

    #[test]
    fn no_candidates_yields_none() {
        assert_eq!(select_oldest_fault(&[]), None);
    }

    #[test]
    fn oldest_rob_tag_wins() {
        let candidates = [
            FaultCandidate {
                fault: LsuFault::LoadAccessFault(0x10),
                rob_tag: RobTag(5),
                killed_by_branch: false,
            },
            FaultCandidate {
                fault: LsuFault::StorePageFault(0x20),
                rob_tag: RobTag(2),
                killed_by_branch: false,
            },
        ];
        assert_eq!(select_oldest_fault(&candidates), Some(LsuFault::StorePageFault(0x20)));
    }

    #[test]
    fn branch_killed_candidates_are_suppressed() {
        let candidates = [FaultCandidate {
            fault: LsuFault::LoadAccessFault(0x10),
            rob_tag: RobTag(1),
            killed_by_branch: true,
        }];
        assert_eq!(select_oldest_fault(&candidates), None);
    }

    #[test]
    fn mixed_killed_and_live_picks_live_oldest() {
        let candidates = [
            FaultCandidate {
                fault: LsuFault::LoadAccessFault(0x10),
                rob_tag: RobTag(1),
                killed_by_branch: true,
            },
            FaultCandidate {
                fault: LsuFault::BoundsCheckFailed(3),
                rob_tag: RobTag(4),
                killed_by_branch: false,
            },
        ];
        assert_eq!(select_oldest_fault(&candidates), Some(LsuFault::BoundsCheckFailed(3)));
    }
}
