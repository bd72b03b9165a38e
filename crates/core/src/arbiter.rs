//! Fixed-priority fire arbitration (`lsu_sched`): resolves which candidate
//! operation uses the shared TLB/DCache/LCAM/ROB resource pools each cycle
//! (`spec.md` §4.2).

use tracing::trace;

/// A category of memory-system traffic competing for lanes this cycle, in
/// the fixed priority order `spec.md` §4.2 specifies (highest first).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FireKind {
    LoadIncoming,
    StadIncoming,
    StaIncoming,
    StdIncoming,
    Sfence,
    Release,
    HellaIncoming,
    HellaWakeup,
    LoadRetry,
    StaRetry,
    StoreCommit,
    LoadWakeup,
    BndLoad,
    BndStore,
}

/// Fixed priority order, highest first (`spec.md` §4.2).
pub const PRIORITY: [FireKind; 14] = [
    FireKind::LoadIncoming,
    FireKind::StadIncoming,
    FireKind::StaIncoming,
    FireKind::StdIncoming,
    FireKind::Sfence,
    FireKind::Release,
    FireKind::HellaIncoming,
    FireKind::HellaWakeup,
    FireKind::LoadRetry,
    FireKind::StaRetry,
    FireKind::StoreCommit,
    FireKind::LoadWakeup,
    FireKind::BndLoad,
    FireKind::BndStore,
];

/// Which resource ports a `FireKind` consumes, from the table in `spec.md`
/// §4.2.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResourceReq {
    pub tlb: bool,
    pub dc: bool,
    pub lcam: bool,
    pub rob: bool,
}

#[must_use]
pub fn resources_for(kind: FireKind) -> ResourceReq {
    match kind {
        FireKind::LoadIncoming => ResourceReq { tlb: true, dc: true, lcam: true, rob: false },
        FireKind::StadIncoming | FireKind::StaIncoming => {
            ResourceReq { tlb: true, dc: false, lcam: true, rob: true }
        }
        FireKind::StdIncoming => ResourceReq { tlb: false, dc: false, lcam: false, rob: true },
        FireKind::Sfence => ResourceReq { tlb: true, dc: false, lcam: false, rob: true },
        FireKind::Release => ResourceReq { tlb: false, dc: false, lcam: true, rob: false },
        FireKind::HellaIncoming => ResourceReq { tlb: true, dc: true, lcam: false, rob: false },
        FireKind::HellaWakeup => ResourceReq { tlb: false, dc: true, lcam: false, rob: false },
        FireKind::LoadRetry => ResourceReq { tlb: true, dc: true, lcam: true, rob: false },
        FireKind::StaRetry => ResourceReq { tlb: true, dc: false, lcam: true, rob: true },
        FireKind::StoreCommit => ResourceReq { tlb: false, dc: true, lcam: false, rob: false },
        FireKind::LoadWakeup => ResourceReq { tlb: false, dc: true, lcam: true, rob: false },
        FireKind::BndLoad | FireKind::BndStore => ResourceReq { tlb: false, dc: true, lcam: false, rob: false },
    }
}

/// Lane restriction a `FireKind` is subject to (`spec.md` §4.2 "Tie/
/// restriction rules").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LaneRestriction {
    /// May fire on any lane with free resources.
    Any,
    /// Must fire on lane 0.
    Lane0Only,
    /// Must fire on the last lane (`mem_width - 1`).
    LastLaneOnly,
}

#[must_use]
pub fn lane_restriction(kind: FireKind) -> LaneRestriction {
    match kind {
        FireKind::StoreCommit => LaneRestriction::Lane0Only,
        FireKind::Release
        | FireKind::LoadRetry
        | FireKind::StaRetry
        | FireKind::LoadWakeup
        | FireKind::BndLoad
        | FireKind::BndStore => LaneRestriction::LastLaneOnly,
        _ => LaneRestriction::Any,
    }
}

/// A candidate request for one lane's worth of traffic this cycle.
#[derive(Clone, Copy, Debug)]
pub struct FireRequest {
    pub kind: FireKind,
    /// Lane this request originates on (dispatch-lane categories), or an
    /// arbitrary placeholder for singleton/last-lane-restricted categories
    /// (the arbiter overrides the lane for those per `lane_restriction`).
    pub lane: usize,
    /// STQ index this request targets, for the `sta_retry` vs. `std_incoming`
    /// collision rule (`spec.md` §4.2: "a retrying store whose
    /// `stq_retry_idx` collides with an incoming STD on another lane is
    /// deferred").
    pub stq_idx: Option<usize>,
}

/// A granted fire decision: the lane a request was awarded, or nothing if
/// no lane/resources were available this cycle.
#[derive(Clone, Copy, Debug)]
pub struct Grant {
    pub kind: FireKind,
    pub lane: usize,
}

/// Per-lane availability of the four shared resource pools this cycle
/// (`spec.md` §4.2: "one TLB port per lane, one DC port per lane, one LCAM
/// port per lane, one ROB clr-busy slot per lane").
pub struct ResourcePools {
    tlb: Vec<bool>,
    dc: Vec<bool>,
    lcam: Vec<bool>,
    rob: Vec<bool>,
}

impl ResourcePools {
    #[must_use]
    pub fn new(mem_width: usize) -> Self {
        Self {
            tlb: vec![true; mem_width],
            dc: vec![true; mem_width],
            lcam: vec![true; mem_width],
            rob: vec![true; mem_width],
        }
    }

    fn available(&self, lane: usize, req: ResourceReq) -> bool {
        (!req.tlb || self.tlb[lane])
            && (!req.dc || self.dc[lane])
            && (!req.lcam || self.lcam[lane])
            && (!req.rob || self.rob[lane])
    }

    fn consume(&mut self, lane: usize, req: ResourceReq) {
        if req.tlb {
            self.tlb[lane] = false;
        }
        if req.dc {
            self.dc[lane] = false;
        }
        if req.lcam {
            self.lcam[lane] = false;
        }
        if req.rob {
            self.rob[lane] = false;
        }
    }
}

/// Resolves fire grants for one cycle, walking `PRIORITY` in order and
/// greedily assigning lanes/resources to matching requests (`spec.md`
/// §4.2). `requests` need not be sorted; priority comes entirely from
/// `PRIORITY`, not request order.
#[must_use]
pub fn arbitrate(mem_width: usize, requests: &[FireRequest]) -> Vec<Grant> {
    let mut pools = ResourcePools::new(mem_width);
    let mut grants = Vec::new();
    let last_lane = mem_width.saturating_sub(1);

    for &kind in &PRIORITY {
        let req = resources_for(kind);
        let restriction = lane_restriction(kind);

        for candidate in requests.iter().filter(|r| r.kind == kind) {
            if kind == FireKind::StaRetry {
                let collides = requests.iter().any(|other| {
                    other.kind == FireKind::StdIncoming
                        && other.lane != candidate.lane
                        && other.stq_idx.is_some()
                        && other.stq_idx == candidate.stq_idx
                });
                if collides {
                    continue;
                }
            }

            let lane = match restriction {
                LaneRestriction::Lane0Only => 0,
                LaneRestriction::LastLaneOnly => last_lane,
                LaneRestriction::Any => candidate.lane,
            };

            if pools.available(lane, req) {
                pools.consume(lane, req);
                trace!(?kind, lane, "arbitration grant");
                grants.push(Grant { kind, lane });
            }
        }
    }

    grants
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_priority_wins_contended_lane() {
        let requests = vec![
            FireRequest { kind: FireKind::BndLoad, lane: 1, stq_idx: None },
            FireRequest { kind: FireKind::LoadIncoming, lane: 1, stq_idx: None },
        ];
        // bnd_load is last-lane-only and load_incoming is higher priority
        // but on a different (its own) lane, so both can fire in a
        // 2-lane config; force contention by using mem_width=1.
        let grants = arbitrate(1, &requests);
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].kind, FireKind::LoadIncoming);
    }

    #[test]
    fn store_commit_forced_to_lane_zero() {
        let requests = vec![FireRequest { kind: FireKind::StoreCommit, lane: 1, stq_idx: None }];
        let grants = arbitrate(2, &requests);
        assert_eq!(grants[0].lane, 0);
    }

    #[test]
    fn last_lane_restriction_applies() {
        let requests = vec![FireRequest { kind: FireKind::Release, lane: 0, stq_idx: None }];
        let grants = arbitrate(3, &requests);
        assert_eq!(grants[0].lane, 2);
    }

    #[test]
    fn sta_retry_deferred_on_std_collision() {
        let requests = vec![
            FireRequest { kind: FireKind::StdIncoming, lane: 0, stq_idx: Some(5) },
            FireRequest { kind: FireKind::StaRetry, lane: 1, stq_idx: Some(5) },
        ];
        let grants = arbitrate(2, &requests);
        assert!(grants.iter().all(|g| g.kind != FireKind::StaRetry));
    }

    #[test]
    fn independent_lanes_both_fire() {
        let requests = vec![
            FireRequest { kind: FireKind::LoadIncoming, lane: 0, stq_idx: None },
            FireRequest { kind: FireKind::StdIncoming, lane: 1, stq_idx: None },
        ];
        let grants = arbitrate(2, &requests);
        assert_eq!(grants.len(), 2);
    }
}
