//! CSR counters and per-run statistics.
//!
//! `spec.md` §6 names nine counter CSRs updated strictly at dequeue
//! (signed/unsigned instruction counts, bounds-store/clear/search counts,
//! memory request/size counts, cache hit/miss counts). This struct carries
//! those plus the observability-only aggregates described in
//! `SPEC_FULL.md` §10.5 (cycles, dispatch counts, forwards, order-fails,
//! nacks, retries) that don't change dispatch/fire/commit semantics.

/// Per-run LSU statistics, loaded from a config payload on `initWYFY` and
/// otherwise only ever incremented at dequeue (`spec.md` §9).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LsuStats {
    /// Cycles elapsed (`Lsu::tick` calls).
    pub cycles: u64,

    /// Loads dispatched into the LDQ.
    pub loads_dispatched: u64,
    /// Stores dispatched into the STQ.
    pub stores_dispatched: u64,

    /// Signed-load instructions whose MCQ bounds check reached `m_done`.
    pub num_signed_inst: u64,
    /// Unsigned-load/store instructions whose MCQ bounds check reached
    /// `m_done`.
    pub num_unsigned_inst: u64,
    /// BDQ entries that completed a bounds-store (`BoundsOp::Store`).
    pub num_bndstr: u64,
    /// BDQ entries that completed a bounds-clear (`BoundsOp::Clear`).
    pub num_bndclr: u64,
    /// BDQ entries that completed a bounds-search (`BoundsOp::Search`).
    pub num_bndsrch: u64,

    /// Total DCache requests issued (load/store/bounds probes/stores).
    pub mem_req: u64,
    /// Sum of access sizes (bytes) across all DCache requests.
    pub mem_size: u64,
    /// DCache responses that hit.
    pub cache_hit: u64,
    /// DCache responses that nacked.
    pub cache_miss: u64,

    /// Loads satisfied by store-to-load forwarding.
    pub forwards_taken: u64,
    /// Memory-ordering violations raised by LCAM.
    pub order_fails: u64,
    /// Nacks observed (load or store).
    pub nacks_observed: u64,
    /// Retries issued (load_retry + sta_retry + load_wakeup).
    pub retries_issued: u64,
    /// MCQ entries that reached `m_fail`.
    pub bounds_check_failures: u64,
    /// BDQ entries that reached `b_fail`.
    pub occupancy_check_failures: u64,
}

impl LsuStats {
    /// Creates a zeroed statistics block, as on reset or `initWYFY`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one elapsed cycle.
    pub fn tick(&mut self) {
        self.cycles += 1;
    }

    /// Instructions retired through the bounds co-engine
    /// (`num_signed_inst + num_unsigned_inst`).
    #[must_use]
    pub fn bounds_checked_insts(&self) -> u64 {
        self.num_signed_inst + self.num_unsigned_inst
    }

    /// Fraction of DCache requests that hit, or `0.0` if none were issued.
    #[must_use]
    pub fn cache_hit_rate(&self) -> f64 {
        if self.mem_req == 0 {
            0.0
        } else {
            self.cache_hit as f64 / self.mem_req as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_hit_rate_empty_is_zero() {
        assert_eq!(LsuStats::new().cache_hit_rate(), 0.0);
    }

    #[test]
    fn cache_hit_rate_computes() {
        let stats = LsuStats {
            mem_req: 4,
            cache_hit: 3,
            ..LsuStats::default()
        };
        assert!((stats.cache_hit_rate() - 0.75).abs() < f64::EPSILON);
    }
}
