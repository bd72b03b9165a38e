//! Age-priority encoding: picking the oldest (or youngest-older) circular
//! buffer slot satisfying a predicate.
//!
//! `spec.md` §4.2 and §9 describe this twice: once as "from `head`, scan
//! circularly and return the oldest slot whose predicate holds" (used for
//! every wakeup/retry index), and once as a doubled-bitvector priority scan
//! for forwarding age selection (§4.5, §9: "concatenate masked-by-age with
//! un-masked and return the last set bit"). Both are implemented here as
//! the same primitive: `oldest_satisfying` linearizes a ring starting at
//! `head` and returns the first hit, which is exactly a single priority
//! scan over a doubled bit vector would produce.

/// Scans a ring buffer of length `capacity`, starting at `head`, and
/// returns the index of the oldest slot (i.e. nearest to `head`) for which
/// `pred` holds. Examines at most `capacity` slots.
#[must_use]
pub fn oldest_satisfying(capacity: usize, head: usize, mut pred: impl FnMut(usize) -> bool) -> Option<usize> {
    if capacity == 0 {
        return None;
    }
    for step in 0..capacity {
        let idx = (head + step) % capacity;
        if pred(idx) {
            return Some(idx);
        }
    }
    None
}

/// Selects the youngest store that is still older than a given load, from
/// the load's `ldst_addr_matches` bitmask and its `st_dep_mask` (`spec.md`
/// §4.5: "feed `ldst_addr_matches` and `youngest_stq_idx` to the Forwarding
/// Age Logic; it returns the youngest store index that is still older than
/// the load").
///
/// Implemented as the doubled-bitvector scan the spec names: `matches` is
/// masked by `st_dep_mask` (stores older than the load), then scanned
/// starting just after `youngest_stq_idx` wrapping around — equivalent to
/// concatenating the age-masked vector with itself and taking the last set
/// bit, but without materializing `2 * capacity` bits.
#[must_use]
pub fn youngest_older_store(capacity: usize, matches: u64, st_dep_mask: u64, youngest_stq_idx: usize) -> Option<usize> {
    if capacity == 0 {
        return None;
    }
    let eligible = matches & st_dep_mask;
    if eligible == 0 {
        return None;
    }
    // Walk backward from youngest_stq_idx (exclusive) toward head, wrapping
    // once; the first eligible bit found is the youngest eligible store.
    for step in 1..=capacity {
        let idx = (youngest_stq_idx + capacity - step) % capacity;
        if eligible & (1u64 << idx) != 0 {
            return Some(idx);
        }
    }
    None
}

/// Distance of `idx` from `head` within a ring of `capacity` slots, used to
/// compare two indices' relative age without signed wraparound arithmetic.
#[must_use]
pub fn ring_age(capacity: usize, head: usize, idx: usize) -> usize {
    (idx + capacity - head) % capacity
}

/// Whether `a` is strictly older than `b`, measured from `head`.
#[must_use]
pub fn is_older(capacity: usize, head: usize, a: usize, b: usize) -> bool {
    ring_age(capacity, head, a) < ring_age(capacity, head, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_satisfying_wraps_from_head() {
        let valid = [false, true, true, false];
        let found = oldest_satisfying(4, 2, |i| valid[i]);
        assert_eq!(found, Some(2));
    }

    #[test]
    fn oldest_satisfying_skips_unmatched_and_wraps() {
        let valid = [true, false, false, false];
        let found = oldest_satisfying(4, 2, |i| valid[i]);
        assert_eq!(found, Some(0));
    }

    #[test]
    fn oldest_satisfying_none_when_no_match() {
        assert_eq!(oldest_satisfying(4, 0, |_| false), None);
    }

    #[test]
    fn youngest_older_store_picks_nearest_below_youngest() {
        // Stores at 1 and 3 both match and are older; youngest_stq_idx=4
        // (one past 3) should pick 3.
        let matches = 0b1010;
        let st_dep_mask = 0b1010;
        assert_eq!(youngest_older_store(8, matches, st_dep_mask, 4), Some(3));
    }

    #[test]
    fn youngest_older_store_wraps_around_ring() {
        // youngest_stq_idx=1, only store at 6 matches: must wrap backward
        // through 0 to reach 6.
        let matches = 0b0100_0000;
        let st_dep_mask = 0b0100_0000;
        assert_eq!(youngest_older_store(8, matches, st_dep_mask, 1), Some(6));
    }

    #[test]
    fn youngest_older_store_respects_dep_mask() {
        let matches = 0b0010;
        let st_dep_mask = 0b0000;
        assert_eq!(youngest_older_store(8, matches, st_dep_mask, 4), None);
    }

    #[test]
    fn is_older_respects_wraparound_from_head() {
        assert!(is_older(4, 2, 2, 3));
        assert!(is_older(4, 2, 3, 0));
        assert!(!is_older(4, 2, 0, 2));
    }
}
