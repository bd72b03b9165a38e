//! Hash-based Bounds Table (HBT) addressing and a reference in-memory model.
//!
//! The HBT itself lives behind the data cache (it's memory-resident, per
//! the glossary) and is therefore an external collaborator like the rest of
//! the memory system. This module provides two things:
//! 1. The bit-exact address formula from `spec.md` §6, shared by MCQ and
//!    BDQ.
//! 2. [`BoundsTable`], a small in-memory reference model of the table
//!    suitable for integration tests and the CLI demo — not a claim about
//!    how production HBT storage works, any more than the reference
//!    simulator's DRAM `MemoryController` claims to model real silicon
//!    timing beyond what the tests need.

use std::collections::HashMap;

use crate::common::{PhysAddr, VirtAddr};

/// Computes the physical probe address for way `count` of the row keyed by
/// `pac` (`spec.md` §6: `hbt_base_addr | (PAC << 2) | (count << 3)`).
///
/// Open question 2 in `spec.md` §9 resolves the bounds-*store* address
/// typo to the same `|`-combination used here, so this one formula serves
/// both MCQ probes and BDQ probes/stores.
#[must_use]
pub fn hbt_addr(hbt_base_addr: u64, pac: u64, count: u32) -> PhysAddr {
    PhysAddr::new(hbt_base_addr | (pac << 2) | (u64::from(count) << 3))
}

/// Extracts the PAC from a virtual address and computes its probe address
/// for way `count` in one step.
#[must_use]
pub fn hbt_addr_for(hbt_base_addr: u64, vaddr: VirtAddr, count: u32) -> PhysAddr {
    hbt_addr(hbt_base_addr, vaddr.pac(), count)
}

/// A bounds descriptor as stored in one HBT way.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BoundsDescriptor {
    /// Lower bound (inclusive) of the authenticated allocation.
    pub lower: u64,
    /// Upper bound (exclusive) of the authenticated allocation.
    pub upper: u64,
    /// Whether this way currently holds a live descriptor.
    pub occupied: bool,
}

impl BoundsDescriptor {
    /// Packs the descriptor into the 64-bit word the DCache would carry on
    /// `resp.data` for a bounds probe.
    #[must_use]
    pub fn pack(self) -> u64 {
        if !self.occupied {
            return 0;
        }
        // Reference packing: lower in the low 32 bits, upper in the high
        // 32, matching how a single 8-byte HBT slot holds both bounds for
        // pointers within a 4 GiB allocation.
        (self.lower & 0xFFFF_FFFF) | ((self.upper & 0xFFFF_FFFF) << 32)
    }

    /// Unpacks a 64-bit HBT slot payload into bounds, treating an all-zero
    /// word as unoccupied.
    #[must_use]
    pub fn unpack(word: u64) -> Self {
        if word == 0 {
            return Self::default();
        }
        Self {
            lower: word & 0xFFFF_FFFF,
            upper: (word >> 32) & 0xFFFF_FFFF,
            occupied: true,
        }
    }
}

/// A minimal in-memory reference model of the Hash-based Bounds Table,
/// addressed exactly as [`hbt_addr`] computes: one row per PAC, up to
/// `num_way` descriptor slots per row.
#[derive(Clone, Debug, Default)]
pub struct BoundsTable {
    rows: HashMap<u64, Vec<BoundsDescriptor>>,
    num_way: usize,
}

impl BoundsTable {
    /// Creates an empty table with `num_way` ways per row.
    #[must_use]
    pub fn new(num_way: usize) -> Self {
        Self {
            rows: HashMap::new(),
            num_way,
        }
    }

    /// Reads the descriptor at `(pac, way)`, as a DCache bounds-probe
    /// response would.
    #[must_use]
    pub fn probe(&self, pac: u64, way: usize) -> BoundsDescriptor {
        self.rows
            .get(&pac)
            .and_then(|ways| ways.get(way).copied())
            .unwrap_or_default()
    }

    /// Writes a descriptor at `(pac, way)`, as a BDQ bounds-store would.
    pub fn store(&mut self, pac: u64, way: usize, descriptor: BoundsDescriptor) {
        let row = self.rows.entry(pac).or_insert_with(|| {
            vec![BoundsDescriptor::default(); self.num_way.max(way + 1)]
        });
        if row.len() <= way {
            row.resize(way + 1, BoundsDescriptor::default());
        }
        row[way] = descriptor;
    }

    /// Clears (invalidates) the descriptor at `(pac, way)`.
    pub fn clear(&mut self, pac: u64, way: usize) {
        self.store(pac, way, BoundsDescriptor::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addr_formula_matches_spec_example() {
        // spec.md §8 scenario 4: vaddr = 0x0000_2000_0000_1000, PAC = 1,
        // probe address = hbt_base_addr | 0x4 at way 0.
        let vaddr = VirtAddr::new(0x0000_2000_0000_1000);
        assert_eq!(vaddr.pac(), 0x01);
        let addr = hbt_addr_for(0x1_0000, vaddr, 0);
        assert_eq!(addr.val(), 0x1_0000 | 0x4);
    }

    #[test]
    fn addr_formula_increments_by_way() {
        let a0 = hbt_addr(0x1_0000, 3, 0);
        let a1 = hbt_addr(0x1_0000, 3, 1);
        assert_eq!(a1.val() - a0.val(), 8);
    }

    #[test]
    fn descriptor_pack_roundtrip() {
        let d = BoundsDescriptor {
            lower: 0x1000,
            upper: 0x2000,
            occupied: true,
        };
        assert_eq!(BoundsDescriptor::unpack(d.pack()), d);
    }

    #[test]
    fn unoccupied_slot_is_default() {
        let table = BoundsTable::new(4);
        assert_eq!(table.probe(7, 2), BoundsDescriptor::default());
    }

    #[test]
    fn store_then_probe_roundtrips() {
        let mut table = BoundsTable::new(4);
        let d = BoundsDescriptor {
            lower: 10,
            upper: 20,
            occupied: true,
        };
        table.store(9, 1, d);
        assert_eq!(table.probe(9, 1), d);
        assert_eq!(table.probe(9, 0), BoundsDescriptor::default());
    }
}
