//! Virtual and physical address types, and the byte-mask/PAC helpers the
//! LCAM and bounds co-engine rely on.
//!
//! Strong types keep virtual and physical address spaces from being mixed
//! accidentally, the same separation the reference simulator draws between
//! `VirtAddr` and `PhysAddr`.

/// A virtual address as produced by the AGU, still carrying PAC tag bits in
/// its upper bits until sign-extended by [`VirtAddr::strip_pac`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtAddr(pub u64);

/// A physical address, either DTLB-translated or an HBT probe address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysAddr(pub u64);

/// Bit position above which a 64-bit pointer carries its Pointer
/// Authentication Code (PAC) rather than address bits.
pub const PAC_SHIFT: u32 = 45;

impl VirtAddr {
    /// Creates a new virtual address from a raw 64-bit value.
    #[inline(always)]
    pub fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Returns the raw 64-bit value, PAC bits included.
    #[inline(always)]
    pub fn val(self) -> u64 {
        self.0
    }

    /// Masks off the PAC tag the way the fire stage does for incoming
    /// addresses: `(addr << 19) >> 19`, i.e. sign-extend from bit 44.
    #[inline(always)]
    pub fn strip_pac(self) -> Self {
        Self(((self.0 << 19) as i64 >> 19) as u64)
    }

    /// Extracts the Pointer Authentication Code: the bits at or above
    /// [`PAC_SHIFT`].
    #[inline(always)]
    pub fn pac(self) -> u64 {
        self.0 >> PAC_SHIFT
    }

    /// The cache-block address (64-byte lines) used for release-search
    /// address comparisons.
    #[inline(always)]
    pub fn block_addr(self) -> u64 {
        self.0 & !0x3f
    }

    /// The double-word (8-byte aligned) address used for LCAM overlap
    /// comparisons.
    #[inline(always)]
    pub fn dword_addr(self) -> u64 {
        self.0 & !0x7
    }
}

impl PhysAddr {
    /// Creates a new physical address from a raw 64-bit value.
    #[inline(always)]
    pub fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Returns the raw 64-bit value.
    #[inline(always)]
    pub fn val(self) -> u64 {
        self.0
    }

    /// The cache-block address (64-byte lines).
    #[inline(always)]
    pub fn block_addr(self) -> u64 {
        self.0 & !0x3f
    }

    /// The double-word (8-byte aligned) address.
    #[inline(always)]
    pub fn dword_addr(self) -> u64 {
        self.0 & !0x7
    }

    /// Byte offset within the enclosing double-word (0-7).
    #[inline(always)]
    pub fn dword_offset(self) -> u32 {
        (self.0 & 0x7) as u32
    }
}

/// Generates the byte mask for an access of `size` bytes starting at
/// `addr`, used by LCAM to compare overlapping byte ranges within a
/// double-word (`GenByteMask` in spec.md §4.5).
///
/// # Panics
///
/// Panics if `size` is not 1, 2, 4, or 8 — the only widths the LSU issues.
#[must_use]
pub fn gen_byte_mask(addr: PhysAddr, size: u32) -> u8 {
    assert!(
        matches!(size, 1 | 2 | 4 | 8),
        "unsupported access size: {size}"
    );
    let offset = addr.dword_offset();
    let ones: u8 = if size >= 8 {
        0xff
    } else {
        ((1u16 << size) - 1) as u8
    };
    ones.checked_shl(offset).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_pac_sign_extends() {
        let tagged = VirtAddr::new(0x01AB_8000_0000_1000);
        assert_eq!(tagged.strip_pac().val(), 0xFFFF_8000_0000_1000);
    }

    #[test]
    fn strip_pac_is_identity_for_canonical_low_addr() {
        let addr = VirtAddr::new(0x0000_0000_0010_0000);
        assert_eq!(addr.strip_pac().val(), addr.val());
    }

    #[test]
    fn pac_extracts_upper_bits() {
        let addr = VirtAddr::new(0x0000_2000_0000_1000);
        assert_eq!(addr.pac(), 0x01);
    }

    #[test]
    fn byte_mask_word_aligned() {
        let mask = gen_byte_mask(PhysAddr::new(0x1000), 4);
        assert_eq!(mask, 0b0000_1111);
    }

    #[test]
    fn byte_mask_byte_at_offset() {
        let mask = gen_byte_mask(PhysAddr::new(0x1005), 1);
        assert_eq!(mask, 0b0010_0000);
    }

    #[test]
    fn byte_mask_double_spans_all() {
        let mask = gen_byte_mask(PhysAddr::new(0x1000), 8);
        assert_eq!(mask, 0xff);
    }
}
