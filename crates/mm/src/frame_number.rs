//! Physical frame numbers.

use core::fmt;

use crate::{PhysicalAddress, arch::PAGE_SIZE};

/// Index of a physical frame: its start address divided by `PAGE_SIZE`.
///
/// Page table entries store frames in this form, shifted into the upper 20 bits.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct FrameNumber(u32);

impl FrameNumber {
    #[inline]
    pub const fn new(number: usize) -> Self {
        Self(number as u32)
    }

    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Returns the physical address of the first byte of this frame.
    #[inline]
    pub const fn start(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 * PAGE_SIZE)
    }
}

impl fmt::Debug for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FrameNumber({})", self.0)
    }
}

impl fmt::Display for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_starts_at_its_page() {
        let frame = FrameNumber::new(3);
        assert_eq!(frame.start(), PhysicalAddress::new(0x3000));
        assert_eq!(frame.to_string(), "3");
    }
}
