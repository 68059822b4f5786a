//! Page directory and page table entries.

use crate::FrameNumber;

use super::flags::{PageFlags, PteBits};

/// A single page directory or page table entry.
///
/// The entry format:
/// - Bits 0-11: Flags
/// - Bits 12-31: Frame number of the mapped page or of the next-level table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(transparent)]
pub struct PageEntry(u32);

impl PageEntry {
    /// Frame number mask (bits 12-31).
    const ADDRESS_MASK: u32 = 0xFFFF_F000;

    /// Flag bits mask (bits 0-11).
    const FLAGS_MASK: u32 = 0xFFF;

    /// Creates a new entry pointing at `frame`.
    pub fn new(frame: FrameNumber, bits: PteBits) -> Self {
        let addr_bits = frame.start().as_u32() & Self::ADDRESS_MASK;
        Self(addr_bits | (bits.bits() & Self::FLAGS_MASK))
    }

    /// Creates a leaf entry mapping `frame` with the given capability set.
    pub fn leaf(frame: FrameNumber, flags: PageFlags) -> Self {
        Self::new(frame, flags.bits())
    }

    /// Returns the frame stored in this entry.
    ///
    /// Returns None if the entry is not present.
    pub fn frame(self) -> Option<FrameNumber> {
        if self.is_present() {
            Some(FrameNumber::new(((self.0 & Self::ADDRESS_MASK) >> 12) as usize))
        } else {
            None
        }
    }

    /// Returns the raw flag bits of this entry.
    pub fn bits(self) -> PteBits {
        PteBits::from_bits_retain(self.0 & Self::FLAGS_MASK)
    }

    /// Returns the capability set of a present leaf entry.
    ///
    /// Returns None if the entry is not present or carries an impossible combination.
    pub fn flags(self) -> Option<PageFlags> {
        if !self.is_present() {
            return None;
        }
        PageFlags::from_bits(self.bits()).ok()
    }

    /// Returns whether this entry is present (valid).
    pub fn is_present(self) -> bool {
        self.bits().contains(PteBits::PRESENT)
    }

    /// Returns the raw value of this entry.
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Creates an entry from a raw value.
    pub const fn from_u32(value: u32) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_frame_and_flags() {
        let entry = PageEntry::leaf(FrameNumber::new(0x1234), PageFlags::copy_on_write());
        assert_eq!(entry.as_u32(), 0x0123_4805);
        assert_eq!(entry.frame(), Some(FrameNumber::new(0x1234)));
        assert_eq!(entry.flags(), Some(PageFlags::copy_on_write()));
    }

    #[test]
    fn absent_entry_has_no_frame() {
        let entry = PageEntry::from_u32(0x7000 | PteBits::WRITABLE.bits());
        assert!(!entry.is_present());
        assert_eq!(entry.frame(), None);
        assert_eq!(entry.flags(), None);
    }
}
