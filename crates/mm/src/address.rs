//! Address types for physical and virtual memory management.
//!
//! This module provides wrappers around the 32-bit physical and virtual addresses of the
//! machine, with methods to manipulate them for page table operations.

use core::fmt;
use core::ops::{Add, Sub};

use crate::arch;

/// Macro to define common address type functionality.
///
/// This macro generates the basic structure and methods common to both physical
/// and virtual address types, reducing code duplication.
macro_rules! impl_address_common {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(u32);

        impl $name {
            /// Creates a new address.
            #[inline]
            pub const fn new(addr: u32) -> Self {
                Self(addr)
            }

            /// Returns the raw address value.
            #[inline]
            pub const fn as_u32(self) -> u32 {
                self.0
            }

            /// Returns the raw address value widened to `usize`.
            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0 as usize
            }

            /// Checks if the address is aligned to the given alignment.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[inline]
            pub const fn is_aligned(self, align: u32) -> bool {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                self.0 & (align - 1) == 0
            }

            /// Checks if the address sits on a page boundary.
            #[inline]
            pub const fn is_page_aligned(self) -> bool {
                self.is_aligned(arch::PAGE_SIZE)
            }

            /// Aligns the address down to the given alignment.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[inline]
            pub const fn align_down(self, align: u32) -> Self {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                Self(self.0 & !(align - 1))
            }

            /// Returns the offset of this address within its page.
            #[inline]
            pub const fn page_offset(self) -> usize {
                (self.0 & (arch::PAGE_SIZE - 1)) as usize
            }

            /// Adds `rhs` bytes, returning `None` on overflow.
            #[inline]
            pub const fn checked_add(self, rhs: u32) -> Option<Self> {
                match self.0.checked_add(rhs) {
                    Some(raw) => Some(Self(raw)),
                    None => None,
                }
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#010x})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#010x}", self.0)
            }
        }

        impl From<u32> for $name {
            #[inline]
            fn from(addr: u32) -> Self {
                Self::new(addr)
            }
        }

        impl Add<u32> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: u32) -> Self::Output {
                Self::new(self.0 + rhs)
            }
        }

        impl Sub<u32> for $name {
            type Output = Self;

            #[inline]
            fn sub(self, rhs: u32) -> Self::Output {
                Self::new(self.0 - rhs)
            }
        }
    };
}

impl_address_common!(
    PhysicalAddress,
    "A physical memory address.\n\n\
     Physical addresses index the emulated physical memory of the machine."
);

impl_address_common!(
    VirtualAddress,
    "A virtual memory address.\n\n\
     Virtual addresses are translated through an environment's two-level page directory."
);

impl VirtualAddress {
    /// Builds the address of the first byte covered by the given directory and table indices.
    #[inline]
    pub const fn from_indices(directory: usize, table: usize) -> Self {
        Self(((directory << arch::PDX_SHIFT) | (table << arch::PTX_SHIFT)) as u32)
    }

    /// Returns the page directory index for this address.
    #[inline]
    pub const fn directory_index(self) -> usize {
        arch::page_index(self.0, 1)
    }

    /// Returns the page table index for this address.
    #[inline]
    pub const fn table_index(self) -> usize {
        arch::page_index(self.0, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_into_directory_and_table_indices() {
        let va = VirtualAddress::new(0x0080_3123);
        assert_eq!(va.directory_index(), 2);
        assert_eq!(va.table_index(), 3);
        assert_eq!(va.page_offset(), 0x123);
        assert_eq!(VirtualAddress::from_indices(2, 3), va.align_down(arch::PAGE_SIZE));
    }
}
