//! User-visible virtual memory layout.
//!
//! ```text
//!   ULIM        0xef80_0000  -- top of user-readable memory
//!   UVPT        0xef40_0000  -- read-only page table mirror (one PTSIZE)
//!   UTOP        0xeec0_0000  -- top of user-mappable memory
//!   UXSTACKTOP  0xeec0_0000  -- one page of user exception stack below
//!               0xeebf_f000  -- empty guard page
//!   USTACKTOP   0xeebf_e000  -- normal user stack grows down from here
//!   ...
//!   UTEXT       0x0080_0000  -- program text
//!   PFTEMP      0x007f_f000  -- scratch page used by the copy-on-write fault handler
//!   UTEMP       0x0040_0000  -- temporary user mappings
//! ```

use crate::{PTSIZE, PAGE_SIZE, VirtualAddress};

/// Top of memory a user environment may read.
pub const ULIM: VirtualAddress = VirtualAddress::new(0xEF80_0000);

/// Base of the read-only page table mirror.
pub const UVPT: VirtualAddress = VirtualAddress::new(ULIM.as_u32() - PTSIZE);

/// Top of memory a user environment may map pages into.
pub const UTOP: VirtualAddress = VirtualAddress::new(0xEEC0_0000);

/// Top of the one-page user exception stack.
pub const UXSTACKTOP: VirtualAddress = UTOP;

/// Bottom of the one-page user exception stack.
pub const UXSTACKBOTTOM: VirtualAddress = VirtualAddress::new(UXSTACKTOP.as_u32() - PAGE_SIZE);

/// Top of the normal user stack, leaving a guard page below the exception stack.
pub const USTACKTOP: VirtualAddress = VirtualAddress::new(UTOP.as_u32() - 2 * PAGE_SIZE);

/// Start of program text.
pub const UTEXT: VirtualAddress = VirtualAddress::new(2 * PTSIZE);

/// Region for temporary user mappings.
pub const UTEMP: VirtualAddress = VirtualAddress::new(PTSIZE);

/// Scratch page for the copy-on-write fault handler.
pub const PFTEMP: VirtualAddress = VirtualAddress::new(UTEMP.as_u32() + PTSIZE - PAGE_SIZE);

/// Returns whether `va` may carry a user page mapping.
#[inline]
pub const fn is_user_mappable(va: VirtualAddress) -> bool {
    va.as_u32() < UTOP.as_u32()
}

/// Returns whether `va` lies in the exception stack page.
#[inline]
pub const fn is_exception_stack(va: VirtualAddress) -> bool {
    va.as_u32() >= UXSTACKBOTTOM.as_u32() && va.as_u32() < UXSTACKTOP.as_u32()
}
