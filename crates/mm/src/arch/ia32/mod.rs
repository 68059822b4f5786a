//! Two-level, 32-bit paging.
//!
//! Address layout:
//! - Bits 0-11: Page offset (4 KiB pages)
//! - Bits 12-21: Page table index
//! - Bits 22-31: Page directory index

mod entry;
mod flags;

pub use entry::PageEntry;
pub use flags::{FlagsError, PageFlags, Protection, PteBits};

/// Page size in bytes.
pub const PAGE_SIZE: u32 = 4096;

/// Number of entries in a page directory or page table.
pub const ENTRY_COUNT: usize = 1024;

/// Bytes mapped by one page directory entry (4 MiB).
pub const PTSIZE: u32 = PAGE_SIZE * ENTRY_COUNT as u32;

/// Shift of the page table index within a virtual address.
pub const PTX_SHIFT: usize = 12;

/// Shift of the page directory index within a virtual address.
pub const PDX_SHIFT: usize = 22;

/// Returns the page table index for a given virtual address at the specified level.
///
/// - Level 0: Bits 12-21 (page table)
/// - Level 1: Bits 22-31 (page directory)
#[inline]
pub const fn page_index(address: u32, level: usize) -> usize {
    let shift = match level {
        0 => PTX_SHIFT,
        1 => PDX_SHIFT,
        _ => panic!("level out of range for two-level paging (0-1)"),
    };
    ((address as usize) >> shift) & (ENTRY_COUNT - 1)
}
