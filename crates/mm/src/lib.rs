#![cfg_attr(not(test), no_std)]

//! # Pith Memory Manager
//!
//! Low-level memory management for the Pith kernel and its user library. It provides:
//!
//! - Address and frame number types for a paged, 32-bit addressable machine.
//! - The page-flag capability set, which cannot express a writable copy-on-write page.
//! - Emulated physical memory with per-frame reference counts.
//! - Two-level page directories stored in that memory.
//! - A read-only view over an address space that unprivileged code may query.

extern crate alloc;

mod address;
mod address_space;
mod arch;
mod frame;
mod frame_number;
pub mod layout;
mod page_directory;
mod physical_memory;

pub use address::{PhysicalAddress, VirtualAddress};
pub use address_space::{AddressSpaceView, MappedPages};
pub use arch::{
    ENTRY_COUNT, FlagsError, PAGE_SIZE, PTSIZE, PageEntry, PageFlags, Protection, PteBits,
};
use frame::{Frame, FrameState};
pub use frame_number::FrameNumber;
pub use page_directory::{MapError, PageDirectory};
pub use physical_memory::{AllocError, PhysicalMemory};
