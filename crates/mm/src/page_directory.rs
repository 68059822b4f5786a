//! Two-level page table management.
//!
//! This module provides the `PageDirectory` type, which owns the root table of an address
//! space and provides high-level operations for mapping and unmapping virtual addresses.
//! Both levels of tables live in emulated physical memory and hold frame references like
//! any other mapping.

use alloc::vec::Vec;

use thiserror::Error;

use crate::{
    AllocError, ENTRY_COUNT, FrameNumber, PageEntry, PageFlags, PhysicalAddress, PhysicalMemory,
    PteBits, VirtualAddress,
};

/// Errors returned when changing a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MapError {
    /// No frame was available for an intermediate page table.
    #[error("out of memory for page table")]
    NoMemory,
    /// The frame's reference count cannot record another mapping.
    #[error("too many mappings of one frame")]
    TooManyReferences,
    /// The virtual address was not page aligned.
    #[error("virtual address is not page aligned")]
    Unaligned,
}

impl From<AllocError> for MapError {
    fn from(err: AllocError) -> Self {
        match err {
            AllocError::OutOfMemory => Self::NoMemory,
            AllocError::TooManyReferences => Self::TooManyReferences,
        }
    }
}

/// Bits carried by every page directory entry; leaf entries decide the real permissions.
const DIRECTORY_BITS: PteBits = PteBits::PRESENT
    .union(PteBits::WRITABLE)
    .union(PteBits::USER);

/// Returns the physical address of entry `index` in the table held by `table`.
fn entry_address(table: FrameNumber, index: usize) -> PhysicalAddress {
    table.start() + (index * core::mem::size_of::<u32>()) as u32
}

/// The root of a two-level address space.
///
/// This type owns the page directory frame and walks the hierarchy for mapping and
/// unmapping, allocating page tables as needed.
#[derive(Debug)]
pub struct PageDirectory {
    /// The frame holding the page directory.
    root: FrameNumber,
}

impl PageDirectory {
    /// Allocates an empty page directory.
    pub fn new(memory: &mut PhysicalMemory) -> Result<Self, MapError> {
        let root = memory.allocate(true)?;
        memory.increment(root)?;
        Ok(Self { root })
    }

    /// Returns the frame holding the page directory.
    pub fn root(&self) -> FrameNumber {
        self.root
    }

    /// Returns the page directory entry covering `virt`.
    pub fn directory_entry(&self, memory: &PhysicalMemory, virt: VirtualAddress) -> PageEntry {
        PageEntry::from_u32(memory.read_u32(entry_address(self.root, virt.directory_index())))
    }

    /// Returns the present leaf entry for `virt`, if any.
    pub fn lookup(&self, memory: &PhysicalMemory, virt: VirtualAddress) -> Option<PageEntry> {
        let slot = self.walk(memory, virt)?;
        let entry = PageEntry::from_u32(memory.read_u32(slot));
        entry.is_present().then_some(entry)
    }

    /// Maps `frame` at the page-aligned `virt` with the given flags.
    ///
    /// Any existing mapping at `virt` is removed first. The new reference is taken before the
    /// old one is dropped, so re-inserting the frame already mapped at `virt` only rewrites
    /// the flags and never frees it. If the frame cannot take another reference the
    /// existing entry is left untouched.
    pub fn map(
        &mut self,
        memory: &mut PhysicalMemory,
        virt: VirtualAddress,
        frame: FrameNumber,
        flags: PageFlags,
    ) -> Result<(), MapError> {
        if !virt.is_page_aligned() {
            return Err(MapError::Unaligned);
        }

        let slot = self.walk_or_create(memory, virt)?;
        memory.increment(frame)?;

        let old = PageEntry::from_u32(memory.read_u32(slot));
        if let Some(old_frame) = old.frame() {
            memory.decrement(old_frame);
        }

        memory.write_u32(slot, PageEntry::leaf(frame, flags).as_u32());
        log::trace!("mapped {} -> frame {} {:?}", virt, frame, flags);
        Ok(())
    }

    /// Unmaps a page-aligned virtual address.
    ///
    /// Returns the frame that was mapped, or None if nothing was.
    pub fn unmap(
        &mut self,
        memory: &mut PhysicalMemory,
        virt: VirtualAddress,
    ) -> Result<Option<FrameNumber>, MapError> {
        if !virt.is_page_aligned() {
            return Err(MapError::Unaligned);
        }

        let Some(slot) = self.walk(memory, virt) else {
            return Ok(None);
        };
        let Some(frame) = PageEntry::from_u32(memory.read_u32(slot)).frame() else {
            return Ok(None);
        };

        memory.write_u32(slot, 0);
        memory.decrement(frame);
        log::trace!("unmapped {} (frame {})", virt, frame);
        Ok(Some(frame))
    }

    /// Lists every present leaf mapping, in ascending address order.
    pub fn mappings(&self, memory: &PhysicalMemory) -> Vec<(VirtualAddress, PageEntry)> {
        let mut found = Vec::new();
        for directory in 0..ENTRY_COUNT {
            let pde = PageEntry::from_u32(memory.read_u32(entry_address(self.root, directory)));
            let Some(table) = pde.frame() else {
                continue;
            };
            for index in 0..ENTRY_COUNT {
                let pte = PageEntry::from_u32(memory.read_u32(entry_address(table, index)));
                if pte.is_present() {
                    found.push((VirtualAddress::from_indices(directory, index), pte));
                }
            }
        }
        found
    }

    /// Releases every mapped page, every page table and the directory itself.
    pub fn destroy(self, memory: &mut PhysicalMemory) {
        for directory in 0..ENTRY_COUNT {
            let pde_slot = entry_address(self.root, directory);
            let Some(table) = PageEntry::from_u32(memory.read_u32(pde_slot)).frame() else {
                continue;
            };
            for index in 0..ENTRY_COUNT {
                let pte_slot = entry_address(table, index);
                if let Some(frame) = PageEntry::from_u32(memory.read_u32(pte_slot)).frame() {
                    memory.write_u32(pte_slot, 0);
                    memory.decrement(frame);
                }
            }
            memory.write_u32(pde_slot, 0);
            memory.decrement(table);
        }
        memory.decrement(self.root);
    }

    /// Walks the hierarchy to find the slot of the leaf entry for `virt`.
    ///
    /// Returns None if the page table covering `virt` does not exist.
    fn walk(&self, memory: &PhysicalMemory, virt: VirtualAddress) -> Option<PhysicalAddress> {
        let table = self.directory_entry(memory, virt).frame()?;
        Some(entry_address(table, virt.table_index()))
    }

    /// Walks the hierarchy, creating the page table if needed.
    fn walk_or_create(
        &mut self,
        memory: &mut PhysicalMemory,
        virt: VirtualAddress,
    ) -> Result<PhysicalAddress, MapError> {
        if let Some(slot) = self.walk(memory, virt) {
            return Ok(slot);
        }

        let table = memory.allocate(true)?;
        memory.increment(table)?;
        memory.write_u32(
            entry_address(self.root, virt.directory_index()),
            PageEntry::new(table, DIRECTORY_BITS).as_u32(),
        );
        log::trace!("page table for {} in frame {}", virt, table);
        Ok(entry_address(table, virt.table_index()))
    }
}
