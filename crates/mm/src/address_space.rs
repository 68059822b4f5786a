//! Read-only views of an address space.
//!
//! The kernel mirrors every environment's own page directory and page tables into that
//! environment, read-only, at [`crate::layout::UVPT`]. [`AddressSpaceView`] is that mirror:
//! unprivileged code queries it to learn how its pages are mapped without making a
//! privileged call. An unmapped address is reported as absent, which is not an error.

use core::ops::Range;

use crate::{
    FrameNumber, PTSIZE, PAGE_SIZE, PageDirectory, PageEntry, PageFlags,
    PhysicalMemory, VirtualAddress,
};

/// A read-only view of one environment's mappings.
#[derive(Clone, Copy)]
pub struct AddressSpaceView<'a> {
    directory: &'a PageDirectory,
    memory: &'a PhysicalMemory,
}

impl<'a> AddressSpaceView<'a> {
    /// Creates a view over `directory`.
    pub fn new(directory: &'a PageDirectory, memory: &'a PhysicalMemory) -> Self {
        Self { directory, memory }
    }

    /// Returns whether a page table exists for the 4 MiB region containing `virt`.
    pub fn table_present(&self, virt: VirtualAddress) -> bool {
        self.directory.directory_entry(self.memory, virt).is_present()
    }

    /// Returns the present leaf entry for `virt`, or None when the page is absent.
    pub fn entry(&self, virt: VirtualAddress) -> Option<PageEntry> {
        self.directory.lookup(self.memory, virt)
    }

    /// Returns the capability set of the page containing `virt`.
    pub fn flags(&self, virt: VirtualAddress) -> Option<PageFlags> {
        self.entry(virt)?.flags()
    }

    /// Returns the frame backing the page containing `virt`.
    pub fn frame(&self, virt: VirtualAddress) -> Option<FrameNumber> {
        self.entry(virt)?.frame()
    }

    /// Iterates the present pages in `range`, skipping regions with no page table.
    ///
    /// The range bounds are rounded down to page boundaries.
    pub fn mapped_pages(&self, range: Range<VirtualAddress>) -> MappedPages<'a> {
        MappedPages {
            view: *self,
            next: range.start.align_down(PAGE_SIZE).as_u32() as u64,
            end: range.end.align_down(PAGE_SIZE).as_u32() as u64,
        }
    }
}

/// Iterator over the present pages of an [`AddressSpaceView`].
pub struct MappedPages<'a> {
    view: AddressSpaceView<'a>,
    next: u64,
    end: u64,
}

impl Iterator for MappedPages<'_> {
    type Item = (VirtualAddress, PageEntry);

    fn next(&mut self) -> Option<Self::Item> {
        while self.next < self.end {
            let virt = VirtualAddress::new(self.next as u32);
            if !self.view.table_present(virt) {
                // Skip to the next page table boundary.
                let table_span = PTSIZE as u64;
                self.next = (self.next / table_span + 1) * table_span;
                continue;
            }

            self.next += PAGE_SIZE as u64;
            if let Some(entry) = self.view.entry(virt) {
                return Some((virt, entry));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{UTOP, UXSTACKBOTTOM};

    #[test]
    fn absent_pages_are_not_errors() {
        let mut memory = PhysicalMemory::new(16);
        let dir = PageDirectory::new(&mut memory).unwrap();
        let view = AddressSpaceView::new(&dir, &memory);

        assert!(!view.table_present(VirtualAddress::new(0x0080_0000)));
        assert_eq!(view.flags(VirtualAddress::new(0x0080_0000)), None);
        assert_eq!(view.mapped_pages(VirtualAddress::new(0)..UTOP).count(), 0);
    }

    #[test]
    fn reports_flags_of_mapped_pages() {
        let mut memory = PhysicalMemory::new(16);
        let mut dir = PageDirectory::new(&mut memory).unwrap();
        let frame = memory.allocate(true).unwrap();
        let virt = VirtualAddress::new(0x0080_1000);
        dir.map(&mut memory, virt, frame, PageFlags::copy_on_write()).unwrap();

        let view = AddressSpaceView::new(&dir, &memory);
        assert!(view.table_present(virt));
        assert_eq!(view.flags(virt + 0x123), Some(PageFlags::copy_on_write()));
        assert_eq!(view.frame(virt), Some(frame));
        assert_eq!(view.flags(virt + PAGE_SIZE), None);
    }

    #[test]
    fn mapped_pages_walks_sparse_space_in_order() {
        let mut memory = PhysicalMemory::new(32);
        let mut dir = PageDirectory::new(&mut memory).unwrap();
        let addrs = [
            VirtualAddress::new(0x0000_0000),
            VirtualAddress::new(0x0080_3000),
            VirtualAddress::new(0x4000_0000),
            UXSTACKBOTTOM,
        ];
        for virt in addrs {
            let frame = memory.allocate(true).unwrap();
            dir.map(&mut memory, virt, frame, PageFlags::writable()).unwrap();
        }

        let view = AddressSpaceView::new(&dir, &memory);
        let seen: Vec<_> = view
            .mapped_pages(VirtualAddress::new(0)..UXSTACKBOTTOM)
            .map(|(virt, _)| virt)
            .collect();
        assert_eq!(seen, addrs[..3].to_vec());
    }
}
