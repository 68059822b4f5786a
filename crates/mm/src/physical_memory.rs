//! Emulated physical memory and frame allocation.
//!
//! Physical memory is a flat byte buffer divided into `PAGE_SIZE` frames, with a metadata
//! [`Frame`] per frame. Free frames sit on a free list; allocated frames are shared by
//! reference count between every page table entry that maps them.

use alloc::{vec, vec::Vec};

use thiserror::Error;

use crate::{Frame, FrameNumber, FrameState, PAGE_SIZE, PhysicalAddress};

/// Errors that can occur during physical memory allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// Every frame is in use.
    #[error("out of physical memory")]
    OutOfMemory,
    /// The frame is already mapped as many times as its reference count can record.
    #[error("too many references to frame")]
    TooManyReferences,
}

/// Emulated physical memory with a frame allocator.
pub struct PhysicalMemory {
    /// The underlying memory buffer.
    memory: Vec<u8>,
    /// Metadata for every frame.
    frames: Vec<Frame>,
    /// Frames available for allocation; the next one handed out is at the end.
    free_list: Vec<FrameNumber>,
}

impl PhysicalMemory {
    /// Creates physical memory with `frame_count` frames.
    ///
    /// Frame 0 is reserved so that a zero frame number never names a live page.
    pub fn new(frame_count: usize) -> Self {
        let mut frames: Vec<Frame> = (0..frame_count).map(|_| Frame::default()).collect();
        if let Some(first) = frames.first_mut() {
            first.set_state(FrameState::Reserved);
        }

        // Reverse order so allocation hands out ascending frame numbers.
        let free_list = (1..frame_count).rev().map(FrameNumber::new).collect();

        log::debug!(
            "emulated physical memory: {} frames ({} KiB)",
            frame_count,
            frame_count * PAGE_SIZE as usize / 1024
        );

        Self {
            memory: vec![0u8; frame_count * PAGE_SIZE as usize],
            frames,
            free_list,
        }
    }

    /// Allocates one frame, optionally filled with zeroes.
    ///
    /// The frame starts with a reference count of zero; mapping it takes the first reference.
    pub fn allocate(&mut self, zero: bool) -> Result<FrameNumber, AllocError> {
        let frame = self.free_list.pop().ok_or(AllocError::OutOfMemory)?;
        let meta = &mut self.frames[frame.as_usize()];
        debug_assert_eq!(meta.state(), FrameState::Free);
        meta.set_state(FrameState::Allocated);

        if zero {
            self.page_mut(frame).fill(0);
        }

        log::trace!("allocated frame {}", frame);
        Ok(frame)
    }

    /// Returns an unreferenced frame to the free list.
    ///
    /// # Panics
    /// Panics if the frame is reserved, not allocated, or still referenced.
    pub fn deallocate(&mut self, frame: FrameNumber) {
        let meta = &mut self.frames[frame.as_usize()];
        assert_ne!(
            meta.state(),
            FrameState::Reserved,
            "cannot free reserved frame {frame}"
        );
        assert_eq!(
            meta.state(),
            FrameState::Allocated,
            "double free of frame {frame}"
        );
        assert_eq!(meta.ref_count(), 0, "freeing referenced frame {frame}");

        meta.set_state(FrameState::Free);
        self.free_list.push(frame);
        log::trace!("freed frame {}", frame);
    }

    /// Takes a reference to an allocated frame.
    pub fn increment(&mut self, frame: FrameNumber) -> Result<(), AllocError> {
        if self.frames[frame.as_usize()].get() {
            Ok(())
        } else {
            log::warn!("frame {} reference count saturated", frame);
            Err(AllocError::TooManyReferences)
        }
    }

    /// Drops a reference to a frame, freeing it when none remain.
    pub fn decrement(&mut self, frame: FrameNumber) {
        if self.frames[frame.as_usize()].put() == 0 {
            self.deallocate(frame);
        }
    }

    /// Returns the reference count of a frame.
    pub fn ref_count(&self, frame: FrameNumber) -> u16 {
        self.frames
            .get(frame.as_usize())
            .map_or(0, |meta| meta.ref_count())
    }

    /// Returns the number of frames available for allocation.
    pub fn free_frames(&self) -> usize {
        self.free_list.len()
    }

    /// Returns the contents of a frame.
    pub fn page(&self, frame: FrameNumber) -> &[u8] {
        let start = frame.start().as_usize();
        &self.memory[start..start + PAGE_SIZE as usize]
    }

    /// Returns the contents of a frame for writing.
    pub fn page_mut(&mut self, frame: FrameNumber) -> &mut [u8] {
        let start = frame.start().as_usize();
        &mut self.memory[start..start + PAGE_SIZE as usize]
    }

    /// Reads a little-endian word.
    pub fn read_u32(&self, addr: PhysicalAddress) -> u32 {
        let start = addr.as_usize();
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.memory[start..start + 4]);
        u32::from_le_bytes(word)
    }

    /// Writes a little-endian word.
    pub fn write_u32(&mut self, addr: PhysicalAddress, value: u32) {
        let start = addr.as_usize();
        self.memory[start..start + 4].copy_from_slice(&value.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_zero_is_never_allocated() {
        let mut memory = PhysicalMemory::new(4);
        let mut handed_out = Vec::new();
        while let Ok(frame) = memory.allocate(false) {
            handed_out.push(frame);
        }
        assert_eq!(
            handed_out,
            vec![FrameNumber::new(1), FrameNumber::new(2), FrameNumber::new(3)]
        );
        assert_eq!(memory.allocate(true), Err(AllocError::OutOfMemory));
    }

    #[test]
    fn last_reference_frees_frame() {
        let mut memory = PhysicalMemory::new(8);
        let frame = memory.allocate(true).unwrap();
        memory.increment(frame).unwrap();
        memory.increment(frame).unwrap();
        assert_eq!(memory.free_frames(), 6);

        memory.decrement(frame);
        assert_eq!(memory.ref_count(frame), 1);
        assert_eq!(memory.free_frames(), 6);

        memory.decrement(frame);
        assert_eq!(memory.ref_count(frame), 0);
        assert_eq!(memory.free_frames(), 7);
    }

    #[test]
    fn zeroed_allocation_clears_stale_contents() {
        let mut memory = PhysicalMemory::new(2);
        let frame = memory.allocate(false).unwrap();
        memory.page_mut(frame).fill(0xAA);
        memory.deallocate(frame);

        let again = memory.allocate(true).unwrap();
        assert_eq!(again, frame);
        assert!(memory.page(again).iter().all(|&b| b == 0));
    }

    #[test]
    fn saturated_reference_count_is_an_error() {
        let mut memory = PhysicalMemory::new(2);
        let frame = memory.allocate(false).unwrap();
        for _ in 0..u16::MAX {
            memory.increment(frame).unwrap();
        }
        assert_eq!(memory.increment(frame), Err(AllocError::TooManyReferences));
        assert_eq!(memory.ref_count(frame), u16::MAX);
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn double_free_panics() {
        let mut memory = PhysicalMemory::new(2);
        let frame = memory.allocate(false).unwrap();
        memory.deallocate(frame);
        memory.deallocate(frame);
    }
}
