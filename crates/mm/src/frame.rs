//! Physical frame metadata.

/// Allocation state of a frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FrameState {
    /// On the free list.
    #[default]
    Free,
    /// Handed out by the allocator.
    Allocated,
    /// Never handed out.
    Reserved,
}

/// Metadata for one physical frame.
///
/// Every page table entry that maps the frame, in any environment, holds one reference.
/// Page tables and page directories count the same way: their parent entry holds the
/// reference.
#[derive(Debug, Default)]
pub struct Frame {
    state: FrameState,
    refs: u16,
}

impl Frame {
    pub fn state(&self) -> FrameState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: FrameState) {
        self.state = state;
    }

    /// Returns how many mappings reference this frame.
    pub fn ref_count(&self) -> u16 {
        self.refs
    }

    /// Records one more mapping of this frame.
    ///
    /// Returns false, leaving the count unchanged, if the count is saturated.
    pub(crate) fn get(&mut self) -> bool {
        match self.refs.checked_add(1) {
            Some(refs) => {
                self.refs = refs;
                true
            }
            None => false,
        }
    }

    /// Drops one mapping of this frame, returning the remaining count.
    pub(crate) fn put(&mut self) -> u16 {
        assert!(self.refs > 0, "frame reference count underflow");
        self.refs -= 1;
        self.refs
    }
}
