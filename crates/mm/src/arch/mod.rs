//! Architecture-specific definitions for memory management.
//!
//! The machine is a paged, 32-bit addressable architecture with two-level translation.
//! Everything is emulated in host memory, so the same definitions serve both the kernel and
//! its tests.

mod ia32;

pub use ia32::*;
