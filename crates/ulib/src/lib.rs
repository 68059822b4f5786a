#![cfg_attr(not(test), no_std)]

//! # Pith User Library
//!
//! The unprivileged half of the system: what a program running in a Pith environment links
//! against. Everything here reaches the kernel only through the dispatch gate, reads its own
//! page tables through the read-only address-space view, and sees its own environment
//! metadata through the read-only environment mirror.
//!
//! - [`Process`] is the execution context of one environment on the simulated CPU.
//! - [`Process::set_pgfault_handler`] installs a user-level page-fault handler, run by the
//!   trampoline on the environment's exception stack.
//! - [`fork`] duplicates the running environment with copy-on-write sharing.

extern crate alloc;

pub mod fork;
mod pgfault;
mod process;
mod syscall;

pub use fork::{cow_fault, fork};
pub use pgfault::{PGFAULT_UPCALL, PgfaultHandler};
pub use process::{Process, Runtime};
pub use syscall::Exofork;
