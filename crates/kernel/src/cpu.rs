//! User-mode memory accesses on the simulated CPU.
//!
//! Loads and stores made by an environment are translated through its page directory the
//! way the MMU would. An access the MMU refuses raises a page fault, which is delivered to
//! the environment (see [`Kernel::page_fault`]).

use mm::{AddressSpaceView, PAGE_SIZE, PteBits, VirtualAddress};

use crate::{EnvId, FaultCause, Kernel};

/// Why a user-mode access did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trap {
    /// The fault was reflected to the environment's page-fault upcall. The environment now
    /// runs the upcall on its exception stack; the access is retried when it resumes.
    Upcall,
    /// The environment was destroyed.
    Terminated,
}

impl Kernel {
    /// Loads `buf.len()` bytes from `va` as `env` in user mode.
    pub fn user_load(
        &mut self,
        env: EnvId,
        va: VirtualAddress,
        buf: &mut [u8],
    ) -> Result<(), Trap> {
        self.access(env, va, buf.len(), false)?;
        self.copy_in(env, va, buf).map_err(|_| Trap::Terminated)
    }

    /// Stores `bytes` at `va` as `env` in user mode.
    ///
    /// The whole range is translated before any byte is written, so a faulting store has no
    /// partial effect and can be retried as is.
    pub fn user_store(&mut self, env: EnvId, va: VirtualAddress, bytes: &[u8]) -> Result<(), Trap> {
        self.access(env, va, bytes.len(), true)?;
        self.copy_out(env, va, bytes).map_err(|_| Trap::Terminated)
    }

    fn access(&mut self, env: EnvId, va: VirtualAddress, len: usize, write: bool) -> Result<(), Trap> {
        let Some(view) = self.view(env) else {
            return Err(Trap::Terminated);
        };
        match first_fault(view, va, len, write) {
            None => Ok(()),
            Some((fault_va, cause)) => Err(self.page_fault(env, fault_va, cause)),
        }
    }
}

/// Returns the address and cause of the first page the MMU would refuse.
fn first_fault(
    view: AddressSpaceView<'_>,
    va: VirtualAddress,
    len: usize,
    write: bool,
) -> Option<(VirtualAddress, FaultCause)> {
    let mut cause = FaultCause::USER;
    if write {
        cause |= FaultCause::WRITE;
    }

    let page_size = PAGE_SIZE as u64;
    let start = va.as_u32() as u64;
    let end = start + len as u64;
    let mut page = start & !(page_size - 1);
    while page < end {
        // The last page of the address space is never user-mapped, so `page` fits in u32.
        let addr = VirtualAddress::new(page.max(start) as u32);
        match view.entry(addr) {
            None => return Some((addr, cause)),
            Some(entry) => {
                let bits = entry.bits();
                if !bits.contains(PteBits::USER) || (write && !bits.contains(PteBits::WRITABLE)) {
                    return Some((addr, cause | FaultCause::PROTECTION));
                }
            }
        }
        page += page_size;
    }
    None
}
