//! Copy-on-write fork.
//!
//! [`fork`] creates a child with exofork and then, from the parent, walks every mapped page
//! below the exception stack:
//!
//! - Shared pages are mapped into the child with identical flags and stay aliased.
//! - Writable and copy-on-write pages are mapped copy-on-write into the child, then
//!   re-mapped copy-on-write in the parent. The parent re-map happens even for pages that
//!   were already copy-on-write.
//! - Read-only pages are mapped read-only; neither side can change them.
//!
//! The child then gets a fresh exception stack and the parent's upcall, and only then is made
//! runnable. The first write to a copy-on-write page by either side faults into
//! [`cow_fault`], which gives the writer a private copy.

use alloc::{vec, vec::Vec};

use mm::{PAGE_SIZE, PageFlags, Protection, VirtualAddress, layout};
use pith_kernel::{EnvId, EnvStatus, Error, FaultCause, UTrapframe, decode_result};

use crate::{Exofork, Process};

/// Page-fault handler that resolves writes to copy-on-write pages.
///
/// Any other fault is a [`Error::FaultProtocolViolation`].
pub fn cow_fault(process: &mut Process<'_>, utf: &UTrapframe) -> Result<(), Error> {
    let addr = utf.fault_va;
    if layout::is_exception_stack(addr) {
        return Err(Error::FaultProtocolViolation);
    }
    let flags = process.view()?.flags(addr);
    if !utf.err.contains(FaultCause::WRITE) || !flags.is_some_and(PageFlags::is_copy_on_write) {
        log::warn!(
            "[{}] not a copy-on-write fault: va {} err {:?} flags {:?}",
            process.env(),
            addr,
            utf.err,
            flags
        );
        return Err(Error::FaultProtocolViolation);
    }

    let page = addr.align_down(PAGE_SIZE);
    process.sys_page_alloc(EnvId::SELF, layout::PFTEMP, PageFlags::writable())?;
    let mut contents = vec![0u8; PAGE_SIZE as usize];
    process.read(page, &mut contents)?;
    process.write(layout::PFTEMP, &contents)?;
    process.sys_page_map(EnvId::SELF, layout::PFTEMP, EnvId::SELF, page, PageFlags::writable())?;
    process.sys_page_unmap(EnvId::SELF, layout::PFTEMP)?;
    log::trace!("[{}] copied page {}", process.env(), page);
    Ok(())
}

/// Maps the page at `va` into `child` according to its flags.
fn duppage(
    process: &mut Process<'_>,
    child: EnvId,
    va: VirtualAddress,
    flags: PageFlags,
) -> Result<(), Error> {
    match flags.protection() {
        Protection::Shared { .. } => {
            log::trace!("fork: {} shared", va);
            process.sys_page_map(EnvId::SELF, va, child, va, flags)
        }
        Protection::Writable | Protection::CopyOnWrite => {
            log::trace!("fork: {} copy-on-write", va);
            process.sys_page_map(EnvId::SELF, va, child, va, PageFlags::copy_on_write())?;
            process.sys_page_map(EnvId::SELF, va, EnvId::SELF, va, PageFlags::copy_on_write())
        }
        Protection::ReadOnly => {
            log::trace!("fork: {} read-only", va);
            process.sys_page_map(EnvId::SELF, va, child, va, PageFlags::read_only())
        }
    }
}

/// Populates the new `child` and makes it runnable.
fn duplicate_into(process: &mut Process<'_>, child: EnvId) -> Result<(), Error> {
    let pages: Vec<(VirtualAddress, PageFlags)> = process
        .view()?
        .mapped_pages(VirtualAddress::new(0)..layout::UXSTACKBOTTOM)
        .filter_map(|(va, entry)| entry.flags().filter(|flags| flags.is_user()).map(|flags| (va, flags)))
        .collect();
    for (va, flags) in pages {
        duppage(process, child, va, flags)?;
    }

    process.sys_page_alloc(child, layout::UXSTACKBOTTOM, PageFlags::writable())?;
    let upcall = process
        .env_info()?
        .pgfault_upcall
        .ok_or(Error::InvalidArgument)?;
    process.sys_env_set_pgfault_upcall(child, upcall)?;

    process.sys_env_set_status(child, EnvStatus::Runnable)
}

/// Runs the child's side of fork: learn its own identity.
fn start_child(process: &mut Process<'_>) -> Result<Exofork, Error> {
    let id = process.sys_getenvid()?;
    process.runtime.this_env = Some(id);
    Ok(Exofork::Child)
}

/// Forks the running environment.
///
/// Returns [`Exofork::Parent`] with the child's id in the parent. The child observes
/// [`Exofork::Child`] from [`resume`] when it first runs. If duplication fails the child is
/// destroyed before the error is returned.
pub fn fork(process: &mut Process<'_>) -> Result<Exofork, Error> {
    process.set_pgfault_handler(cow_fault)?;

    let child = match process.sys_exofork()? {
        // Zero is only ever returned to the new environment, which continues in `resume`
        // rather than here.
        Exofork::Child => return start_child(process),
        Exofork::Parent(child) => child,
    };

    if let Err(err) = duplicate_into(process, child) {
        log::warn!("[{}] fork of {} failed: {}", process.env(), child, err);
        if process.sys_env_destroy(child).is_err() {
            log::warn!("[{}] could not reap {}", process.env(), child);
        }
        return Err(err);
    }
    log::debug!("[{}] forked {}", process.env(), child);
    Ok(Exofork::Parent(child))
}

/// Continues an environment created by exofork on its first run.
///
/// Decodes the exofork return the environment was created with, so it must come before the
/// environment makes any syscall. A child fixes its `this_env` before returning
/// [`Exofork::Child`].
pub fn resume(process: &mut Process<'_>) -> Result<Exofork, Error> {
    match Exofork::from_return(decode_result(process.return_register()?)?) {
        Exofork::Child => start_child(process),
        parent => Ok(parent),
    }
}
