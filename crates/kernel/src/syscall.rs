//! The privileged dispatch gate.
//!
//! [`Kernel::dispatch`] is the only way an environment enters the kernel on purpose. It
//! decodes the syscall number and raw register arguments, resolves environment arguments
//! against the caller (`0` means the caller itself), and runs the operation. The result is
//! also left in the caller's return register, as the trap return path would.
//!
//! Page operations accept only page-aligned addresses below `UTOP` and flag sets that
//! [`PageFlags::from_syscall`] accepts. Buffers passed by pointer are checked with
//! [`Kernel::user_mem_assert`]: an environment handing the kernel memory it may not read is
//! destroyed instead of receiving an error.

use mm::{PageFlags, PteBits, VirtualAddress, layout};

use crate::{EnvId, EnvStatus, Error, Kernel, encode_result};

/// Syscall numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Syscall {
    Cputs = 0,
    GetEnvId = 1,
    EnvDestroy = 2,
    PageAlloc = 3,
    PageMap = 4,
    PageUnmap = 5,
    Exofork = 6,
    EnvSetStatus = 7,
    EnvSetPgfaultUpcall = 8,
}

impl TryFrom<u32> for Syscall {
    type Error = Error;

    fn try_from(number: u32) -> Result<Self, Self::Error> {
        Ok(match number {
            0 => Self::Cputs,
            1 => Self::GetEnvId,
            2 => Self::EnvDestroy,
            3 => Self::PageAlloc,
            4 => Self::PageMap,
            5 => Self::PageUnmap,
            6 => Self::Exofork,
            7 => Self::EnvSetStatus,
            8 => Self::EnvSetPgfaultUpcall,
            _ => return Err(Error::InvalidArgument),
        })
    }
}

/// Checks a page operation's target address.
fn check_user_page(va: VirtualAddress) -> Result<(), Error> {
    if va.is_page_aligned() && layout::is_user_mappable(va) {
        Ok(())
    } else {
        Err(Error::InvalidArgument)
    }
}

impl Kernel {
    /// Runs syscall `number` with raw arguments on behalf of `caller`.
    ///
    /// Returns `Err(Terminated)` when the caller did not survive the call.
    pub fn dispatch(&mut self, caller: EnvId, number: u32, args: [u32; 5]) -> Result<u32, Error> {
        if self.envs.get(caller).is_none() {
            return Err(Error::BadEnv);
        }

        let [a1, a2, a3, a4, a5] = args;
        let result = Syscall::try_from(number).and_then(|call| {
            log::debug!("[{}] syscall {:?}({:#x}, {:#x}, {:#x}, {:#x}, {:#x})", caller, call, a1, a2, a3, a4, a5);
            match call {
                Syscall::Cputs => self
                    .sys_cputs(caller, VirtualAddress::new(a1), a2 as usize)
                    .map(|()| 0),
                Syscall::GetEnvId => self.sys_getenvid(caller).map(EnvId::as_u32),
                Syscall::EnvDestroy => self
                    .sys_env_destroy(caller, EnvId::from_raw(a1))
                    .map(|()| 0),
                Syscall::PageAlloc => self
                    .sys_page_alloc(caller, EnvId::from_raw(a1), VirtualAddress::new(a2), a3)
                    .map(|()| 0),
                Syscall::PageMap => self
                    .sys_page_map(
                        caller,
                        EnvId::from_raw(a1),
                        VirtualAddress::new(a2),
                        EnvId::from_raw(a3),
                        VirtualAddress::new(a4),
                        a5,
                    )
                    .map(|()| 0),
                Syscall::PageUnmap => self
                    .sys_page_unmap(caller, EnvId::from_raw(a1), VirtualAddress::new(a2))
                    .map(|()| 0),
                Syscall::Exofork => self.sys_exofork(caller).map(EnvId::as_u32),
                Syscall::EnvSetStatus => self
                    .sys_env_set_status(caller, EnvId::from_raw(a1), a2)
                    .map(|()| 0),
                Syscall::EnvSetPgfaultUpcall => self
                    .sys_env_set_pgfault_upcall(
                        caller,
                        EnvId::from_raw(a1),
                        VirtualAddress::new(a2),
                    )
                    .map(|()| 0),
            }
        });

        let Some(env) = self.envs.get_mut(caller) else {
            return Err(Error::Terminated);
        };
        env.trapframe.regs.eax = encode_result(result);
        if let Err(err) = result {
            log::debug!("[{}] syscall {} failed: {}", caller, number, err);
        }
        result
    }

    /// Writes the caller's buffer `[va, va + len)` to the console.
    ///
    /// The whole buffer is checked before any byte is output; on failure the caller is
    /// destroyed and nothing is written.
    pub fn sys_cputs(&mut self, caller: EnvId, va: VirtualAddress, len: usize) -> Result<(), Error> {
        self.user_mem_assert(caller, va, len, PteBits::USER)?;
        if len == 0 {
            return Ok(());
        }

        let mut buf = alloc::vec![0u8; len];
        self.copy_in(caller, va, &mut buf)?;
        self.console.write_bytes(&buf);
        Ok(())
    }

    pub fn sys_getenvid(&self, caller: EnvId) -> Result<EnvId, Error> {
        self.envs.get(caller).map(|env| env.id()).ok_or(Error::BadEnv)
    }

    /// Destroys `target`, which must be the caller or one of its children.
    pub fn sys_env_destroy(&mut self, caller: EnvId, target: EnvId) -> Result<(), Error> {
        let target = self.envs.resolve(caller, target, true)?;
        self.destroy_env(target, caller);
        Ok(())
    }

    /// Maps a fresh zeroed frame at `va` in `target`, replacing any existing mapping.
    pub fn sys_page_alloc(
        &mut self,
        caller: EnvId,
        target: EnvId,
        va: VirtualAddress,
        perm: u32,
    ) -> Result<(), Error> {
        let target = self.envs.resolve(caller, target, true)?;
        check_user_page(va)?;
        let flags = PageFlags::from_syscall(perm)?;

        let env = self.envs.get_mut(target).ok_or(Error::BadEnv)?;
        let frame = self.memory.allocate(true)?;
        if let Err(err) = env.directory.map(&mut self.memory, va, frame, flags) {
            self.memory.deallocate(frame);
            return Err(err.into());
        }
        log::debug!("[{}] page_alloc {} {:?} -> frame {}", caller, va, flags, frame);
        Ok(())
    }

    /// Maps the frame behind `src_va` in `src` at `dst_va` in `dst`.
    ///
    /// A writable mapping can only be derived from a writable source.
    pub fn sys_page_map(
        &mut self,
        caller: EnvId,
        src: EnvId,
        src_va: VirtualAddress,
        dst: EnvId,
        dst_va: VirtualAddress,
        perm: u32,
    ) -> Result<(), Error> {
        let src = self.envs.resolve(caller, src, true)?;
        let dst = self.envs.resolve(caller, dst, true)?;
        check_user_page(src_va)?;
        check_user_page(dst_va)?;
        let flags = PageFlags::from_syscall(perm)?;

        let source = self
            .envs
            .get(src)
            .ok_or(Error::BadEnv)?
            .directory
            .lookup(&self.memory, src_va)
            .ok_or(Error::InvalidArgument)?;
        let source_flags = source.flags().ok_or(Error::InvalidArgument)?;
        if !source_flags.grants(flags) {
            return Err(Error::InvalidArgument);
        }
        let frame = source.frame().ok_or(Error::InvalidArgument)?;

        let env = self.envs.get_mut(dst).ok_or(Error::BadEnv)?;
        env.directory.map(&mut self.memory, dst_va, frame, flags)?;
        log::debug!(
            "[{}] page_map {}:{} -> {}:{} {:?}",
            caller,
            src,
            src_va,
            dst,
            dst_va,
            flags
        );
        Ok(())
    }

    /// Removes the mapping at `va` in `target`; unmapping an absent page succeeds.
    pub fn sys_page_unmap(
        &mut self,
        caller: EnvId,
        target: EnvId,
        va: VirtualAddress,
    ) -> Result<(), Error> {
        let target = self.envs.resolve(caller, target, true)?;
        check_user_page(va)?;
        let env = self.envs.get_mut(target).ok_or(Error::BadEnv)?;
        env.directory.unmap(&mut self.memory, va)?;
        Ok(())
    }

    /// Creates a child of the caller with a copy of its registers and an empty address space.
    pub fn sys_exofork(&mut self, caller: EnvId) -> Result<EnvId, Error> {
        self.duplicate_environment(caller)
    }

    /// Sets `target`'s status to runnable or not runnable.
    pub fn sys_env_set_status(
        &mut self,
        caller: EnvId,
        target: EnvId,
        status: u32,
    ) -> Result<(), Error> {
        let status = match EnvStatus::try_from(status)? {
            status @ (EnvStatus::Runnable | EnvStatus::NotRunnable) => status,
            _ => return Err(Error::InvalidArgument),
        };
        let target = self.envs.resolve(caller, target, true)?;
        let env = self.envs.get_mut(target).ok_or(Error::BadEnv)?;
        env.status = status;
        Ok(())
    }

    /// Registers `entry` as `target`'s page-fault upcall. The last registration wins.
    pub fn sys_env_set_pgfault_upcall(
        &mut self,
        caller: EnvId,
        target: EnvId,
        entry: VirtualAddress,
    ) -> Result<(), Error> {
        let target = self.envs.resolve(caller, target, true)?;
        let env = self.envs.get_mut(target).ok_or(Error::BadEnv)?;
        env.pgfault_upcall = Some(entry);
        Ok(())
    }
}
