//! Syscall stubs.

use mm::{PageFlags, VirtualAddress};
use pith_kernel::{EnvId, EnvStatus, Error, Syscall};

use crate::Process;

/// The two returns of exofork.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exofork {
    /// Returned in the parent, naming the new child.
    Parent(EnvId),
    /// Returned in the child when it first runs.
    Child,
}

impl Exofork {
    /// Decodes exofork's return value: zero in the child, the child's id in the parent.
    pub fn from_return(value: u32) -> Self {
        match EnvId::from_raw(value) {
            id if id.is_self() => Self::Child,
            id => Self::Parent(id),
        }
    }
}

impl Process<'_> {
    fn syscall(&mut self, call: Syscall, args: [u32; 5]) -> Result<u32, Error> {
        self.kernel.dispatch(self.env, call as u32, args)
    }

    pub fn sys_cputs(&mut self, va: VirtualAddress, len: usize) -> Result<(), Error> {
        let len = u32::try_from(len).map_err(|_| Error::InvalidArgument)?;
        self.syscall(Syscall::Cputs, [va.as_u32(), len, 0, 0, 0])
            .map(drop)
    }

    pub fn sys_getenvid(&mut self) -> Result<EnvId, Error> {
        self.syscall(Syscall::GetEnvId, [0; 5]).map(EnvId::from_raw)
    }

    pub fn sys_env_destroy(&mut self, env: EnvId) -> Result<(), Error> {
        self.syscall(Syscall::EnvDestroy, [env.as_u32(), 0, 0, 0, 0])
            .map(drop)
    }

    pub fn sys_page_alloc(
        &mut self,
        env: EnvId,
        va: VirtualAddress,
        flags: PageFlags,
    ) -> Result<(), Error> {
        let args = [env.as_u32(), va.as_u32(), flags.bits().bits(), 0, 0];
        self.syscall(Syscall::PageAlloc, args).map(drop)
    }

    pub fn sys_page_map(
        &mut self,
        src: EnvId,
        src_va: VirtualAddress,
        dst: EnvId,
        dst_va: VirtualAddress,
        flags: PageFlags,
    ) -> Result<(), Error> {
        let args = [
            src.as_u32(),
            src_va.as_u32(),
            dst.as_u32(),
            dst_va.as_u32(),
            flags.bits().bits(),
        ];
        self.syscall(Syscall::PageMap, args).map(drop)
    }

    pub fn sys_page_unmap(&mut self, env: EnvId, va: VirtualAddress) -> Result<(), Error> {
        self.syscall(Syscall::PageUnmap, [env.as_u32(), va.as_u32(), 0, 0, 0])
            .map(drop)
    }

    pub fn sys_exofork(&mut self) -> Result<Exofork, Error> {
        self.syscall(Syscall::Exofork, [0; 5])
            .map(Exofork::from_return)
    }

    pub fn sys_env_set_status(&mut self, env: EnvId, status: EnvStatus) -> Result<(), Error> {
        self.syscall(Syscall::EnvSetStatus, [env.as_u32(), status as u32, 0, 0, 0])
            .map(drop)
    }

    pub fn sys_env_set_pgfault_upcall(
        &mut self,
        env: EnvId,
        upcall: VirtualAddress,
    ) -> Result<(), Error> {
        self.syscall(Syscall::EnvSetPgfaultUpcall, [env.as_u32(), upcall.as_u32(), 0, 0, 0])
            .map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use mm::layout::UTEXT;
    use pith_kernel::{BufferSink, Config, Kernel};

    use crate::Runtime;

    #[test]
    fn exofork_return_decoding() {
        assert_eq!(Exofork::from_return(0), Exofork::Child);
        assert_eq!(
            Exofork::from_return(0x1001),
            Exofork::Parent(EnvId::from_raw(0x1001))
        );
    }

    #[test]
    fn stubs_reach_the_kernel() {
        let console = BufferSink::new();
        let mut kernel = Kernel::with_console(Config::default().with_frames(32), console.clone());
        let env = kernel.create_env().unwrap();
        let mut runtime = Runtime::default();
        let mut process = Process::boot(&mut kernel, env, &mut runtime).unwrap();

        assert_eq!(process.sys_getenvid(), Ok(env));
        process
            .sys_page_alloc(EnvId::SELF, UTEXT, PageFlags::writable())
            .unwrap();
        process.write(UTEXT, b"hi there").unwrap();
        process.sys_cputs(UTEXT, 8).unwrap();
        assert_eq!(console.contents(), b"hi there".to_vec());

        assert_eq!(
            process.sys_page_alloc(EnvId::SELF, UTEXT, PageFlags::writable().supervisor()),
            Err(Error::InvalidArgument)
        );
        process.sys_page_unmap(EnvId::SELF, UTEXT).unwrap();
        let mut buf = vec![0u8; 1];
        assert_eq!(process.read(UTEXT, &mut buf), Err(Error::Terminated));
    }

    #[test]
    fn cputs_length_must_fit_the_register() {
        let console = BufferSink::new();
        let mut kernel = Kernel::with_console(Config::default().with_frames(32), console.clone());
        let env = kernel.create_env().unwrap();
        let mut runtime = Runtime::default();
        let mut process = Process::boot(&mut kernel, env, &mut runtime).unwrap();
        process
            .sys_page_alloc(EnvId::SELF, UTEXT, PageFlags::writable())
            .unwrap();

        // Truncated to 32 bits this length would be 1 and pass the memory check.
        let len = (u64::from(u32::MAX) + 2) as usize;
        if usize::BITS > 32 {
            assert_eq!(process.sys_cputs(UTEXT, len), Err(Error::InvalidArgument));
            assert!(process.env_info().is_ok());
            assert!(console.contents().is_empty());
        }
    }
}
