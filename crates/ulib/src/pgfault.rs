//! User-level page-fault handling.
//!
//! The kernel delivers a page fault by redirecting the environment to its registered upcall
//! on the exception stack, with a [`UTrapframe`] on top of that stack. The upcall registered
//! by this library is the trampoline at [`PGFAULT_UPCALL`]: it calls the handler installed
//! with [`Process::set_pgfault_handler`] and then returns to the faulting instruction, which
//! runs again. A handler that fails takes the environment down with it.

use mm::{PageFlags, VirtualAddress, layout};
use pith_kernel::{EnvId, Error, UTrapframe};

use crate::Process;

/// A user-level page-fault handler.
pub type PgfaultHandler = fn(&mut Process<'_>, &UTrapframe) -> Result<(), Error>;

/// Entry address of the page-fault trampoline in user text.
pub const PGFAULT_UPCALL: VirtualAddress = VirtualAddress::new(layout::UTEXT.as_u32() + 0x20);

impl Process<'_> {
    /// Installs `handler` as this environment's page-fault handler.
    ///
    /// The first installation also allocates the exception stack and registers the
    /// trampoline with the kernel.
    pub fn set_pgfault_handler(&mut self, handler: PgfaultHandler) -> Result<(), Error> {
        if self.runtime.pgfault_handler.is_none() {
            self.sys_page_alloc(EnvId::SELF, layout::UXSTACKBOTTOM, PageFlags::writable())?;
            self.sys_env_set_pgfault_upcall(EnvId::SELF, PGFAULT_UPCALL)?;
        }
        self.runtime.pgfault_handler = Some(handler);
        Ok(())
    }

    /// Runs the upcall the kernel just redirected this environment to.
    pub(crate) fn upcall(&mut self) -> Result<(), Error> {
        let entry = self
            .kernel
            .env(self.env)
            .ok_or(Error::Terminated)?
            .trapframe()
            .eip;
        let handler = self
            .runtime
            .pgfault_handler
            .filter(|_| entry == PGFAULT_UPCALL.as_u32());
        let Some(handler) = handler else {
            log::warn!("[{}] no page fault handler at upcall {:08x}", self.env, entry);
            self.exit();
            return Err(Error::Terminated);
        };

        let utf = self.kernel.upcall_frame(self.env)?;
        if let Err(err) = handler(self, &utf) {
            log::error!(
                "[{}] unhandled page fault at {} ip {:08x}: {}",
                self.env,
                utf.fault_va,
                utf.eip,
                err
            );
            self.exit();
            return Err(Error::Terminated);
        }
        self.kernel.upcall_return(self.env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mm::PAGE_SIZE;
    use pith_kernel::{Config, Kernel};

    use crate::Runtime;

    const DATA: VirtualAddress = VirtualAddress::new(0x0090_0000);

    /// Maps a writable page at the faulting address.
    fn map_on_demand(process: &mut Process<'_>, utf: &UTrapframe) -> Result<(), Error> {
        let page = utf.fault_va.align_down(PAGE_SIZE);
        process.sys_page_alloc(EnvId::SELF, page, PageFlags::writable())
    }

    fn refuse(_: &mut Process<'_>, _: &UTrapframe) -> Result<(), Error> {
        Err(Error::FaultProtocolViolation)
    }

    #[test]
    fn first_install_allocates_exception_stack() {
        let mut kernel = Kernel::new(Config::default().with_frames(32));
        let env = kernel.create_env().unwrap();
        let mut runtime = Runtime::default();
        let mut process = Process::boot(&mut kernel, env, &mut runtime).unwrap();

        process.set_pgfault_handler(map_on_demand).unwrap();
        let stack = process.view().unwrap().frame(layout::UXSTACKBOTTOM);
        assert_eq!(
            process.view().unwrap().flags(layout::UXSTACKBOTTOM),
            Some(PageFlags::writable())
        );
        assert_eq!(process.env_info().unwrap().pgfault_upcall, Some(PGFAULT_UPCALL));

        process.set_pgfault_handler(refuse).unwrap();
        assert_eq!(process.view().unwrap().frame(layout::UXSTACKBOTTOM), stack);
    }

    #[test]
    fn handler_sees_fault_and_access_resumes() {
        let mut kernel = Kernel::new(Config::default().with_frames(32));
        let env = kernel.create_env().unwrap();
        let mut runtime = Runtime::default();
        let mut process = Process::boot(&mut kernel, env, &mut runtime).unwrap();
        process.set_pgfault_handler(map_on_demand).unwrap();

        process.write(DATA + 0x10, b"demand").unwrap();
        let mut buf = [0u8; 6];
        process.read(DATA + 0x10, &mut buf).unwrap();
        assert_eq!(&buf, b"demand");

        let env = process.kernel().env(env).unwrap();
        assert_eq!(env.upcalls(), 1);
        // Back on the normal stack at the faulting instruction.
        assert_eq!(env.trapframe().esp, layout::USTACKTOP.as_u32());
        assert_eq!(env.trapframe().eip, layout::UTEXT.as_u32());
    }

    #[test]
    fn failing_handler_terminates_environment() {
        let mut kernel = Kernel::new(Config::default().with_frames(32));
        let env = kernel.create_env().unwrap();
        let mut runtime = Runtime::default();
        let mut process = Process::boot(&mut kernel, env, &mut runtime).unwrap();
        process.set_pgfault_handler(refuse).unwrap();

        assert_eq!(process.write(DATA, &[1]), Err(Error::Terminated));
        assert!(kernel.env(env).is_none());
    }

    #[test]
    fn upcall_at_unknown_entry_terminates() {
        let mut kernel = Kernel::new(Config::default().with_frames(32));
        let env = kernel.create_env().unwrap();
        let mut runtime = Runtime::default();
        let mut process = Process::boot(&mut kernel, env, &mut runtime).unwrap();
        process.set_pgfault_handler(map_on_demand).unwrap();
        process
            .sys_env_set_pgfault_upcall(EnvId::SELF, layout::UTEXT)
            .unwrap();

        assert_eq!(process.write(DATA, &[1]), Err(Error::Terminated));
        assert!(process.kernel().env(env).is_none());
    }

    #[test]
    fn nested_fault_in_handler_unwinds_in_order() {
        fn touch_then_map(process: &mut Process<'_>, utf: &UTrapframe) -> Result<(), Error> {
            if utf.fault_va.align_down(PAGE_SIZE) == DATA {
                // Fault again from inside the handler.
                process.write(DATA + PAGE_SIZE, &[7])?;
            }
            map_on_demand(process, utf)
        }

        let mut kernel = Kernel::new(Config::default().with_frames(32));
        let env = kernel.create_env().unwrap();
        let mut runtime = Runtime::default();
        let mut process = Process::boot(&mut kernel, env, &mut runtime).unwrap();
        process.set_pgfault_handler(touch_then_map).unwrap();

        process.write(DATA, &[1]).unwrap();
        let mut buf = [0u8; 1];
        process.read(DATA + PAGE_SIZE, &mut buf).unwrap();
        assert_eq!(buf, [7]);

        let env = process.kernel().env(env).unwrap();
        assert_eq!(env.upcalls(), 2);
        assert_eq!(env.trapframe().esp, layout::USTACKTOP.as_u32());
    }
}
