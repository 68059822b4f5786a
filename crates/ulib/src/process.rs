//! The execution context of a running environment.

use mm::{AddressSpaceView, VirtualAddress};
use pith_kernel::{EnvId, EnvInfo, Error, Kernel, Trap};

use crate::PgfaultHandler;

/// User-space globals of one environment.
///
/// These live in the environment's own memory, so a forked child starts with a copy of its
/// parent's runtime and must fix `this_env` itself.
#[derive(Debug, Clone, Default)]
pub struct Runtime {
    pub(crate) this_env: Option<EnvId>,
    pub(crate) pgfault_handler: Option<PgfaultHandler>,
}

impl Runtime {
    /// The environment this runtime believes it belongs to.
    pub fn this_env(&self) -> Option<EnvId> {
        self.this_env
    }

    pub fn pgfault_handler(&self) -> Option<PgfaultHandler> {
        self.pgfault_handler
    }
}

/// An environment running on the CPU, with its user-space globals.
pub struct Process<'k> {
    pub(crate) kernel: &'k mut Kernel,
    pub(crate) env: EnvId,
    pub(crate) runtime: &'k mut Runtime,
}

impl<'k> Process<'k> {
    /// Switches the CPU to `env`, resuming it with `runtime`.
    pub fn new(kernel: &'k mut Kernel, env: EnvId, runtime: &'k mut Runtime) -> Result<Self, Error> {
        kernel.env_run(env)?;
        Ok(Self {
            kernel,
            env,
            runtime,
        })
    }

    /// Starts a freshly created environment, learning its own id first.
    pub fn boot(kernel: &'k mut Kernel, env: EnvId, runtime: &'k mut Runtime) -> Result<Self, Error> {
        let mut process = Self::new(kernel, env, runtime)?;
        let id = process.sys_getenvid()?;
        process.runtime.this_env = Some(id);
        Ok(process)
    }

    /// The environment the CPU is running.
    pub fn env(&self) -> EnvId {
        self.env
    }

    pub fn runtime(&self) -> &Runtime {
        self.runtime
    }

    pub fn kernel(&self) -> &Kernel {
        self.kernel
    }

    /// Returns the read-only mirror of this environment's page tables.
    pub fn view(&self) -> Result<AddressSpaceView<'_>, Error> {
        self.kernel.view(self.env).ok_or(Error::Terminated)
    }

    /// Returns this environment's read-only metadata.
    pub fn env_info(&self) -> Result<EnvInfo, Error> {
        self.kernel.env_info(self.env).ok_or(Error::Terminated)
    }

    /// Returns the saved return register.
    pub(crate) fn return_register(&self) -> Result<u32, Error> {
        let env = self.kernel.env(self.env).ok_or(Error::Terminated)?;
        Ok(env.trapframe().regs.eax)
    }

    /// Loads from user memory, running the page-fault handler as needed.
    pub fn read(&mut self, va: VirtualAddress, buf: &mut [u8]) -> Result<(), Error> {
        loop {
            match self.kernel.user_load(self.env, va, buf) {
                Ok(()) => return Ok(()),
                Err(Trap::Upcall) => self.upcall()?,
                Err(Trap::Terminated) => return Err(Error::Terminated),
            }
        }
    }

    /// Stores to user memory, running the page-fault handler as needed.
    pub fn write(&mut self, va: VirtualAddress, bytes: &[u8]) -> Result<(), Error> {
        loop {
            match self.kernel.user_store(self.env, va, bytes) {
                Ok(()) => return Ok(()),
                Err(Trap::Upcall) => self.upcall()?,
                Err(Trap::Terminated) => return Err(Error::Terminated),
            }
        }
    }

    /// Destroys this environment.
    pub fn exit(&mut self) {
        // Destroying ourselves never returns to us.
        let _ = self.sys_env_destroy(EnvId::SELF);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mm::layout::UTEXT;
    use pith_kernel::{Config, EnvStatus};

    #[test]
    fn boot_records_identity_and_runs() {
        let mut kernel = Kernel::new(Config::default().with_frames(16));
        let env = kernel.create_env().unwrap();
        let mut runtime = Runtime::default();
        let process = Process::boot(&mut kernel, env, &mut runtime).unwrap();

        assert_eq!(process.runtime().this_env(), Some(env));
        assert_eq!(process.env_info().unwrap().status, EnvStatus::Running);
    }

    #[test]
    fn exit_destroys_environment() {
        let mut kernel = Kernel::new(Config::default().with_frames(16));
        let env = kernel.create_env().unwrap();
        let mut runtime = Runtime::default();
        let mut process = Process::boot(&mut kernel, env, &mut runtime).unwrap();

        process.exit();
        assert_eq!(process.env_info(), Err(Error::Terminated));
        assert_eq!(process.write(UTEXT, &[1]), Err(Error::Terminated));
        assert!(kernel.env(env).is_none());
    }
}
