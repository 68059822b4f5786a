#![cfg_attr(not(test), no_std)]

//! # Pith Kernel
//!
//! The privileged half of the Pith exokernel, running on a simulated single-CPU machine:
//!
//! - The environment table, with generation-tagged [`EnvId`]s.
//! - The dispatch gate ([`Kernel::dispatch`]), which validates and executes syscalls.
//! - User memory permission checks on syscall buffers.
//! - A simulated MMU for user-mode loads and stores, and delivery of page faults to a
//!   user-registered upcall on the environment's exception stack.
//!
//! No operation here relies on a "current environment" global: the calling environment is
//! always passed explicitly.

extern crate alloc;

mod config;
mod console;
mod cpu;
mod env;
mod error;
pub mod logger;
mod syscall;
mod trap;
mod trapframe;
mod usermem;

use alloc::boxed::Box;

use mm::{AddressSpaceView, PhysicalMemory, layout};

pub use config::Config;
pub use console::{BufferSink, ConsoleSink, LogSink};
pub use cpu::Trap;
pub use env::{Env, EnvId, EnvInfo, EnvStatus, EnvTable, NENV};
pub use error::{Error, decode_result, encode_result};
pub use syscall::Syscall;
pub use trapframe::{FaultCause, PushRegs, Trapframe, UTrapframe};

/// The machine: physical memory, the environment table and the console.
pub struct Kernel {
    config: Config,
    memory: PhysicalMemory,
    envs: EnvTable,
    console: Box<dyn ConsoleSink>,
}

impl Kernel {
    /// Boots a kernel whose console output goes to the log.
    pub fn new(config: Config) -> Self {
        Self::with_console(config, LogSink)
    }

    /// Boots a kernel with the given console, installing the kernel [`logger`] on first boot.
    pub fn with_console(config: Config, console: impl ConsoleSink + 'static) -> Self {
        logger::Logger::init();
        log::info!(
            "pith: {} frames, {} environment slots",
            config.frames(),
            config.max_envs()
        );
        Self {
            memory: PhysicalMemory::new(config.frames()),
            envs: EnvTable::new(config.max_envs()),
            console: Box::new(console),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn memory(&self) -> &PhysicalMemory {
        &self.memory
    }

    /// Returns a live environment.
    pub fn env(&self, id: EnvId) -> Option<&Env> {
        self.envs.get(id)
    }

    pub fn envs(&self) -> impl Iterator<Item = &Env> {
        self.envs.iter()
    }

    /// Returns the read-only environment metadata user space sees.
    pub fn env_info(&self, id: EnvId) -> Option<EnvInfo> {
        self.envs.get(id).map(Env::info)
    }

    /// Returns the read-only mirror of an environment's page tables.
    pub fn view(&self, id: EnvId) -> Option<AddressSpaceView<'_>> {
        let env = self.envs.get(id)?;
        Some(AddressSpaceView::new(&env.directory, &self.memory))
    }

    /// Creates a runnable environment with no parent and an empty address space.
    ///
    /// This is the boot path; environments created by other environments go through
    /// exofork.
    pub fn create_env(&mut self) -> Result<EnvId, Error> {
        let id = self.envs.alloc(None, &mut self.memory)?;
        if let Some(env) = self.envs.get_mut(id) {
            env.status = EnvStatus::Runnable;
            env.trapframe = Trapframe::new(layout::UTEXT, layout::USTACKTOP);
        }
        log::info!("[{}] new env", id);
        Ok(id)
    }

    /// Creates a not-yet-runnable child of `caller` holding a copy of its registers.
    ///
    /// The child's return register is zero, which is what it observes exofork returning.
    pub fn duplicate_environment(&mut self, caller: EnvId) -> Result<EnvId, Error> {
        let trapframe = *self.envs.get(caller).ok_or(Error::BadEnv)?.trapframe();
        let child = self.envs.alloc(Some(caller), &mut self.memory)?;
        if let Some(env) = self.envs.get_mut(child) {
            env.trapframe = trapframe;
            env.trapframe.regs.eax = 0;
        }
        log::info!("[{}] new env {}", caller, child);
        Ok(child)
    }

    /// Destroys `id` on behalf of `by`, releasing its whole address space.
    pub fn destroy_env(&mut self, id: EnvId, by: EnvId) {
        let Some(env) = self.envs.get_mut(id) else {
            return;
        };
        env.status = EnvStatus::Dying;
        if id == by {
            log::info!("[{}] exiting gracefully", id);
        } else {
            log::info!("[{}] destroying {}", by, id);
        }

        if let Some(env) = self.envs.remove(id) {
            env.directory.destroy(&mut self.memory);
        }
    }

    /// Switches the CPU to `id`, demoting whichever environment was running.
    pub fn env_run(&mut self, id: EnvId) -> Result<(), Error> {
        match self.envs.get(id).map(Env::status) {
            None => return Err(Error::BadEnv),
            Some(EnvStatus::Runnable | EnvStatus::Running) => {}
            Some(_) => return Err(Error::InvalidArgument),
        }

        let running: alloc::vec::Vec<EnvId> = self
            .envs
            .iter()
            .filter(|env| env.status == EnvStatus::Running && env.id != id)
            .map(Env::id)
            .collect();
        for other in running {
            if let Some(env) = self.envs.get_mut(other) {
                env.status = EnvStatus::Runnable;
            }
        }

        if let Some(env) = self.envs.get_mut(id) {
            env.status = EnvStatus::Running;
        }
        Ok(())
    }
}
