//! Page-fault delivery to user space.
//!
//! A user page fault is reflected to the environment's registered upcall. The kernel pushes
//! a [`UTrapframe`] describing the fault onto the environment's one-page exception stack and
//! redirects the environment to the upcall running on that stack. A fault taken while the
//! upcall is already running nests: the new frame goes below the current stack pointer,
//! with one empty word between the two.
//!
//! The upcall returns to the faulting context with [`Kernel::upcall_return`].

use mm::{PAGE_SIZE, PteBits, VirtualAddress, layout};

use crate::{EnvId, Error, FaultCause, Kernel, Trap, UTrapframe};

/// Gap left between nested frames.
const NESTED_GAP: u32 = 4;

impl Kernel {
    /// Delivers a user-mode page fault at `fault_va` to `env`.
    pub fn page_fault(&mut self, env: EnvId, fault_va: VirtualAddress, cause: FaultCause) -> Trap {
        let Some(current) = self.envs.get(env) else {
            return Trap::Terminated;
        };
        let tf = *current.trapframe();

        let Some(upcall) = current.pgfault_upcall() else {
            log::warn!(
                "[{}] user fault va {} ip {:08x}, no upcall",
                env,
                fault_va,
                tf.eip
            );
            self.destroy_env(env, env);
            return Trap::Terminated;
        };

        if layout::is_exception_stack(fault_va) {
            log::warn!("[{}] fault on the exception stack at {}", env, fault_va);
            self.destroy_env(env, env);
            return Trap::Terminated;
        }

        if self
            .user_mem_assert(env, layout::UXSTACKBOTTOM, PAGE_SIZE as usize, PteBits::WRITABLE)
            .is_err()
        {
            return Trap::Terminated;
        }

        let esp = VirtualAddress::new(tf.esp);
        let top = if layout::is_exception_stack(esp) {
            esp.as_u32().checked_sub(NESTED_GAP)
        } else {
            Some(layout::UXSTACKTOP.as_u32())
        };
        let frame_va = top
            .and_then(|top| top.checked_sub(UTrapframe::SIZE as u32))
            .map(VirtualAddress::new)
            .filter(|va| *va >= layout::UXSTACKBOTTOM);
        let Some(frame_va) = frame_va else {
            log::warn!("[{}] exception stack overflow", env);
            self.destroy_env(env, env);
            return Trap::Terminated;
        };

        let utf = UTrapframe::new(fault_va, cause, &tf);
        if self.copy_out(env, frame_va, &utf.to_bytes()).is_err() {
            self.destroy_env(env, env);
            return Trap::Terminated;
        }

        if let Some(current) = self.envs.get_mut(env) {
            current.trapframe.eip = upcall.as_u32();
            current.trapframe.esp = frame_va.as_u32();
            current.upcalls += 1;
        }
        log::debug!("[{}] page fault at {} ({:?}) -> upcall", env, fault_va, cause);
        Trap::Upcall
    }

    /// Reads the frame at the top of `env`'s exception stack.
    ///
    /// This is what the upcall sees as its argument.
    pub fn upcall_frame(&self, env: EnvId) -> Result<UTrapframe, Error> {
        let esp = VirtualAddress::new(self.envs.get(env).ok_or(Error::BadEnv)?.trapframe().esp);
        if !layout::is_exception_stack(esp) {
            return Err(Error::InvalidArgument);
        }
        let mut bytes = [0u8; UTrapframe::SIZE];
        self.copy_in(env, esp, &mut bytes)?;
        Ok(UTrapframe::from_bytes(&bytes))
    }

    /// Returns from the upcall: restores the registers saved in the frame at the top of the
    /// exception stack, resuming the faulting context.
    pub fn upcall_return(&mut self, env: EnvId) -> Result<(), Error> {
        let utf = self.upcall_frame(env)?;
        let current = self.envs.get_mut(env).ok_or(Error::BadEnv)?;
        utf.restore(&mut current.trapframe);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;

    const UPCALL: VirtualAddress = VirtualAddress::new(0x0080_0040);
    const DATA: VirtualAddress = VirtualAddress::new(0x0090_0000);

    fn kernel_with_handler() -> (Kernel, EnvId) {
        let mut kernel = Kernel::new(Config::default().with_frames(32));
        let env = kernel.create_env().unwrap();
        kernel.sys_page_alloc(env, env, layout::UXSTACKBOTTOM, 0x7).unwrap();
        kernel.sys_page_alloc(env, env, DATA, 0x5).unwrap();
        kernel.sys_env_set_pgfault_upcall(env, env, UPCALL).unwrap();
        (kernel, env)
    }

    #[test]
    fn pushes_frame_at_top_of_exception_stack() {
        let (mut kernel, env) = kernel_with_handler();
        let before = *kernel.env(env).unwrap().trapframe();

        assert_eq!(kernel.user_store(env, DATA + 8, &[1]), Err(Trap::Upcall));

        let tf = *kernel.env(env).unwrap().trapframe();
        assert_eq!(tf.eip, UPCALL.as_u32());
        assert_eq!(tf.esp, layout::UXSTACKTOP.as_u32() - UTrapframe::SIZE as u32);
        assert_eq!(kernel.env(env).unwrap().upcalls(), 1);

        let utf = kernel.upcall_frame(env).unwrap();
        assert_eq!(utf.fault_va, DATA + 8);
        assert_eq!(
            utf.err,
            FaultCause::USER | FaultCause::WRITE | FaultCause::PROTECTION
        );
        assert_eq!(utf.eip, before.eip);
        assert_eq!(utf.esp, before.esp);

        kernel.upcall_return(env).unwrap();
        assert_eq!(*kernel.env(env).unwrap().trapframe(), before);
    }

    #[test]
    fn nested_fault_leaves_a_gap() {
        let (mut kernel, env) = kernel_with_handler();
        assert_eq!(kernel.user_store(env, DATA, &[1]), Err(Trap::Upcall));
        let first = kernel.env(env).unwrap().trapframe().esp;

        assert_eq!(kernel.user_store(env, DATA, &[1]), Err(Trap::Upcall));
        let second = kernel.env(env).unwrap().trapframe().esp;
        assert_eq!(second, first - 4 - UTrapframe::SIZE as u32);

        // The inner frame resumes the outer upcall.
        kernel.upcall_return(env).unwrap();
        assert_eq!(kernel.env(env).unwrap().trapframe().esp, first);
    }

    #[test]
    fn exception_stack_overflow_terminates() {
        let (mut kernel, env) = kernel_with_handler();
        let depth = PAGE_SIZE as usize / (UTrapframe::SIZE + 4);
        for _ in 0..depth {
            assert_eq!(kernel.user_store(env, DATA, &[1]), Err(Trap::Upcall));
        }
        assert_eq!(kernel.user_store(env, DATA, &[1]), Err(Trap::Terminated));
        assert!(kernel.env(env).is_none());
    }

    #[test]
    fn fault_on_exception_stack_terminates() {
        let (mut kernel, env) = kernel_with_handler();
        assert_eq!(
            kernel.page_fault(env, layout::UXSTACKBOTTOM + 0x10, FaultCause::USER),
            Trap::Terminated
        );
        assert!(kernel.env(env).is_none());
    }

    #[test]
    fn missing_exception_stack_terminates() {
        let mut kernel = Kernel::new(Config::default().with_frames(32));
        let env = kernel.create_env().unwrap();
        kernel.sys_env_set_pgfault_upcall(env, env, UPCALL).unwrap();
        assert_eq!(kernel.user_store(env, DATA, &[1]), Err(Trap::Terminated));
        assert!(kernel.env(env).is_none());
    }
}
