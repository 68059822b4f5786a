//! Checks and copies on user memory.

use mm::{PAGE_SIZE, PageEntry, PteBits, VirtualAddress, layout};

use crate::{EnvId, Error, Kernel};

impl Kernel {
    /// Checks that `env` may access `[va, va + len)` with `perm | USER`.
    ///
    /// Every page the range touches must be present, below `ULIM` and carry the requested
    /// bits. On failure returns the first offending address: `va` itself if the first page
    /// fails, otherwise the start of the failing page. A range running past the end of the
    /// address space fails. An empty range touches no page and always passes.
    pub fn user_mem_check(
        &self,
        env: EnvId,
        va: VirtualAddress,
        len: usize,
        perm: PteBits,
    ) -> Result<(), VirtualAddress> {
        let Some(view) = self.view(env) else {
            return Err(va);
        };
        if len == 0 {
            return Ok(());
        }
        let required = perm | PteBits::PRESENT | PteBits::USER;
        let page_size = PAGE_SIZE as u64;

        let start = va.as_u32() as u64;
        let end = start + len as u64;
        let mut page = start & !(page_size - 1);
        while page < end {
            let addr = VirtualAddress::new(page.max(start) as u32);
            if page >= layout::ULIM.as_u32() as u64 {
                return Err(addr);
            }
            let allowed = view
                .entry(addr)
                .is_some_and(|entry| entry.bits().contains(required));
            if !allowed {
                return Err(addr);
            }
            page += page_size;
        }
        Ok(())
    }

    /// Like [`Kernel::user_mem_check`], but destroys `env` on failure.
    pub fn user_mem_assert(
        &mut self,
        env: EnvId,
        va: VirtualAddress,
        len: usize,
        perm: PteBits,
    ) -> Result<(), Error> {
        if let Err(bad) = self.user_mem_check(env, va, len, perm | PteBits::USER) {
            log::warn!("[{}] user_mem_check assertion failure for va {}", env, bad);
            self.destroy_env(env, env);
            return Err(Error::Terminated);
        }
        Ok(())
    }

    /// Reads `buf.len()` bytes at `va` in `env` with kernel privilege.
    ///
    /// Only page presence is checked; callers validate user permissions first.
    pub(crate) fn copy_in(
        &self,
        env: EnvId,
        va: VirtualAddress,
        buf: &mut [u8],
    ) -> Result<(), Error> {
        let env = self.envs.get(env).ok_or(Error::BadEnv)?;
        let mut done = 0;
        while done < buf.len() {
            let addr = va.checked_add(done as u32).ok_or(Error::InvalidArgument)?;
            let frame = env
                .directory
                .lookup(&self.memory, addr)
                .and_then(PageEntry::frame)
                .ok_or(Error::InvalidArgument)?;
            let offset = addr.page_offset();
            let count = (PAGE_SIZE as usize - offset).min(buf.len() - done);
            buf[done..done + count]
                .copy_from_slice(&self.memory.page(frame)[offset..offset + count]);
            done += count;
        }
        Ok(())
    }

    /// Writes `bytes` at `va` in `env` with kernel privilege.
    pub(crate) fn copy_out(
        &mut self,
        env: EnvId,
        va: VirtualAddress,
        bytes: &[u8],
    ) -> Result<(), Error> {
        let env = self.envs.get(env).ok_or(Error::BadEnv)?;
        let mut done = 0;
        while done < bytes.len() {
            let addr = va.checked_add(done as u32).ok_or(Error::InvalidArgument)?;
            let frame = env
                .directory
                .lookup(&self.memory, addr)
                .and_then(PageEntry::frame)
                .ok_or(Error::InvalidArgument)?;
            let offset = addr.page_offset();
            let count = (PAGE_SIZE as usize - offset).min(bytes.len() - done);
            self.memory.page_mut(frame)[offset..offset + count]
                .copy_from_slice(&bytes[done..done + count]);
            done += count;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;

    fn kernel_with_env() -> (Kernel, EnvId) {
        let mut kernel = Kernel::new(Config::default().with_frames(32));
        let env = kernel.create_env().unwrap();
        (kernel, env)
    }

    #[test]
    fn empty_range_is_always_allowed() {
        let (kernel, env) = kernel_with_env();
        assert_eq!(
            kernel.user_mem_check(env, VirtualAddress::new(0x1234), 0, PteBits::USER),
            Ok(())
        );
    }

    #[test]
    fn reports_first_bad_address() {
        let (mut kernel, env) = kernel_with_env();
        let base = VirtualAddress::new(0x0080_0000);
        kernel.sys_page_alloc(env, env, base, 0x5).unwrap();

        // Starts mid-page, ends in the unmapped next page.
        assert_eq!(
            kernel.user_mem_check(env, base + 0x10, PAGE_SIZE as usize, PteBits::USER),
            Err(base + PAGE_SIZE)
        );
        // Whole first page is fine read-only but not writable.
        assert_eq!(
            kernel.user_mem_check(env, base + 0x10, 16, PteBits::WRITABLE),
            Err(base + 0x10)
        );
        assert_eq!(kernel.user_mem_check(env, base, 16, PteBits::USER), Ok(()));
    }

    #[test]
    fn kernel_addresses_and_overflow_are_rejected() {
        let (kernel, env) = kernel_with_env();
        assert_eq!(
            kernel.user_mem_check(env, layout::ULIM, 1, PteBits::USER),
            Err(layout::ULIM)
        );
        let top = VirtualAddress::new(0xFFFF_FFF0);
        assert_eq!(kernel.user_mem_check(env, top, 0x100, PteBits::USER), Err(top));
    }

    #[test]
    fn assert_destroys_on_failure() {
        let (mut kernel, env) = kernel_with_env();
        assert_eq!(
            kernel.user_mem_assert(env, VirtualAddress::new(0x1000), 4, PteBits::USER),
            Err(Error::Terminated)
        );
        assert!(kernel.env(env).is_none());
    }

    #[test]
    fn copies_span_pages() {
        let (mut kernel, env) = kernel_with_env();
        let base = VirtualAddress::new(0x0080_0000);
        kernel.sys_page_alloc(env, env, base, 0x7).unwrap();
        kernel.sys_page_alloc(env, env, base + PAGE_SIZE, 0x7).unwrap();

        let at = base + (PAGE_SIZE - 3);
        kernel.copy_out(env, at, b"abcdef").unwrap();
        let mut buf = [0u8; 6];
        kernel.copy_in(env, at, &mut buf).unwrap();
        assert_eq!(&buf, b"abcdef");
    }
}
