//! Page table entry flags.
//!
//! Raw entry bits are a [`PteBits`] bitset, but mappings are described by [`PageFlags`], an
//! enumerated capability set. `PageFlags` has no way to express a page that is both writable
//! and copy-on-write, or a shared page that is copy-on-write, so neither can be installed.

use bitflags::bitflags;
use thiserror::Error;

bitflags! {
    /// Raw bits of a page directory or page table entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PteBits: u32 {
        const PRESENT = 0x001;
        const WRITABLE = 0x002;
        const USER = 0x004;
        const WRITE_THROUGH = 0x008;
        const CACHE_DISABLE = 0x010;
        const ACCESSED = 0x020;
        const DIRTY = 0x040;
        const LARGE = 0x080;
        const GLOBAL = 0x100;
        /// Software-available bit: alias this page across duplication.
        const SHARE = 0x400;
        /// Software-available bit: privately copy this page on the next write.
        const COPY_ON_WRITE = 0x800;
    }
}

impl PteBits {
    /// Bits a user environment may pass to page syscalls.
    pub const SYSCALL: Self = Self::PRESENT
        .union(Self::WRITABLE)
        .union(Self::USER)
        .union(Self::SHARE)
        .union(Self::COPY_ON_WRITE);

    /// Bits every user mapping must carry.
    pub const REQUIRED: Self = Self::PRESENT.union(Self::USER);
}

/// Errors produced when decoding raw flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FlagsError {
    /// A mandatory bit (present, or user for syscall flags) is missing.
    #[error("mandatory page flag missing")]
    MissingRequired,
    /// Bits outside the supported set were requested.
    #[error("unsupported page flag bits {0:#x}")]
    UnsupportedBits(u32),
    /// Writable and copy-on-write were requested together.
    #[error("page cannot be both writable and copy-on-write")]
    WritableCopyOnWrite,
    /// Shared and copy-on-write were requested together.
    #[error("shared page cannot be copy-on-write")]
    SharedCopyOnWrite,
}

/// What a mapping lets its environment do with the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protection {
    /// Readable only.
    ReadOnly,
    /// Readable and writable, private to this mapping's frame holders.
    Writable,
    /// Readable; the next write faults and installs a private copy.
    CopyOnWrite,
    /// Intentionally aliased across duplication, never converted to copy-on-write.
    Shared { writable: bool },
}

/// The capability set of a present mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageFlags {
    protection: Protection,
    user: bool,
}

impl PageFlags {
    /// Creates flags with the given protection.
    pub const fn new(protection: Protection, user: bool) -> Self {
        Self { protection, user }
    }

    /// User-accessible, read-only.
    pub const fn read_only() -> Self {
        Self::new(Protection::ReadOnly, true)
    }

    /// User-accessible, writable.
    pub const fn writable() -> Self {
        Self::new(Protection::Writable, true)
    }

    /// User-accessible, copy-on-write.
    pub const fn copy_on_write() -> Self {
        Self::new(Protection::CopyOnWrite, true)
    }

    /// User-accessible, shared across duplication.
    pub const fn shared(writable: bool) -> Self {
        Self::new(Protection::Shared { writable }, true)
    }

    /// The same protection, reachable only from supervisor mode.
    pub const fn supervisor(self) -> Self {
        Self::new(self.protection, false)
    }

    /// Returns the protection of these flags.
    pub const fn protection(self) -> Protection {
        self.protection
    }

    /// Returns whether user mode may access the page.
    pub const fn is_user(self) -> bool {
        self.user
    }

    /// Returns whether the page may be written without faulting.
    pub const fn is_writable(self) -> bool {
        matches!(
            self.protection,
            Protection::Writable | Protection::Shared { writable: true }
        )
    }

    /// Returns whether the page is marked copy-on-write.
    pub const fn is_copy_on_write(self) -> bool {
        matches!(self.protection, Protection::CopyOnWrite)
    }

    /// Returns whether the page is shared across duplication.
    pub const fn is_shared(self) -> bool {
        matches!(self.protection, Protection::Shared { .. })
    }

    /// Returns whether a mapping with `requested` flags may be derived from this one.
    ///
    /// Only write access can be elevated, so a writable request needs a writable source.
    pub const fn grants(self, requested: PageFlags) -> bool {
        !requested.is_writable() || self.is_writable()
    }

    /// Encodes these flags as raw entry bits, including the present bit.
    pub const fn bits(self) -> PteBits {
        let mut bits = PteBits::PRESENT;
        if self.user {
            bits = bits.union(PteBits::USER);
        }
        match self.protection {
            Protection::ReadOnly => bits,
            Protection::Writable => bits.union(PteBits::WRITABLE),
            Protection::CopyOnWrite => bits.union(PteBits::COPY_ON_WRITE),
            Protection::Shared { writable: false } => bits.union(PteBits::SHARE),
            Protection::Shared { writable: true } => {
                bits.union(PteBits::SHARE).union(PteBits::WRITABLE)
            }
        }
    }

    /// Decodes the bits of a present entry, ignoring hardware bookkeeping bits.
    pub fn from_bits(bits: PteBits) -> Result<Self, FlagsError> {
        if !bits.contains(PteBits::PRESENT) {
            return Err(FlagsError::MissingRequired);
        }

        let writable = bits.contains(PteBits::WRITABLE);
        let cow = bits.contains(PteBits::COPY_ON_WRITE);
        let protection = if bits.contains(PteBits::SHARE) {
            if cow {
                return Err(FlagsError::SharedCopyOnWrite);
            }
            Protection::Shared { writable }
        } else if cow {
            if writable {
                return Err(FlagsError::WritableCopyOnWrite);
            }
            Protection::CopyOnWrite
        } else if writable {
            Protection::Writable
        } else {
            Protection::ReadOnly
        };

        Ok(Self::new(protection, bits.contains(PteBits::USER)))
    }

    /// Decodes flags passed by a user environment to a page syscall.
    ///
    /// Present and user are mandatory and nothing outside [`PteBits::SYSCALL`] is accepted.
    pub fn from_syscall(raw: u32) -> Result<Self, FlagsError> {
        let unsupported = raw & !PteBits::SYSCALL.bits();
        if unsupported != 0 {
            return Err(FlagsError::UnsupportedBits(unsupported));
        }
        let bits = PteBits::from_bits_retain(raw);
        if !bits.contains(PteBits::REQUIRED) {
            return Err(FlagsError::MissingRequired);
        }
        Self::from_bits(bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_writable_copy_on_write() {
        let raw = (PteBits::REQUIRED | PteBits::WRITABLE | PteBits::COPY_ON_WRITE).bits();
        assert_eq!(
            PageFlags::from_syscall(raw),
            Err(FlagsError::WritableCopyOnWrite)
        );
    }

    #[test]
    fn rejects_shared_copy_on_write() {
        let raw = (PteBits::REQUIRED | PteBits::SHARE | PteBits::COPY_ON_WRITE).bits();
        assert_eq!(
            PageFlags::from_syscall(raw),
            Err(FlagsError::SharedCopyOnWrite)
        );
    }

    #[test]
    fn syscall_flags_need_present_and_user() {
        assert_eq!(
            PageFlags::from_syscall(PteBits::PRESENT.bits()),
            Err(FlagsError::MissingRequired)
        );
        assert_eq!(
            PageFlags::from_syscall((PteBits::REQUIRED | PteBits::GLOBAL).bits()),
            Err(FlagsError::UnsupportedBits(PteBits::GLOBAL.bits()))
        );
    }

    #[test]
    fn write_access_is_never_elevated() {
        assert!(PageFlags::writable().grants(PageFlags::copy_on_write()));
        assert!(PageFlags::copy_on_write().grants(PageFlags::copy_on_write()));
        assert!(!PageFlags::read_only().grants(PageFlags::writable()));
        assert!(!PageFlags::copy_on_write().grants(PageFlags::writable()));
        assert!(PageFlags::shared(true).grants(PageFlags::shared(true)));
    }
}
