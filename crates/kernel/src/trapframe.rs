//! Saved register state.

use bitflags::bitflags;
use mm::VirtualAddress;

/// General-purpose registers in `pusha` order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushRegs {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    /// Unused slot for the `esp` pushed by `pusha`.
    pub oesp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
}

impl PushRegs {
    const WORDS: usize = 8;

    fn to_words(self) -> [u32; Self::WORDS] {
        [
            self.edi, self.esi, self.ebp, self.oesp, self.ebx, self.edx, self.ecx, self.eax,
        ]
    }

    fn from_words(words: &[u32]) -> Self {
        Self {
            edi: words[0],
            esi: words[1],
            ebp: words[2],
            oesp: words[3],
            ebx: words[4],
            edx: words[5],
            ecx: words[6],
            eax: words[7],
        }
    }
}

/// User register state saved while an environment is not executing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Trapframe {
    pub regs: PushRegs,
    pub eip: u32,
    pub eflags: u32,
    pub esp: u32,
}

impl Trapframe {
    /// Interrupts enabled.
    pub const FL_IF: u32 = 0x200;

    /// Register state for a fresh environment entering at `entry` with stack `stack`.
    pub fn new(entry: VirtualAddress, stack: VirtualAddress) -> Self {
        Self {
            regs: PushRegs::default(),
            eip: entry.as_u32(),
            eflags: Self::FL_IF,
            esp: stack.as_u32(),
        }
    }
}

bitflags! {
    /// Page-fault error code bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FaultCause: u32 {
        /// The page was present; the access violated its protection.
        const PROTECTION = 0x1;
        const WRITE = 0x2;
        const USER = 0x4;
    }
}

/// The frame pushed onto the exception stack for a page-fault upcall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UTrapframe {
    pub fault_va: VirtualAddress,
    pub err: FaultCause,
    pub regs: PushRegs,
    pub eip: u32,
    pub eflags: u32,
    pub esp: u32,
}

impl UTrapframe {
    const WORDS: usize = 5 + PushRegs::WORDS;

    /// Size in bytes as laid out on the exception stack.
    pub const SIZE: usize = Self::WORDS * 4;

    /// Captures the faulting context.
    pub fn new(fault_va: VirtualAddress, err: FaultCause, tf: &Trapframe) -> Self {
        Self {
            fault_va,
            err,
            regs: tf.regs,
            eip: tf.eip,
            eflags: tf.eflags,
            esp: tf.esp,
        }
    }

    /// Encodes the frame as little-endian words, lowest address first.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut words = [0u32; Self::WORDS];
        words[0] = self.fault_va.as_u32();
        words[1] = self.err.bits();
        words[2..10].copy_from_slice(&self.regs.to_words());
        words[10] = self.eip;
        words[11] = self.eflags;
        words[12] = self.esp;

        let mut bytes = [0u8; Self::SIZE];
        for (chunk, word) in bytes.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        bytes
    }

    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let mut words = [0u32; Self::WORDS];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Self {
            fault_va: VirtualAddress::new(words[0]),
            err: FaultCause::from_bits_retain(words[1]),
            regs: PushRegs::from_words(&words[2..10]),
            eip: words[10],
            eflags: words[11],
            esp: words[12],
        }
    }

    /// Writes the saved context back into `tf`.
    pub fn restore(&self, tf: &mut Trapframe) {
        tf.regs = self.regs;
        tf.eip = self.eip;
        tf.eflags = self.eflags;
        tf.esp = self.esp;
    }
}
