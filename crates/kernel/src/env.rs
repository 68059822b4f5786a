//! Environments and the environment table.
//!
//! An environment is the unit of isolation: one address space plus the register state of the
//! single thread running in it. Environments are named by [`EnvId`], a slot index tagged with
//! a generation counter, so an id kept after its environment is destroyed never resolves to
//! whatever reuses the slot.

use alloc::vec::Vec;
use core::fmt;

use mm::{PageDirectory, PhysicalMemory, VirtualAddress};

use crate::{Error, Trapframe};

/// log2 of the size of the id space.
pub const LOG2NENV: u32 = 10;

/// Largest number of environment slots an [`EnvId`] can address.
pub const NENV: usize = 1 << LOG2NENV;

/// Shift of the generation counter within an [`EnvId`].
const GENERATION_SHIFT: u32 = 12;

/// A generation-tagged environment identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct EnvId(u32);

impl EnvId {
    /// The "self" alias accepted by syscalls; also what exofork returns to the child.
    pub const SELF: Self = Self(0);

    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the table slot this id names.
    #[inline]
    pub const fn index(self) -> usize {
        (self.0 as usize) & (NENV - 1)
    }

    /// Returns the generation counter.
    #[inline]
    pub const fn generation(self) -> u32 {
        self.0 >> GENERATION_SHIFT
    }

    #[inline]
    pub const fn is_self(self) -> bool {
        self.0 == 0
    }

    /// Computes the id for the next occupant of this id's slot.
    ///
    /// The result is always positive as an `i32`, so it never collides with an errno.
    fn next_generation(self, index: usize) -> Self {
        let mut generation =
            self.0.wrapping_add(1 << GENERATION_SHIFT) & !((NENV as u32) - 1);
        if generation == 0 || generation > i32::MAX as u32 {
            generation = 1 << GENERATION_SHIFT;
        }
        Self(generation | index as u32)
    }
}

impl fmt::Debug for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EnvId({:08x})", self.0)
    }
}

impl fmt::Display for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Execution status; the raw values are the `set_status` ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum EnvStatus {
    Free = 0,
    Dying = 1,
    Runnable = 2,
    Running = 3,
    NotRunnable = 4,
}

impl TryFrom<u32> for EnvStatus {
    type Error = Error;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(Self::Free),
            1 => Ok(Self::Dying),
            2 => Ok(Self::Runnable),
            3 => Ok(Self::Running),
            4 => Ok(Self::NotRunnable),
            _ => Err(Error::InvalidArgument),
        }
    }
}

/// A live environment.
#[derive(Debug)]
pub struct Env {
    pub(crate) id: EnvId,
    pub(crate) parent: Option<EnvId>,
    pub(crate) status: EnvStatus,
    pub(crate) directory: PageDirectory,
    pub(crate) pgfault_upcall: Option<VirtualAddress>,
    pub(crate) trapframe: Trapframe,
    pub(crate) upcalls: u64,
}

impl Env {
    pub fn id(&self) -> EnvId {
        self.id
    }

    pub fn parent(&self) -> Option<EnvId> {
        self.parent
    }

    pub fn status(&self) -> EnvStatus {
        self.status
    }

    pub fn directory(&self) -> &PageDirectory {
        &self.directory
    }

    pub fn pgfault_upcall(&self) -> Option<VirtualAddress> {
        self.pgfault_upcall
    }

    pub fn trapframe(&self) -> &Trapframe {
        &self.trapframe
    }

    /// Number of page faults delivered to the upcall so far.
    pub fn upcalls(&self) -> u64 {
        self.upcalls
    }

    /// Returns the read-only metadata this environment may see about itself.
    pub fn info(&self) -> EnvInfo {
        EnvInfo {
            id: self.id,
            parent: self.parent,
            status: self.status,
            pgfault_upcall: self.pgfault_upcall,
        }
    }
}

/// Environment metadata mirrored read-only into user space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvInfo {
    pub id: EnvId,
    pub parent: Option<EnvId>,
    pub status: EnvStatus,
    pub pgfault_upcall: Option<VirtualAddress>,
}

#[derive(Debug)]
struct Slot {
    /// Id of the most recent occupant, kept after it is freed to advance the generation.
    last_id: EnvId,
    env: Option<Env>,
}

/// Fixed-capacity table of environments.
#[derive(Debug)]
pub struct EnvTable {
    slots: Vec<Slot>,
    /// Free slot indices; the next one handed out is at the end.
    free: Vec<usize>,
}

impl EnvTable {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(NENV);
        Self {
            slots: (0..capacity)
                .map(|_| Slot {
                    last_id: EnvId::SELF,
                    env: None,
                })
                .collect(),
            free: (0..capacity).rev().collect(),
        }
    }

    /// Returns the number of live environments.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Creates an environment with an empty address space and `NotRunnable` status.
    pub fn alloc(
        &mut self,
        parent: Option<EnvId>,
        memory: &mut PhysicalMemory,
    ) -> Result<EnvId, Error> {
        let index = *self.free.last().ok_or(Error::NoFreeEnv)?;
        let directory = PageDirectory::new(memory)?;
        self.free.pop();

        let slot = &mut self.slots[index];
        let id = slot.last_id.next_generation(index);
        slot.last_id = id;
        slot.env = Some(Env {
            id,
            parent,
            status: EnvStatus::NotRunnable,
            directory,
            pgfault_upcall: None,
            trapframe: Trapframe::default(),
            upcalls: 0,
        });
        Ok(id)
    }

    /// Returns the live environment named by `id`; stale generations do not match.
    pub fn get(&self, id: EnvId) -> Option<&Env> {
        self.slots
            .get(id.index())?
            .env
            .as_ref()
            .filter(|env| env.id == id)
    }

    pub fn get_mut(&mut self, id: EnvId) -> Option<&mut Env> {
        self.slots
            .get_mut(id.index())?
            .env
            .as_mut()
            .filter(|env| env.id == id)
    }

    /// Resolves a syscall environment argument on behalf of `caller`.
    ///
    /// [`EnvId::SELF`] names the caller. With `check_perm`, the target must be the caller or
    /// one of its immediate children.
    pub fn resolve(&self, caller: EnvId, id: EnvId, check_perm: bool) -> Result<EnvId, Error> {
        if id.is_self() {
            return self.get(caller).map(Env::id).ok_or(Error::BadEnv);
        }

        let env = self.get(id).ok_or(Error::BadEnv)?;
        if check_perm && env.id != caller && env.parent != Some(caller) {
            return Err(Error::BadEnv);
        }
        Ok(env.id)
    }

    /// Takes the environment out of its slot and frees the slot.
    pub fn remove(&mut self, id: EnvId) -> Option<Env> {
        let env = self.slots.get_mut(id.index())?.env.take_if(|env| env.id == id)?;
        self.free.push(id.index());
        Some(env)
    }

    /// Iterates over live environments in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Env> {
        self.slots.iter().filter_map(|slot| slot.env.as_ref())
    }
}
