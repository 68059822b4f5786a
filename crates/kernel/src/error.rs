//! Errors returned across the dispatch gate.

use mm::{AllocError, FlagsError, MapError};
use thiserror::Error;

/// The error half of every privileged operation.
///
/// Each variant except [`Error::Terminated`] has a negative errno used in the register ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// The environment does not exist, or the caller has no rights over it.
    #[error("bad environment")]
    BadEnv,
    /// Malformed address, alignment, flags, status or syscall number.
    #[error("invalid parameter")]
    InvalidArgument,
    /// No physical frame was available.
    #[error("out of memory")]
    NoMemory,
    /// Every environment slot is in use.
    #[error("out of environments")]
    NoFreeEnv,
    /// A page fault reached a handler that cannot resolve it.
    #[error("page fault handler cannot resolve this fault")]
    FaultProtocolViolation,
    /// The calling environment was destroyed while the operation ran.
    #[error("environment terminated")]
    Terminated,
}

impl Error {
    /// Returns the value placed in the return register for this error.
    pub const fn errno(self) -> i32 {
        match self {
            Self::BadEnv => -2,
            Self::InvalidArgument => -3,
            Self::NoMemory => -4,
            Self::NoFreeEnv => -5,
            Self::FaultProtocolViolation => -6,
            Self::Terminated => -1,
        }
    }

    /// Decodes a negative return register value.
    pub const fn from_errno(errno: i32) -> Option<Self> {
        match errno {
            -2 => Some(Self::BadEnv),
            -3 => Some(Self::InvalidArgument),
            -4 => Some(Self::NoMemory),
            -5 => Some(Self::NoFreeEnv),
            -6 => Some(Self::FaultProtocolViolation),
            -1 => Some(Self::Terminated),
            _ => None,
        }
    }
}

impl From<AllocError> for Error {
    fn from(err: AllocError) -> Self {
        match err {
            AllocError::OutOfMemory => Self::NoMemory,
            AllocError::TooManyReferences => Self::InvalidArgument,
        }
    }
}

impl From<MapError> for Error {
    fn from(err: MapError) -> Self {
        match err {
            MapError::NoMemory => Self::NoMemory,
            MapError::TooManyReferences | MapError::Unaligned => Self::InvalidArgument,
        }
    }
}

impl From<FlagsError> for Error {
    fn from(_: FlagsError) -> Self {
        Self::InvalidArgument
    }
}

/// Encodes a syscall result for the return register.
pub fn encode_result(result: Result<u32, Error>) -> u32 {
    match result {
        Ok(value) => value,
        Err(err) => err.errno() as u32,
    }
}

/// Decodes a return register written by [`encode_result`].
pub fn decode_result(raw: u32) -> Result<u32, Error> {
    match Error::from_errno(raw as i32) {
        Some(err) => Err(err),
        None => Ok(raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_values_match_abi() {
        assert_eq!(Error::BadEnv.errno(), -2);
        assert_eq!(Error::InvalidArgument.errno(), -3);
        assert_eq!(Error::NoMemory.errno(), -4);
        assert_eq!(Error::NoFreeEnv.errno(), -5);
        assert_eq!(Error::FaultProtocolViolation.errno(), -6);
    }

    #[test]
    fn register_values_decode() {
        assert_eq!(decode_result(0), Ok(0));
        assert_eq!(decode_result(0x1001), Ok(0x1001));
        assert_eq!(decode_result(-4i32 as u32), Err(Error::NoMemory));
        assert_eq!(decode_result(encode_result(Err(Error::BadEnv))), Err(Error::BadEnv));
    }

    #[test]
    fn mm_errors_convert() {
        assert_eq!(Error::from(MapError::NoMemory), Error::NoMemory);
        assert_eq!(Error::from(MapError::Unaligned), Error::InvalidArgument);
        assert_eq!(Error::from(MapError::TooManyReferences), Error::InvalidArgument);
        assert_eq!(Error::from(AllocError::OutOfMemory), Error::NoMemory);
        assert_eq!(Error::from(FlagsError::WritableCopyOnWrite), Error::InvalidArgument);
    }
}
