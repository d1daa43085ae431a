//! PTY pair for targets without pseudoterminal support
//!
//! Mirrors the Unix API so callers compile everywhere. Allocation fails with
//! [`PtyError::NotSupported`] and no OS call is ever made.

use std::fmt;
use std::ops::BitOr;

use super::{ForkOutcome, PtyError, PtyResult, INVALID_FD};

pub type RawFd = i32;

/// Placeholder for an OS error code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Errno(pub i32);

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "os error {}", self.0)
    }
}

impl std::error::Error for Errno {}

/// Owned descriptor handed out by the take methods; never constructed here
#[derive(Debug)]
pub enum OwnedFd {}

/// Process identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pid(i32);

impl Pid {
    pub fn from_raw(pid: i32) -> Self {
        Pid(pid)
    }

    pub fn as_raw(self) -> i32 {
        self.0
    }
}

/// Open flags, accepted and ignored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OFlag(i32);

impl OFlag {
    pub const O_RDWR: OFlag = OFlag(0x2);
    pub const O_NOCTTY: OFlag = OFlag(0x100);
    pub const O_CLOEXEC: OFlag = OFlag(0x80000);

    pub fn empty() -> Self {
        OFlag(0)
    }

    pub fn bits(self) -> i32 {
        self.0
    }
}

impl BitOr for OFlag {
    type Output = OFlag;

    fn bitor(self, rhs: OFlag) -> OFlag {
        OFlag(self.0 | rhs.0)
    }
}

/// A pseudoterminal pair that can never hold a descriptor
#[derive(Debug, Default)]
pub struct PtyPair {
    _private: (),
}

impl PtyPair {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_first_available_primary(&mut self, _flags: OFlag) -> PtyResult<()> {
        Err(PtyError::NotSupported)
    }

    /// # Panics
    ///
    /// Always, since a primary can never be held here.
    pub fn secondary_name(&self) -> String {
        panic!("secondary_name() requires an open PTY primary");
    }

    /// # Panics
    ///
    /// Always, since a primary can never be held here.
    pub fn open_secondary(&mut self, _flags: OFlag) -> PtyResult<()> {
        let _ = self.secondary_name();
        Err(PtyError::NotSupported)
    }

    pub fn fork(&mut self) -> ForkOutcome {
        ForkOutcome::ForkFailed {
            error: PtyError::NotSupported,
        }
    }

    pub fn primary_fd(&self) -> RawFd {
        INVALID_FD
    }

    pub fn secondary_fd(&self) -> RawFd {
        INVALID_FD
    }

    pub fn release_primary_fd(&mut self) -> RawFd {
        INVALID_FD
    }

    pub fn release_secondary_fd(&mut self) -> RawFd {
        INVALID_FD
    }

    pub fn take_primary(&mut self) -> Option<OwnedFd> {
        None
    }

    pub fn take_secondary(&mut self) -> Option<OwnedFd> {
        None
    }

    pub fn close_primary(&mut self) {}

    pub fn close_secondary(&mut self) {}

    pub fn reset(&mut self) {}

    pub fn has_primary(&self) -> bool {
        false
    }

    pub fn has_secondary(&self) -> bool {
        false
    }
}
