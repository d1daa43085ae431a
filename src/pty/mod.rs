//! Pseudoterminal pair management
//!
//! This module provides the primary/secondary device pair, the stdio-redirecting
//! fork built on top of it, and explicit ownership transfer of the resulting
//! file descriptors.
//!
//! On targets without PTY support every allocating operation fails with
//! [`PtyError::NotSupported`] before any OS call is made.

mod error_buffer;

#[cfg(unix)]
mod child;
#[cfg(unix)]
mod descriptor;
#[cfg(unix)]
mod unix;
#[cfg(not(unix))]
mod unsupported;

pub use error_buffer::ErrorBuffer;

#[cfg(unix)]
pub use child::PtyChild;
#[cfg(unix)]
pub use nix::errno::Errno;
#[cfg(unix)]
pub use nix::fcntl::OFlag;
#[cfg(unix)]
pub use nix::unistd::Pid;
#[cfg(unix)]
pub use std::os::fd::RawFd;
#[cfg(unix)]
pub use unix::PtyPair;

#[cfg(not(unix))]
pub use unsupported::{Errno, OFlag, OwnedFd, Pid, PtyPair, RawFd};

/// Value reported for a descriptor slot that holds nothing
pub const INVALID_FD: RawFd = -1;

/// Error type for PTY operations
#[derive(Debug, thiserror::Error)]
pub enum PtyError {
    #[error("Pseudoterminals are not supported on this platform")]
    NotSupported,

    #[error("Failed to open PTY primary: {0}")]
    OpenPrimary(#[source] Errno),

    #[error("Failed to grant PTY access: {0}")]
    GrantPt(#[source] Errno),

    #[error("Failed to unlock PTY: {0}")]
    UnlockPt(#[source] Errno),

    #[error("Failed to open PTY secondary {path}: {source}")]
    OpenSecondary {
        path: String,
        #[source]
        source: Errno,
    },

    #[error("Failed to fork: {0}")]
    Fork(#[source] Errno),

    #[error("Failed to create session: {0}")]
    Setsid(#[source] Errno),

    #[error("Failed to set controlling terminal: {0}")]
    SetControllingTerminal(#[source] Errno),

    #[error("Failed to duplicate PTY secondary onto fd {target}: {source}")]
    Dup2 {
        target: RawFd,
        #[source]
        source: Errno,
    },

    #[error("Failed to execute program: {0}")]
    Exec(#[source] Errno),

    #[error("Failed to wait for child: {0}")]
    Wait(#[source] Errno),

    #[error("Failed to read from PTY: {0}")]
    Read(#[source] Errno),

    #[error("Failed to write to PTY: {0}")]
    Write(#[source] Errno),

    #[error("Failed to poll: {0}")]
    Poll(#[source] Errno),

    #[error("Failed to set non-blocking mode: {0}")]
    SetNonBlocking(#[source] Errno),

    #[error("Failed to signal child: {0}")]
    Signal(#[source] Errno),

    #[error("Child process killed by signal: {0}")]
    ChildSignaled(i32),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid spawn configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PtyError {
    /// The OS error code behind this error, if there is one
    pub fn errno(&self) -> Option<Errno> {
        match self {
            PtyError::OpenPrimary(e)
            | PtyError::GrantPt(e)
            | PtyError::UnlockPt(e)
            | PtyError::Fork(e)
            | PtyError::Setsid(e)
            | PtyError::SetControllingTerminal(e)
            | PtyError::Exec(e)
            | PtyError::Wait(e)
            | PtyError::Read(e)
            | PtyError::Write(e)
            | PtyError::Poll(e)
            | PtyError::SetNonBlocking(e)
            | PtyError::Signal(e) => Some(*e),
            PtyError::OpenSecondary { source, .. } | PtyError::Dup2 { source, .. } => {
                Some(*source)
            },
            PtyError::NotSupported
            | PtyError::ChildSignaled(_)
            | PtyError::InvalidArgument(_)
            | PtyError::Config(_)
            | PtyError::Io(_) => None,
        }
    }
}

/// Result type for PTY operations
pub type PtyResult<T> = Result<T, PtyError>;

/// Result of [`PtyPair::fork`]
///
/// One call, two continuations: the originating process sees `Parent` or
/// `ForkFailed`, the new process sees `Child`.
#[derive(Debug)]
pub enum ForkOutcome {
    /// Running in the originating process. The pair still owns the primary,
    /// which is now connected to the child's stdio.
    Parent { child: Pid },

    /// No child was created, either because no primary could be allocated or
    /// because the fork call itself failed.
    ForkFailed { error: PtyError },

    /// Running in the new process.
    ///
    /// `errors` is empty when stdin, stdout and stderr were all redirected to
    /// the secondary. Otherwise it holds the first failure of the redirection
    /// sequence and stdio may be only partly redirected. The child is left
    /// running either way: deciding whether to exec, retry or `_exit` is up to
    /// the caller. This leniency is deliberate, a best-effort child is more
    /// useful to tracers than no child at all.
    Child { errors: ErrorBuffer },
}

impl ForkOutcome {
    /// Whether this is the new process
    pub fn is_child(&self) -> bool {
        matches!(self, ForkOutcome::Child { .. })
    }

    /// The child's PID, in the originating process
    pub fn child_pid(&self) -> Option<Pid> {
        match self {
            ForkOutcome::Parent { child } => Some(*child),
            _ => None,
        }
    }
}
