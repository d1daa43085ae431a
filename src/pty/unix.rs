//! Unix PTY pair implementation
//!
//! Allocates pseudoterminals with the POSIX PTY API and forks children whose
//! stdio is routed through the secondary side.
//!
//! - posix_openpt() to open the primary
//! - grantpt() to set permissions on the secondary
//! - unlockpt() to unlock the secondary
//! - ptsname_r()/ptsname() to get the secondary device path

use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};

use nix::errno::Errno;
use nix::fcntl::{open, OFlag};
use nix::libc::{self, STDERR_FILENO, STDIN_FILENO, STDOUT_FILENO};
use nix::pty::{grantpt, posix_openpt, unlockpt, PtyMaster};
use nix::sys::stat::Mode;
use nix::unistd::{dup2, fork, setsid, ForkResult};

use super::descriptor::Descriptor;
use super::{ErrorBuffer, ForkOutcome, PtyError, PtyResult};

/// A pseudoterminal primary/secondary pair
///
/// Each side is either empty or owns exactly one open descriptor. Owned
/// descriptors are closed when the pair is dropped unless they were handed
/// out first with one of the release or take methods.
#[derive(Debug, Default)]
pub struct PtyPair {
    /// The primary (controlling) side
    primary: Descriptor<PtyMaster>,
    /// The secondary (terminal) side
    secondary: Descriptor<OwnedFd>,
}

impl PtyPair {
    /// Create an empty pair
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next available primary device
    ///
    /// Grants access to and unlocks the matching secondary so it can be opened
    /// by any process.
    ///
    /// A previously held primary is not closed up front. The new primary is
    /// allocated first and the old one is closed only once that succeeded, so
    /// the two never share a descriptor number and a failed call leaves the
    /// old primary in place.
    pub fn open_first_available_primary(&mut self, flags: OFlag) -> PtyResult<()> {
        let primary = posix_openpt(flags).map_err(PtyError::OpenPrimary)?;

        // Dropping `primary` on the error paths closes it
        grantpt(&primary).map_err(PtyError::GrantPt)?;
        unlockpt(&primary).map_err(PtyError::UnlockPt)?;

        tracing::debug!(fd = primary.as_raw_fd(), "allocated PTY primary");
        self.primary.replace(primary);
        Ok(())
    }

    /// Path of the secondary device belonging to the held primary
    ///
    /// # Panics
    ///
    /// Panics if no primary is held, or if the OS cannot name the secondary
    /// of a primary it handed out.
    pub fn secondary_name(&self) -> String {
        let primary = self
            .primary
            .get()
            .expect("secondary_name() requires an open PTY primary");
        match ptsname::resolve(primary) {
            Ok(name) => name,
            Err(e) => panic!("failed to name PTY secondary of fd {}: {}", primary.as_raw_fd(), e),
        }
    }

    /// Open the secondary device of the held primary
    ///
    /// Any previously held secondary is closed first. The open is retried if
    /// it is interrupted by a signal.
    ///
    /// # Panics
    ///
    /// Panics if no primary is held.
    pub fn open_secondary(&mut self, flags: OFlag) -> PtyResult<()> {
        self.secondary.close();

        let path = self.secondary_name();
        let fd = loop {
            match open(path.as_str(), flags, Mode::empty()) {
                Err(Errno::EINTR) => continue,
                Err(source) => return Err(PtyError::OpenSecondary { path, source }),
                Ok(fd) => break fd,
            }
        };

        // SAFETY: open() just returned this descriptor and nothing else owns it
        self.secondary.replace(unsafe { OwnedFd::from_raw_fd(fd) });
        Ok(())
    }

    /// Fork a child whose stdin, stdout and stderr are the secondary device
    ///
    /// A fresh read/write, close-on-exec primary is allocated first; if that
    /// fails no child is created. In the parent the primary stays owned by
    /// this pair and gives read/write access to the child's stdio.
    ///
    /// In the child the process becomes a session leader, opens the secondary,
    /// closes its copy of the primary, acquires the secondary as controlling
    /// terminal and duplicates it onto fds 0, 1 and 2. Failures along the way
    /// are collected in the returned [`ErrorBuffer`] (first error wins) and
    /// never abort the child; see [`ForkOutcome::Child`].
    ///
    /// Nothing is logged in the child branch.
    pub fn fork(&mut self) -> ForkOutcome {
        self.fork_with_secondary_flags(OFlag::O_RDWR)
    }

    pub(crate) fn fork_with_secondary_flags(&mut self, secondary_flags: OFlag) -> ForkOutcome {
        if let Err(error) = self.open_first_available_primary(OFlag::O_RDWR | OFlag::O_CLOEXEC) {
            return ForkOutcome::ForkFailed { error };
        }

        // SAFETY: the child branch only touches descriptors and this pair
        // before handing control back to the caller
        match unsafe { fork() } {
            Err(e) => {
                tracing::debug!(error = %e, "fork failed");
                ForkOutcome::ForkFailed {
                    error: PtyError::Fork(e),
                }
            },
            Ok(ForkResult::Parent { child }) => {
                tracing::debug!(pid = child.as_raw(), primary = self.primary.raw(), "forked PTY child");
                ForkOutcome::Parent { child }
            },
            Ok(ForkResult::Child) => {
                let mut errors = ErrorBuffer::new();
                self.setup_child(secondary_flags, &mut errors);
                ForkOutcome::Child { errors }
            },
        }
    }

    /// Runs in the forked child
    fn setup_child(&mut self, secondary_flags: OFlag, errors: &mut ErrorBuffer) {
        if let Err(e) = setsid() {
            errors.record_first(PtyError::Setsid(e));
        }

        // A secondary that cannot be opened is the failure to report, even
        // over an earlier setsid() error
        if let Err(e) = self.open_secondary(secondary_flags) {
            errors.set(e);
            return;
        }

        // The primary is close-on-exec already, but the parent must be its
        // only holder from here on.
        self.primary.close();

        let secondary = self.secondary.raw();
        if let Err(e) = acquire_controlling_terminal(secondary) {
            errors.record_first(e);
        }
        redirect_stdio(secondary, &[STDIN_FILENO, STDOUT_FILENO, STDERR_FILENO], errors);
    }

    /// The primary descriptor, or [`INVALID_FD`](super::INVALID_FD)
    ///
    /// Ownership stays with this pair.
    pub fn primary_fd(&self) -> RawFd {
        self.primary.raw()
    }

    /// The secondary descriptor, or [`INVALID_FD`](super::INVALID_FD)
    ///
    /// Ownership stays with this pair.
    pub fn secondary_fd(&self) -> RawFd {
        self.secondary.raw()
    }

    /// Release ownership of the primary without closing it
    ///
    /// Returns [`INVALID_FD`](super::INVALID_FD) if no primary is held. The
    /// caller becomes responsible for closing the returned descriptor.
    pub fn release_primary_fd(&mut self) -> RawFd {
        let fd = self.primary.release();
        tracing::trace!(fd, "released PTY primary");
        fd
    }

    /// Release ownership of the secondary without closing it
    ///
    /// Returns [`INVALID_FD`](super::INVALID_FD) if no secondary is held. The
    /// caller becomes responsible for closing the returned descriptor.
    pub fn release_secondary_fd(&mut self) -> RawFd {
        let fd = self.secondary.release();
        tracing::trace!(fd, "released PTY secondary");
        fd
    }

    /// Move the primary out of this pair as an owned descriptor
    pub fn take_primary(&mut self) -> Option<OwnedFd> {
        self.primary
            .take()
            // SAFETY: into_raw_fd() gives up PtyMaster's ownership of the fd
            .map(|primary| unsafe { OwnedFd::from_raw_fd(primary.into_raw_fd()) })
    }

    /// Move the secondary out of this pair as an owned descriptor
    pub fn take_secondary(&mut self) -> Option<OwnedFd> {
        self.secondary.take()
    }

    /// Close the primary if one is held
    pub fn close_primary(&mut self) {
        self.primary.close();
    }

    /// Close the secondary if one is held
    pub fn close_secondary(&mut self) {
        self.secondary.close();
    }

    /// Close both sides, returning the pair to its empty state
    pub fn reset(&mut self) {
        self.primary.close();
        self.secondary.close();
    }

    pub fn has_primary(&self) -> bool {
        self.primary.is_valid()
    }

    pub fn has_secondary(&self) -> bool {
        self.secondary.is_valid()
    }
}

/// Make `fd` the controlling terminal of the calling session leader
#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "openbsd",
    target_os = "netbsd"
))]
fn acquire_controlling_terminal(fd: RawFd) -> PtyResult<()> {
    // SAFETY: TIOCSCTTY takes no pointer argument
    let ret = unsafe { libc::ioctl(fd, libc::TIOCSCTTY as _, 0) };
    Errno::result(ret)
        .map(drop)
        .map_err(PtyError::SetControllingTerminal)
}

/// Opening the secondary after setsid() already made it the controlling
/// terminal on these targets.
#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "openbsd",
    target_os = "netbsd"
)))]
fn acquire_controlling_terminal(_fd: RawFd) -> PtyResult<()> {
    Ok(())
}

/// Duplicate `source` onto each of `targets` in order
///
/// Every target is attempted; the first failure is recorded in `errors`.
pub(crate) fn redirect_stdio(source: RawFd, targets: &[RawFd], errors: &mut ErrorBuffer) {
    for &target in targets {
        if let Err(e) = dup2(source, target) {
            errors.record_first(PtyError::Dup2 { target, source: e });
        }
    }
}

/// Secondary device naming
///
/// `ptsname` hands back a pointer into a static buffer, so where nix offers no
/// reentrant variant every call goes through `PTSNAME_LOCK`.
mod ptsname {
    use nix::pty::PtyMaster;

    #[cfg(any(target_os = "linux", target_os = "android"))]
    pub(super) fn resolve(primary: &PtyMaster) -> nix::Result<String> {
        nix::pty::ptsname_r(primary)
    }

    /// Serializes access to the static buffer behind `ptsname(3)`
    ///
    /// Guards nothing else.
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    pub(super) static PTSNAME_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    pub(super) fn resolve(primary: &PtyMaster) -> nix::Result<String> {
        let _guard = PTSNAME_LOCK
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        // SAFETY: PTSNAME_LOCK is held until the name has been copied out
        unsafe { nix::pty::ptsname(primary) }
    }
}
