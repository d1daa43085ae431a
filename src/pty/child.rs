//! Child processes running on a PTY
//!
//! [`PtyChild`] takes over the primary side of a [`PtyPair`] after a fork and
//! manages the child from then on: I/O through the primary, signals, and
//! reaping.

use std::ffi::CString;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, IntoRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::libc::{self, STDERR_FILENO};
use nix::poll::{poll, PollFd, PollFlags};
use nix::sys::signal::{self, SigHandler, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{chdir, execve, read, write, Pid};

use super::{ErrorBuffer, ForkOutcome, PtyError, PtyPair, PtyResult};
use crate::config::SpawnConfig;

/// Exit status of a child whose stdio could not be redirected
const EXIT_REDIRECT_FAILED: i32 = 126;
/// Exit status of a child whose program could not be executed
const EXIT_EXEC_FAILED: i32 = 127;

/// A child process whose stdio is the secondary side of a PTY
pub struct PtyChild {
    /// The PTY primary, connected to the child's stdin/stdout/stderr
    primary: OwnedFd,
    /// The child process ID
    pid: Pid,
    /// How the child terminated, once it has been reaped
    status: Option<WaitStatus>,
}

impl PtyChild {
    /// Fork and exec `config` on a fresh PTY
    ///
    /// Everything the child needs is prepared before forking. If the child
    /// cannot redirect its stdio it reports the reason on its stderr and exits
    /// with status 126; if exec fails it exits with status 127.
    pub fn spawn(config: &SpawnConfig) -> PtyResult<Self> {
        let command = PreparedCommand::new(config)?;
        let mut pair = PtyPair::new();

        match pair.fork() {
            ForkOutcome::Parent { child } => {
                let primary = pair.take_primary().ok_or_else(|| {
                    PtyError::Io(io::Error::new(
                        io::ErrorKind::NotFound,
                        "PTY primary missing after fork",
                    ))
                })?;
                tracing::info!(pid = child.as_raw(), program = %config.program, "spawned PTY child");
                Ok(Self::from_parts(primary, child))
            },
            ForkOutcome::ForkFailed { error } => Err(error),
            ForkOutcome::Child { errors } => {
                if !errors.is_empty() {
                    exit_with_message(&errors, EXIT_REDIRECT_FAILED);
                }
                // stdio now refers to the secondary; drop the extra descriptor
                // unless it already is one of fds 0-2
                if pair.secondary_fd() > STDERR_FILENO {
                    pair.close_secondary();
                } else {
                    let _ = pair.take_secondary().map(IntoRawFd::into_raw_fd);
                }
                command.exec()
            },
        }
    }

    /// Take over an already forked child and the primary connected to it
    pub fn from_parts(primary: OwnedFd, pid: Pid) -> Self {
        Self {
            primary,
            pid,
            status: None,
        }
    }

    /// Get the child process ID
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Get the raw file descriptor of the PTY primary
    pub fn primary_fd(&self) -> RawFd {
        self.primary.as_raw_fd()
    }

    /// Check if the child process is still running
    ///
    /// Reaps the child if it has terminated; the status is kept for
    /// [`wait`](Self::wait) and [`try_wait`](Self::try_wait).
    pub fn is_alive(&mut self) -> bool {
        if self.status.is_some() {
            return false;
        }

        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(status @ (WaitStatus::Exited(..) | WaitStatus::Signaled(..))) => {
                self.record(status);
                false
            },
            Ok(_) => true,
            Err(Errno::EINTR) => true,
            Err(e) => {
                self.reaped_elsewhere(e);
                false
            },
        }
    }

    /// Reap the child if it has exited
    ///
    /// Returns `Ok(None)` while it is still running.
    pub fn try_wait(&mut self) -> PtyResult<Option<i32>> {
        if let Some(status) = self.status {
            return exit_code(status).map(Some);
        }

        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(status @ (WaitStatus::Exited(..) | WaitStatus::Signaled(..))) => {
                self.record(status);
                exit_code(status).map(Some)
            },
            Ok(_) | Err(Errno::EINTR) => Ok(None),
            Err(Errno::ECHILD) => {
                self.reaped_elsewhere(Errno::ECHILD);
                Ok(Some(0))
            },
            Err(e) => Err(PtyError::Wait(e)),
        }
    }

    /// Wait for the child process to exit
    ///
    /// Returns the exit code, or [`PtyError::ChildSignaled`] if the child
    /// was killed by a signal. Once the child has been reaped the same result
    /// is returned on every call.
    pub fn wait(&mut self) -> PtyResult<i32> {
        loop {
            if let Some(status) = self.status {
                return exit_code(status);
            }

            match waitpid(self.pid, None) {
                Err(Errno::EINTR) => continue,
                Err(Errno::ECHILD) => self.reaped_elsewhere(Errno::ECHILD),
                Err(e) => return Err(PtyError::Wait(e)),
                Ok(status @ (WaitStatus::Exited(..) | WaitStatus::Signaled(..))) => {
                    self.record(status)
                },
                // Stopped or continued; keep waiting for termination
                Ok(_) => continue,
            }
        }
    }

    fn record(&mut self, status: WaitStatus) {
        match status {
            WaitStatus::Exited(_, code) => {
                tracing::debug!(pid = self.pid.as_raw(), code, "PTY child exited");
            },
            WaitStatus::Signaled(_, signal, _) => {
                tracing::debug!(pid = self.pid.as_raw(), ?signal, "PTY child killed");
            },
            _ => {},
        }
        self.status = Some(status);
    }

    /// The child can no longer be waited for, so its real status is lost
    fn reaped_elsewhere(&mut self, error: Errno) {
        tracing::warn!(pid = self.pid.as_raw(), %error, "PTY child status unavailable");
        self.status = Some(WaitStatus::Exited(self.pid, 0));
    }

    /// Read from the PTY primary
    ///
    /// Returns 0 if no data is available in non-blocking mode, or once the
    /// child side has been closed (Linux reports that as `EIO`).
    pub fn read(&self, buf: &mut [u8]) -> PtyResult<usize> {
        match read(self.primary.as_raw_fd(), buf) {
            Ok(n) => Ok(n),
            // EAGAIN and EWOULDBLOCK are the same value on Linux
            Err(Errno::EAGAIN) | Err(Errno::EIO) => Ok(0),
            Err(e) => Err(PtyError::Read(e)),
        }
    }

    /// Write to the PTY primary
    ///
    /// Returns the number of bytes written.
    pub fn write(&self, data: &[u8]) -> PtyResult<usize> {
        write(self.primary.as_raw_fd(), data).map_err(PtyError::Write)
    }

    /// Write all data to the PTY primary
    pub fn write_all(&self, mut data: &[u8]) -> PtyResult<()> {
        while !data.is_empty() {
            match self.write(data) {
                Ok(n) => data = &data[n..],
                Err(PtyError::Write(Errno::EINTR)) => {},
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Poll for data available to read
    ///
    /// Returns true if data is available or the child side hung up, false if
    /// the timeout expired.
    pub fn poll_read(&self, timeout_ms: i32) -> PtyResult<bool> {
        let fd = self.primary.as_fd();
        let mut fds = [PollFd::new(&fd, PollFlags::POLLIN)];
        let n = poll(&mut fds, timeout_ms).map_err(PtyError::Poll)?;
        Ok(n > 0
            && fds[0]
                .revents()
                .is_some_and(|r| r.intersects(PollFlags::POLLIN | PollFlags::POLLHUP)))
    }

    /// Switch the PTY primary between blocking and non-blocking mode
    pub fn set_nonblocking(&self, nonblocking: bool) -> PtyResult<()> {
        let flags = fcntl(self.primary.as_raw_fd(), FcntlArg::F_GETFL)
            .map_err(PtyError::SetNonBlocking)?;

        let flags = OFlag::from_bits_truncate(flags);
        let new_flags = if nonblocking {
            flags | OFlag::O_NONBLOCK
        } else {
            flags & !OFlag::O_NONBLOCK
        };

        fcntl(self.primary.as_raw_fd(), FcntlArg::F_SETFL(new_flags))
            .map_err(PtyError::SetNonBlocking)?;

        Ok(())
    }

    /// Send a signal to the child process
    pub fn signal(&self, sig: Signal) -> PtyResult<()> {
        signal::kill(self.pid, sig).map_err(PtyError::Signal)
    }

    /// Kill the child process
    pub fn kill(&self) -> PtyResult<()> {
        self.signal(Signal::SIGKILL)
    }
}

impl AsFd for PtyChild {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.primary.as_fd()
    }
}

impl AsRawFd for PtyChild {
    fn as_raw_fd(&self) -> RawFd {
        self.primary.as_raw_fd()
    }
}

impl std::fmt::Debug for PtyChild {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyChild")
            .field("primary", &self.primary.as_raw_fd())
            .field("pid", &self.pid)
            .field("status", &self.status)
            .finish()
    }
}

impl Drop for PtyChild {
    fn drop(&mut self) {
        if !self.is_alive() {
            return;
        }
        if let Err(e) = signal::kill(self.pid, Signal::SIGHUP) {
            tracing::warn!(pid = self.pid.as_raw(), error = %e, "failed to hang up PTY child");
        }
        // Try to reap the child process
        let _ = waitpid(self.pid, Some(WaitPidFlag::WNOHANG));
    }
}

/// Signals whose dispositions are reset before exec
const RESET_SIGNALS: [Signal; 7] = [
    Signal::SIGCHLD,
    Signal::SIGHUP,
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGTERM,
    Signal::SIGALRM,
    Signal::SIGPIPE,
];

/// A [`SpawnConfig`] turned into C strings ahead of the fork
#[derive(Debug)]
struct PreparedCommand {
    program: CString,
    argv: Vec<CString>,
    envp: Vec<CString>,
    cwd: Option<CString>,
}

impl PreparedCommand {
    fn new(config: &SpawnConfig) -> PtyResult<Self> {
        let program = resolve_program(&config.program)?;

        let mut argv = Vec::with_capacity(config.args.len() + 1);
        argv.push(c_string(config.program.as_bytes(), "program")?);
        for arg in &config.args {
            argv.push(c_string(arg.as_bytes(), "argument")?);
        }

        let envp = config
            .environment()
            .into_iter()
            .map(|(key, value)| c_string(format!("{}={}", key, value).as_bytes(), "environment"))
            .collect::<PtyResult<Vec<_>>>()?;

        let cwd = config
            .cwd
            .as_deref()
            .map(|dir| c_string(dir.as_os_str().as_bytes(), "working directory"))
            .transpose()?;

        Ok(Self {
            program: c_string(program.as_os_str().as_bytes(), "program")?,
            argv,
            envp,
            cwd,
        })
    }

    /// Replace the current (forked) process image
    fn exec(&self) -> ! {
        if let Some(cwd) = &self.cwd {
            // Continue in the inherited directory if this fails
            let _ = chdir(cwd.as_c_str());
        }

        for sig in RESET_SIGNALS {
            // SAFETY: restoring the default disposition installs no handler
            let _ = unsafe { signal::signal(sig, SigHandler::SigDfl) };
        }

        let err = match execve(&self.program, &self.argv, &self.envp) {
            Err(e) => PtyError::Exec(e),
            Ok(never) => match never {},
        };

        let mut message = ErrorBuffer::new();
        message.set(err);
        exit_with_message(&message, EXIT_EXEC_FAILED)
    }
}

/// Report `message` on stderr and leave the forked process
fn exit_with_message(message: &ErrorBuffer, code: i32) -> ! {
    let _ = write(STDERR_FILENO, message.as_str().as_bytes());
    let _ = write(STDERR_FILENO, b"\n");
    // SAFETY: _exit skips the destructors and atexit handlers inherited from
    // the parent, which must not run twice
    unsafe { libc::_exit(code) }
}

/// Exit code of a terminated child, or the signal that killed it
fn exit_code(status: WaitStatus) -> PtyResult<i32> {
    match status {
        WaitStatus::Signaled(_, signal, _) => Err(PtyError::ChildSignaled(signal as i32)),
        WaitStatus::Exited(_, code) => Ok(code),
        _ => Ok(0),
    }
}

fn c_string(bytes: &[u8], what: &str) -> PtyResult<CString> {
    CString::new(bytes)
        .map_err(|_| PtyError::InvalidArgument(format!("{} contains a NUL byte", what)))
}

/// Find `program` the way execvp(3) would, before forking
fn resolve_program(program: &str) -> PtyResult<PathBuf> {
    if program.is_empty() {
        return Err(PtyError::InvalidArgument("program is empty".to_string()));
    }
    if program.contains('/') {
        return Ok(PathBuf::from(program));
    }

    let search = std::env::var_os("PATH").unwrap_or_else(|| "/usr/local/bin:/usr/bin:/bin".into());
    std::env::split_paths(&search)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
        .ok_or_else(|| PtyError::InvalidArgument(format!("{} not found in PATH", program)))
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
