//! Integration tests for PTY pair allocation and forking
//!
//! These tests verify end-to-end behavior with real pseudoterminals and child
//! processes.

#![cfg(unix)]

use std::collections::HashSet;
use std::ffi::CString;
use std::os::fd::{BorrowedFd, RawFd};
use std::thread;
use std::time::{Duration, Instant};

use nix::fcntl::OFlag;
use nix::poll::{poll, PollFd, PollFlags};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::waitpid;
use pty_pair::{ForkOutcome, PtyChild, PtyPair, SpawnConfig};

/// Helper to read from `fd` until `done` accepts the output or the timeout expires
fn read_until(fd: RawFd, timeout: Duration, done: impl Fn(&str) -> bool) -> String {
    let mut output = Vec::new();
    let mut buf = [0u8; 1024];
    let deadline = Instant::now() + timeout;

    while Instant::now() < deadline {
        // SAFETY: the caller keeps `fd` open for the duration of this call
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        let mut fds = [PollFd::new(&borrowed, PollFlags::POLLIN)];
        match poll(&mut fds, 50) {
            Ok(n) if n > 0 => match nix::unistd::read(fd, &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => output.extend_from_slice(&buf[..n]),
            },
            Ok(_) => {},
            Err(_) => break,
        }
        if done(&String::from_utf8_lossy(&output)) {
            break;
        }
    }

    String::from_utf8_lossy(&output).into_owned()
}

fn open_pair() -> PtyPair {
    let mut pair = PtyPair::new();
    pair.open_first_available_primary(OFlag::O_RDWR | OFlag::O_NOCTTY)
        .expect("Failed to open PTY primary");
    pair.open_secondary(OFlag::O_RDWR | OFlag::O_NOCTTY)
        .expect("Failed to open PTY secondary");
    pair
}

// ============================================================================
// Pair I/O Tests
// ============================================================================

#[test]
fn test_primary_to_secondary() {
    let pair = open_pair();

    nix::unistd::write(pair.primary_fd(), b"ping\n").expect("Failed to write primary");
    let text = read_until(pair.secondary_fd(), Duration::from_secs(5), |s| s.contains('\n'));

    assert_eq!(text, "ping\n");
}

#[test]
fn test_secondary_to_primary() {
    let pair = open_pair();

    nix::unistd::write(pair.secondary_fd(), b"pong\n").expect("Failed to write secondary");
    let text = read_until(pair.primary_fd(), Duration::from_secs(5), |s| s.contains("pong"));

    assert!(text.contains("pong"), "Unexpected output: {:?}", text);
}

#[test]
fn test_secondary_name_matches_opened_device() {
    let pair = open_pair();
    let name = pair.secondary_name();

    let by_name = nix::sys::stat::stat(name.as_str()).expect("stat secondary by name");
    let opened = nix::sys::stat::fstat(pair.secondary_fd()).expect("fstat secondary");
    assert_eq!(by_name.st_rdev, opened.st_rdev);
}

// ============================================================================
// Concurrency Tests
// ============================================================================

#[test]
fn test_concurrent_secondary_names() {
    let handles: Vec<_> = (0..8)
        .map(|_| {
            thread::spawn(|| {
                let mut pair = PtyPair::new();
                pair.open_first_available_primary(OFlag::O_RDWR | OFlag::O_NOCTTY)
                    .expect("Failed to open PTY primary");
                let first = pair.secondary_name();
                for _ in 0..200 {
                    assert_eq!(pair.secondary_name(), first);
                }

                // The name must refer to this pair's own secondary
                pair.open_secondary(OFlag::O_RDWR | OFlag::O_NOCTTY)
                    .expect("Failed to open PTY secondary");
                let by_name = nix::sys::stat::stat(first.as_str()).expect("stat");
                let opened = nix::sys::stat::fstat(pair.secondary_fd()).expect("fstat");
                assert_eq!(by_name.st_rdev, opened.st_rdev);

                // Keep the pair alive until the name has been compared
                (first, pair)
            })
        })
        .collect();

    let results: Vec<(String, PtyPair)> = handles
        .into_iter()
        .map(|h| h.join().expect("thread panicked"))
        .collect();
    let names: HashSet<&str> = results.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names.len(), results.len());
}

// ============================================================================
// Fork Tests
// ============================================================================

#[test]
fn test_fork_parent_talks_to_child_stdio() {
    let cat = CString::new("/bin/cat").expect("CString");
    let argv = [cat.clone()];
    let mut pair = PtyPair::new();

    match pair.fork() {
        ForkOutcome::Child { errors } => {
            if errors.is_empty() {
                let _ = nix::unistd::execv(&cat, &argv);
            }
            // SAFETY: leave the forked test process immediately
            unsafe { nix::libc::_exit(126) };
        },
        ForkOutcome::Parent { child } => {
            assert!(child.as_raw() > 0);
            assert!(pair.has_primary());

            let line = "hello from parent";
            nix::unistd::write(pair.primary_fd(), format!("{}\n", line).as_bytes())
                .expect("Failed to write primary");

            // Once from the terminal echo, once from cat
            let text = read_until(pair.primary_fd(), Duration::from_secs(5), |s| {
                s.matches(line).count() >= 2
            });

            let _ = kill(child, Signal::SIGKILL);
            let _ = waitpid(child, None);

            assert!(
                text.matches(line).count() >= 2,
                "Expected the line twice, got: {:?}",
                text
            );
        },
        ForkOutcome::ForkFailed { error } => panic!("fork failed: {}", error),
    }
}

#[test]
fn test_fork_releases_primary_to_child_handle() {
    let cat = CString::new("/bin/cat").expect("CString");
    let argv = [cat.clone()];
    let mut pair = PtyPair::new();

    let mut child = match pair.fork() {
        ForkOutcome::Child { errors } => {
            if errors.is_empty() {
                let _ = nix::unistd::execv(&cat, &argv);
            }
            // SAFETY: leave the forked test process immediately
            unsafe { nix::libc::_exit(126) };
        },
        ForkOutcome::Parent { child } => {
            let primary = pair.take_primary().expect("primary held after fork");
            PtyChild::from_parts(primary, child)
        },
        ForkOutcome::ForkFailed { error } => panic!("fork failed: {}", error),
    };

    assert!(!pair.has_primary());
    drop(pair);

    child.write_all(b"handoff\n").expect("Failed to write");
    let text = read_until(child.primary_fd(), Duration::from_secs(5), |s| {
        s.matches("handoff").count() >= 2
    });
    assert!(text.contains("handoff"), "Unexpected output: {:?}", text);

    child.kill().expect("Failed to kill");
    let _ = child.wait();
}

// ============================================================================
// PtyChild Tests
// ============================================================================

#[test]
fn test_pty_child_echoes_stdin() {
    let mut child = PtyChild::spawn(&SpawnConfig::new("cat")).expect("Failed to spawn cat");

    child.write_all(b"round trip\n").expect("Failed to write");
    let text = read_until(child.primary_fd(), Duration::from_secs(5), |s| {
        s.matches("round trip").count() >= 2
    });
    assert!(
        text.matches("round trip").count() >= 2,
        "Unexpected output: {:?}",
        text
    );

    child.kill().expect("Failed to kill");
    let _ = child.wait();
}

#[test]
fn test_pty_child_environment() {
    let config = SpawnConfig::new("/bin/sh")
        .with_args(["-c", "echo TERM=$TERM MARK=$PTY_PAIR_MARK"])
        .with_env("PTY_PAIR_MARK", "42");
    let mut child = PtyChild::spawn(&config).expect("Failed to spawn PTY child");

    let text = read_until(child.primary_fd(), Duration::from_secs(5), |s| s.contains("MARK=42"));
    assert!(
        text.contains("TERM=xterm-256color MARK=42"),
        "Unexpected output: {:?}",
        text
    );
    assert_eq!(child.wait().expect("Failed to wait"), 0);
}

#[test]
fn test_pty_child_working_directory() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = SpawnConfig::new("/bin/sh")
        .with_args(["-c", "pwd"])
        .with_cwd(dir.path());
    let mut child = PtyChild::spawn(&config).expect("Failed to spawn PTY child");

    let expected = dir
        .path()
        .canonicalize()
        .expect("canonicalize")
        .display()
        .to_string();
    let text = read_until(child.primary_fd(), Duration::from_secs(5), |s| s.contains(&expected));
    assert!(text.contains(&expected), "Unexpected output: {:?}", text);
    let _ = child.wait();
}

#[test]
fn test_pty_child_has_controlling_terminal() {
    let config = SpawnConfig::new("/bin/sh").with_args(["-c", "tty"]);
    let mut child = PtyChild::spawn(&config).expect("Failed to spawn PTY child");

    let text = read_until(child.primary_fd(), Duration::from_secs(5), |s| s.contains("/dev/"));
    assert!(text.contains("/dev/"), "Unexpected output: {:?}", text);
    let _ = child.wait();
}
