//! PTY pair library
//!
//! Allocates pseudoterminal primary/secondary pairs, forks children whose
//! stdio is routed through the secondary side, and hands descriptor ownership
//! over explicitly. This crate provides:
//!
//! - `pty`: the `PtyPair` lifecycle, stdio-redirecting fork, and `PtyChild`
//! - `config`: `SpawnConfig`, describing what a `PtyChild` runs

pub mod config;
pub mod pty;

pub use config::SpawnConfig;
#[cfg(unix)]
pub use pty::PtyChild;
pub use pty::{ErrorBuffer, ForkOutcome, PtyError, PtyPair, PtyResult, INVALID_FD};
