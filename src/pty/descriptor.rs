//! Scoped ownership of a single file descriptor
//!
//! A `Descriptor` slot holds at most one open descriptor. Whatever it holds is
//! closed when the slot is dropped, closed, or refilled, unless it was handed
//! out with [`Descriptor::release`] or [`Descriptor::take`] first.

use std::os::fd::{AsRawFd, IntoRawFd};

use super::{RawFd, INVALID_FD};

pub(crate) struct Descriptor<T: AsRawFd + IntoRawFd> {
    inner: Option<T>,
}

impl<T: AsRawFd + IntoRawFd> Descriptor<T> {
    pub(crate) const fn empty() -> Self {
        Self { inner: None }
    }

    /// The raw descriptor, or [`INVALID_FD`] if the slot is empty
    pub(crate) fn raw(&self) -> RawFd {
        self.inner.as_ref().map_or(INVALID_FD, AsRawFd::as_raw_fd)
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.inner.is_some()
    }

    pub(crate) fn get(&self) -> Option<&T> {
        self.inner.as_ref()
    }

    /// Store `value`, closing whatever was held before
    pub(crate) fn replace(&mut self, value: T) {
        self.close();
        self.inner = Some(value);
    }

    pub(crate) fn close(&mut self) {
        // Dropping the handle closes it; close errors are not reported.
        drop(self.inner.take());
    }

    /// Hand the raw descriptor to the caller without closing it
    pub(crate) fn release(&mut self) -> RawFd {
        self.inner.take().map_or(INVALID_FD, IntoRawFd::into_raw_fd)
    }

    pub(crate) fn take(&mut self) -> Option<T> {
        self.inner.take()
    }
}

impl<T: AsRawFd + IntoRawFd> Default for Descriptor<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: AsRawFd + IntoRawFd> std::fmt::Debug for Descriptor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Descriptor").field(&self.raw()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::{FromRawFd, OwnedFd};
    use std::os::unix::net::UnixStream;

    fn is_open(fd: RawFd) -> bool {
        nix::fcntl::fcntl(fd, nix::fcntl::FcntlArg::F_GETFD).is_ok()
    }

    #[test]
    fn test_empty_slot_reports_sentinel() {
        let mut slot: Descriptor<OwnedFd> = Descriptor::empty();
        assert!(!slot.is_valid());
        assert_eq!(slot.raw(), INVALID_FD);
        assert_eq!(slot.release(), INVALID_FD);
        assert!(slot.take().is_none());
    }

    #[test]
    fn test_release_disarms_close() {
        let (a, _b) = UnixStream::pair().expect("socketpair");
        let mut slot = Descriptor::empty();
        slot.replace(OwnedFd::from(a));

        let raw = slot.release();
        assert_ne!(raw, INVALID_FD);
        assert!(!slot.is_valid());
        drop(slot);

        assert!(is_open(raw));
        // SAFETY: ownership of `raw` was handed to us by release()
        drop(unsafe { OwnedFd::from_raw_fd(raw) });
    }

    #[test]
    fn test_take_returns_owned_handle() {
        let (a, _b) = UnixStream::pair().expect("socketpair");
        let expected = a.as_raw_fd();
        let mut slot = Descriptor::empty();
        slot.replace(OwnedFd::from(a));

        let owned = slot.take().expect("slot was filled");
        assert_eq!(owned.as_raw_fd(), expected);
        assert_eq!(slot.raw(), INVALID_FD);
    }
}
