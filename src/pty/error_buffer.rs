//! Fixed-capacity error text
//!
//! The child side of a fork reports failures through an [`ErrorBuffer`]
//! rather than through `PtyError`. Recording a message never allocates, and
//! the buffer itself lives on the stack of whoever owns it. Building the
//! error that gets recorded may still allocate (a secondary path, for one).

use std::fmt;

/// A bounded, inline buffer holding one human-readable error message
///
/// An empty buffer means "no error". Messages longer than
/// [`ErrorBuffer::CAPACITY`] bytes are truncated on a character boundary.
#[derive(Clone)]
pub struct ErrorBuffer {
    bytes: [u8; ErrorBuffer::CAPACITY],
    len: usize,
}

impl ErrorBuffer {
    /// Size of the buffer in bytes
    ///
    /// Large enough for a device path plus a formatted errno description.
    pub const CAPACITY: usize = 512;

    /// Create an empty buffer
    pub const fn new() -> Self {
        Self {
            bytes: [0; Self::CAPACITY],
            len: 0,
        }
    }

    /// True if no error has been recorded
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The recorded message
    pub fn as_str(&self) -> &str {
        // Only whole characters are ever copied in, see `write_str`
        std::str::from_utf8(&self.bytes[..self.len]).unwrap_or_default()
    }

    /// Forget any recorded message
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Replace the contents with `message`
    pub fn set(&mut self, message: impl fmt::Display) {
        self.clear();
        // Truncation is the only way `write_str` can stop early and it
        // reports that as success.
        let _ = fmt::write(self, format_args!("{}", message));
    }

    /// Record `message` unless an earlier error is already held
    ///
    /// Returns true if the message was stored.
    pub fn record_first(&mut self, message: impl fmt::Display) -> bool {
        if !self.is_empty() {
            return false;
        }
        self.set(message);
        true
    }
}

impl Default for ErrorBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Write for ErrorBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = Self::CAPACITY - self.len;
        let mut take = s.len().min(room);
        while !s.is_char_boundary(take) {
            take -= 1;
        }
        self.bytes[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        Ok(())
    }
}

impl fmt::Display for ErrorBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for ErrorBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ErrorBuffer").field(&self.as_str()).finish()
    }
}

impl PartialEq<str> for ErrorBuffer {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_new_buffer_is_empty() {
        let buf = ErrorBuffer::new();
        assert!(buf.is_empty());
        assert_eq!(buf.as_str(), "");
    }

    #[test]
    fn test_first_error_wins() {
        let mut buf = ErrorBuffer::new();
        assert!(buf.record_first("open failed"));
        assert!(!buf.record_first("dup2 failed"));
        assert_eq!(buf.as_str(), "open failed");
    }

    #[test]
    fn test_set_overwrites() {
        let mut buf = ErrorBuffer::new();
        buf.set("first");
        buf.set(format_args!("second {}", 2));
        assert_eq!(buf.as_str(), "second 2");
    }

    #[test]
    fn test_clear_allows_new_record() {
        let mut buf = ErrorBuffer::new();
        buf.record_first("old");
        buf.clear();
        assert!(buf.is_empty());
        assert!(buf.record_first("new"));
        assert!(buf == *"new");
    }

    #[test]
    fn test_long_message_is_truncated() {
        let mut buf = ErrorBuffer::new();
        let long = "x".repeat(ErrorBuffer::CAPACITY * 2);
        buf.set(&long);
        assert_eq!(buf.as_str().len(), ErrorBuffer::CAPACITY);
    }

    #[test]
    fn test_truncation_respects_char_boundary() {
        let mut buf = ErrorBuffer::new();
        // One byte short of capacity, then a multi-byte character
        let text = format!("{}é", "a".repeat(ErrorBuffer::CAPACITY - 1));
        buf.set(&text);
        assert_eq!(buf.as_str().len(), ErrorBuffer::CAPACITY - 1);
    }

    proptest! {
        #[test]
        fn prop_contents_are_prefix_of_message(message in "\\PC{0,700}") {
            let mut buf = ErrorBuffer::new();
            buf.set(&message);
            prop_assert!(buf.as_str().len() <= ErrorBuffer::CAPACITY);
            prop_assert!(message.starts_with(buf.as_str()));
            if message.len() <= ErrorBuffer::CAPACITY {
                prop_assert_eq!(buf.as_str(), message.as_str());
            }
        }

        #[test]
        fn prop_record_first_keeps_earliest(first in "[a-z]{1,40}", second in "[a-z]{1,40}") {
            let mut buf = ErrorBuffer::new();
            buf.record_first(&first);
            buf.record_first(&second);
            prop_assert_eq!(buf.as_str(), first.as_str());
        }
    }
}
