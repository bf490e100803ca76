// SPDX-License-Identifier: Apache-2.0

//! Async-signal-safe text and output primitives.
//!
//! Everything in this module is reentrant, allocates nothing, and calls no
//! non-reentrant libc routine: text is assembled into owned fixed-capacity
//! buffers and leaves the process through raw `write(2)` calls on stderr.
//! Owned buffers (rather than the reused static buffers a C implementation
//! would use) let two results be alive at the same time without aliasing.

use crate::shared::constants::LINE_BUFFER_SIZE;
use libc::{c_char, c_void};

const DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// An owned, fixed-capacity byte buffer. Pushes beyond capacity are silently
/// truncated, and the final byte is always a NUL so the contents can be handed
/// to exec-style interfaces via [`FixedText::as_ptr`].
#[derive(Clone, Copy)]
pub(crate) struct FixedText<const N: usize> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> Default for FixedText<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> FixedText<N> {
    pub const fn new() -> Self {
        Self { buf: [0; N], len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.buf = [0; N];
        self.len = 0;
    }

    pub fn push_byte(&mut self, byte: u8) {
        if self.len < N - 1 {
            self.buf[self.len] = byte;
            self.len += 1;
        }
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) {
        let room = (N - 1).saturating_sub(self.len);
        let take = bytes.len().min(room);
        self.buf[self.len..self.len + take].copy_from_slice(&bytes[..take]);
        self.len += take;
    }

    pub fn push_str(&mut self, text: &str) {
        self.push_bytes(text.as_bytes());
    }

    pub fn push_u64(&mut self, mut value: u64, base: u64) {
        let mut digits = [0u8; 64];
        let mut count = 0;
        loop {
            digits[count] = DIGITS[(value % base) as usize];
            count += 1;
            value /= base;
            if value == 0 {
                break;
            }
        }
        while count > 0 {
            count -= 1;
            self.push_byte(digits[count]);
        }
    }

    pub fn push_i64(&mut self, value: i64, base: u64) {
        if value < 0 {
            self.push_byte(b'-');
        }
        self.push_u64(value.unsigned_abs(), base);
    }

    /// `0x` followed by the address in hex.
    pub fn push_ptr(&mut self, ptr: *const c_void) {
        self.push_str("0x");
        self.push_u64(ptr as usize as u64, 16);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(self.as_bytes()).unwrap_or("")
    }

    /// NUL-terminated view of the contents, suitable as an exec argument.
    pub fn as_ptr(&self) -> *const c_char {
        self.buf.as_ptr() as *const c_char
    }
}

pub(crate) type LineBuf = FixedText<LINE_BUFFER_SIZE>;

pub(crate) fn itoa(value: i64, base: u64) -> FixedText<32> {
    let mut text = FixedText::new();
    text.push_i64(value, base);
    text
}

pub(crate) fn utoa(value: u64, base: u64) -> FixedText<32> {
    let mut text = FixedText::new();
    text.push_u64(value, base);
    text
}

pub(crate) fn ptoa(ptr: *const c_void) -> FixedText<34> {
    let mut text = FixedText::new();
    text.push_ptr(ptr);
    text
}

/// Raw, unbuffered write to stderr. Handles short writes and EINTR; any hard
/// failure terminates the process, since a crash reporter that cannot write
/// its diagnostics has nothing left to do safely.
pub(crate) fn write_to_stderr(bytes: &[u8]) {
    let mut written = 0;
    while written < bytes.len() {
        // SAFETY: the pointer/length pair describes a live slice.
        let rc = unsafe {
            libc::write(
                libc::STDERR_FILENO,
                bytes[written..].as_ptr() as *const c_void,
                bytes.len() - written,
            )
        };
        if rc > 0 {
            written += rc as usize;
        } else if rc < 0 && nix::Error::last_raw() == libc::EINTR {
            continue;
        } else {
            terminate();
        }
    }
}

/// Kills the program without raising an abort or running atexit handlers.
pub(crate) fn terminate() -> ! {
    // SAFETY: no preconditions.
    unsafe { libc::_exit(libc::EXIT_FAILURE) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_itoa() {
        assert_eq!(itoa(0, 10).as_str(), "0");
        assert_eq!(itoa(42, 10).as_str(), "42");
        assert_eq!(itoa(-42, 10).as_str(), "-42");
        assert_eq!(itoa(255, 16).as_str(), "FF");
        assert_eq!(itoa(i64::MIN, 10).as_str(), "-9223372036854775808");
    }

    #[test]
    fn test_utoa() {
        assert_eq!(utoa(0, 10).as_str(), "0");
        assert_eq!(utoa(u64::MAX, 16).as_str(), "FFFFFFFFFFFFFFFF");
        assert_eq!(utoa(8, 2).as_str(), "1000");
    }

    #[test]
    fn test_ptoa() {
        assert_eq!(ptoa(std::ptr::null()).as_str(), "0x0");
        assert_eq!(ptoa(0xdead_beef_usize as *const c_void).as_str(), "0xDEADBEEF");
    }

    #[test]
    fn test_two_conversions_alive_at_once() {
        let a = utoa(17, 10);
        let b = itoa(-3, 10);
        assert_eq!(a.as_str(), "17");
        assert_eq!(b.as_str(), "-3");
    }

    #[test]
    fn test_push_truncates_at_capacity() {
        let mut text = FixedText::<8>::new();
        text.push_str("abcdefghij");
        // One byte is reserved for the trailing NUL.
        assert_eq!(text.as_str(), "abcdefg");
        assert_eq!(text.len(), 7);
        text.push_byte(b'z');
        assert_eq!(text.len(), 7);
    }

    #[test]
    fn test_nul_terminated_for_exec() {
        let mut text = FixedText::<16>::new();
        text.push_str("addr2line");
        let bytes = unsafe { std::slice::from_raw_parts(text.as_ptr() as *const u8, 10) };
        assert_eq!(&bytes[..9], b"addr2line");
        assert_eq!(bytes[9], 0);
    }

    #[test]
    fn test_clear_resets_contents() {
        let mut text = FixedText::<16>::new();
        text.push_str("stale");
        text.clear();
        assert!(text.is_empty());
        assert_eq!(text.as_str(), "");
    }
}
