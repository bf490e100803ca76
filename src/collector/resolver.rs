// SPDX-License-Identifier: Apache-2.0

//! Address-to-source resolution.
//!
//! Each captured return address is attributed to its loaded module via
//! `dladdr(3)` and then translated to a function name and file:line by an
//! `addr2line` subprocess. Resolution is strictly serialized: one subprocess
//! per frame, read to completion and reaped before the next frame starts, so
//! the emitted trace keeps its ordering. A frame that cannot be resolved
//! degrades to its raw hex address; the trace as a whole never fails because
//! debug info or the external tool is missing.

use crate::collector::alloc_guard::{scratch_alloc_or_die, scratch_reset};
use crate::collector::safe_write::{ptoa, terminate, FixedText};
use crate::shared::constants::{PATH_BUFFER_SIZE, RESOLVER_OUTPUT_SIZE};
use libc::{c_char, c_int, c_void};
use std::ffi::CStr;

/// One frame of the trace after symbol resolution.
pub(crate) struct ResolvedFrame {
    /// The address as queried: rebased to the module's load offset for
    /// shared modules, absolute for the main executable. This is the value
    /// a user can feed back into `addr2line -e <image>`.
    pub address: *mut c_void,
    /// The image the address was resolved against.
    pub image: FixedText<PATH_BUFFER_SIZE>,
    /// First resolver output line, e.g. a demangled function name.
    pub function: FixedText<512>,
    /// Second resolver output line, `file:line` or a synthesized fallback.
    pub location: FixedText<PATH_BUFFER_SIZE>,
    /// False when only the raw address is available.
    pub resolved: bool,
}

/// Resolves one raw address. `exe_path` is the main executable image; shared
/// modules found by `dladdr` are queried with the address rebased to their
/// load offset, everything else falls back to the main image at the absolute
/// address.
pub(crate) fn resolve_frame(exe_path: &[u8], address: *mut c_void) -> ResolvedFrame {
    let mut image = FixedText::new();
    let mut lookup = address;

    // SAFETY: dladdr only writes the out-struct.
    let mut info: libc::Dl_info = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::dladdr(address as *const c_void, &mut info) };
    if rc != 0 && !info.dli_fname.is_null() {
        // SAFETY: dladdr fills dli_fname with a NUL-terminated module path.
        let fname = unsafe { CStr::from_ptr(info.dli_fname) }.to_bytes();
        if fname.first() == Some(&b'/') && fname != exe_path && !info.dli_fbase.is_null() {
            image.push_bytes(fname);
            lookup = (address as usize - info.dli_fbase as usize) as *mut c_void;
        }
    }
    if image.is_empty() {
        image.push_bytes(exe_path);
        lookup = address;
    }

    match run_addr2line(&image, lookup) {
        Some(output) => parse_resolver_output(output.as_bytes(), lookup, &image),
        // Nonzero resolver exit: unreadable image, missing tool. The stderr
        // text captured through the pipe is noise, not a function name.
        None => ResolvedFrame {
            address: lookup,
            image,
            function: FixedText::new(),
            location: FixedText::new(),
            resolved: false,
        },
    }
}

/// Runs `addr2line <hexaddr> -f -C -e <image>` with its stdout and stderr
/// redirected into a pipe, reads the full output and reaps the subprocess.
/// Returns `None` when the tool exits unsuccessfully. Pipe, fork, or wait
/// failure is unrecoverable here: a crash handler that can hang or leave
/// zombies is worse than one that dies.
fn run_addr2line(
    image: &FixedText<PATH_BUFFER_SIZE>,
    address: *mut c_void,
) -> Option<FixedText<RESOLVER_OUTPUT_SIZE>> {
    let mut fds = [0 as c_int; 2];
    // SAFETY: fds is a valid two-element out-array.
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        terminate();
    }

    // The argument strings live in the scratch arena, reset per frame; this
    // is the one place the crash path needs dynamic-sized memory.
    let hex = ptoa(address);
    scratch_reset();
    let hex_arg = scratch_alloc_or_die(hex.len() + 1);
    hex_arg[..hex.len()].copy_from_slice(hex.as_bytes());
    hex_arg[hex.len()] = 0;

    let argv: [*const c_char; 7] = [
        b"addr2line\0".as_ptr() as *const c_char,
        hex_arg.as_ptr() as *const c_char,
        b"-f\0".as_ptr() as *const c_char,
        b"-C\0".as_ptr() as *const c_char,
        b"-e\0".as_ptr() as *const c_char,
        image.as_ptr(),
        std::ptr::null(),
    ];

    // SAFETY: plain fork; the child only execs or exits.
    match unsafe { libc::fork() } {
        0 => {
            // SAFETY: all of close/dup2/execvp are async-signal-safe; argv is
            // a NULL-terminated array of NUL-terminated strings.
            unsafe {
                libc::close(fds[0]);
                if libc::dup2(fds[1], libc::STDOUT_FILENO) == -1
                    || libc::dup2(fds[1], libc::STDERR_FILENO) == -1
                {
                    terminate();
                }
                libc::execvp(argv[0], argv.as_ptr());
            }
            // exec only returns on failure (e.g. addr2line not installed);
            // the nonzero exit downgrades this frame to a raw address.
            terminate();
        }
        pid if pid > 0 => {
            // SAFETY: closing our copy of the write end.
            unsafe { libc::close(fds[1]) };
            let output = read_all(fds[0]);
            // SAFETY: closing the read end we own.
            unsafe { libc::close(fds[0]) };
            let mut status = 0 as c_int;
            // SAFETY: pid is our direct child; status is a valid out-pointer.
            if unsafe { libc::waitpid(pid, &mut status, 0) } != pid {
                terminate();
            }
            if libc::WIFEXITED(status) && libc::WEXITSTATUS(status) == 0 {
                Some(output)
            } else {
                None
            }
        }
        _ => terminate(),
    }
}

fn read_all(fd: c_int) -> FixedText<RESOLVER_OUTPUT_SIZE> {
    let mut buf = [0u8; RESOLVER_OUTPUT_SIZE];
    let mut filled = 0;
    while filled < buf.len() {
        // SAFETY: reading into the unfilled tail of a live buffer.
        let rc = unsafe {
            libc::read(
                fd,
                buf[filled..].as_mut_ptr() as *mut c_void,
                buf.len() - filled,
            )
        };
        if rc > 0 {
            filled += rc as usize;
        } else if rc == 0 {
            break;
        } else if nix::Error::last_raw() == libc::EINTR {
            continue;
        } else {
            terminate();
        }
    }
    let mut output = FixedText::new();
    output.push_bytes(&buf[..filled]);
    output
}

/// The two-line resolver contract: first line a function name or `?…`, second
/// line `<file>:<line>` or `??:…`. Unknown function degrades the whole frame
/// to a raw address; a known function with an unknown location gets a
/// synthesized `<image>:<hexaddr>` location.
fn parse_resolver_output(
    output: &[u8],
    address: *mut c_void,
    image: &FixedText<PATH_BUFFER_SIZE>,
) -> ResolvedFrame {
    let mut frame = ResolvedFrame {
        address,
        image: *image,
        function: FixedText::new(),
        location: FixedText::new(),
        resolved: false,
    };

    let first_end = output.iter().position(|&b| b == b'\n');
    let first = match first_end {
        Some(end) => &output[..end],
        None => output,
    };
    if first.is_empty() || first[0] == b'?' {
        return frame;
    }
    frame.resolved = true;
    frame.function.push_bytes(first);

    let rest = first_end.map(|end| &output[end + 1..]).unwrap_or(b"");
    let second = match rest.iter().position(|&b| b == b'\n') {
        Some(end) => &rest[..end],
        None => rest,
    };
    if second.is_empty() || second[0] == b'?' {
        frame.location.push_bytes(image.as_bytes());
        frame.location.push_byte(b':');
        frame.location.push_ptr(address);
    } else {
        frame.location.push_bytes(second);
    }
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::alloc_guard::{CaptureGuard, ARENA_TEST_LOCK};

    fn image(path: &str) -> FixedText<PATH_BUFFER_SIZE> {
        let mut text = FixedText::new();
        text.push_str(path);
        text
    }

    #[test]
    fn test_parse_full_resolution() {
        let frame = parse_resolver_output(
            b"main\n/home/u/app/src/main.rs:10\n",
            0x1000 as *mut c_void,
            &image("/home/u/app/bin"),
        );
        assert!(frame.resolved);
        assert_eq!(frame.function.as_str(), "main");
        assert_eq!(frame.location.as_str(), "/home/u/app/src/main.rs:10");
    }

    #[test]
    fn test_parse_unknown_function() {
        let frame = parse_resolver_output(
            b"??\n??:0\n",
            0x1000 as *mut c_void,
            &image("/usr/lib/libfoo.so"),
        );
        assert!(!frame.resolved);
        assert_eq!(frame.image.as_str(), "/usr/lib/libfoo.so");
    }

    #[test]
    fn test_parse_known_function_unknown_location() {
        let frame = parse_resolver_output(
            b"frobnicate\n??:?\n",
            0xBEEF as *mut c_void,
            &image("/opt/tool"),
        );
        assert!(frame.resolved);
        assert_eq!(frame.function.as_str(), "frobnicate");
        assert_eq!(frame.location.as_str(), "/opt/tool:0xBEEF");
    }

    #[test]
    fn test_parse_empty_output() {
        let frame = parse_resolver_output(b"", 0x2A as *mut c_void, &image("/bin/x"));
        assert!(!frame.resolved);
    }

    fn addr2line_available() -> bool {
        std::process::Command::new("addr2line")
            .arg("--version")
            .output()
            .is_ok()
    }

    #[test]
    fn test_resolve_against_bogus_image_degrades() {
        if !addr2line_available() {
            return;
        }
        let _lock = ARENA_TEST_LOCK.lock().unwrap();
        let _guard = CaptureGuard::new();
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("no-such-image");
        let frame = resolve_frame(
            bogus.to_str().unwrap().as_bytes(),
            0xDEAD_usize as *mut c_void,
        );
        // addr2line cannot open the image; the frame must fall back to its
        // raw address, never crash or vanish.
        assert!(!frame.resolved);
        assert_eq!(frame.address as usize, 0xDEAD);
        assert_eq!(frame.image.as_str(), bogus.to_str().unwrap());
    }

    #[test]
    fn test_shared_module_frame_displays_rebased_offset() {
        if !addr2line_available() {
            return;
        }
        let _lock = ARENA_TEST_LOCK.lock().unwrap();
        let _guard = CaptureGuard::new();
        let absolute = libc::toupper as usize;
        let exe = std::env::current_exe().unwrap();
        let frame = resolve_frame(exe.to_str().unwrap().as_bytes(), absolute as *mut c_void);
        // toupper lives in libc, not this binary; whatever addr2line made of
        // it, the displayed address must be the in-module offset it was
        // queried with, not the absolute mapping.
        if frame.image.as_str() != exe.to_str().unwrap() {
            assert!((frame.address as usize) < absolute);
            assert!(frame.image.as_bytes().starts_with(b"/"));
        }
    }
}
