// SPDX-License-Identifier: Apache-2.0

//! The reporter: everything that runs in the forked isolation process.
//!
//! The child owns a private copy-on-write snapshot of the crashed process, so
//! walking and resolving the stack here cannot disturb the original threads
//! or race their (possibly corrupted) heap. It emits the banner, captures raw
//! return addresses under the scratch-arena guard, resolves and prints each
//! frame in order, resumes a frozen parent, and exits.

use crate::collector::alloc_guard::CaptureGuard;
use crate::collector::formatter;
use crate::collector::resolver::resolve_frame;
use crate::collector::safe_write::{terminate, write_to_stderr, FixedText};
use crate::shared::configuration::HandlerConfig;
use crate::shared::constants::{FRAME_BUFFER_PAD, MAX_FRAMES_COUNT, PATH_BUFFER_SIZE};
use libc::{c_int, c_void, ucontext_t};
use nix::sys::signal::{self, Signal};

pub(crate) fn run_reporter_child(
    signum: c_int,
    ucontext: *const ucontext_t,
    config: &HandlerConfig,
) -> ! {
    // Anything the host still prints through stdout should land with the
    // trace. Best effort only.
    // SAFETY: dup2 on the standard descriptors has no preconditions.
    if unsafe { libc::dup2(libc::STDERR_FILENO, libc::STDOUT_FILENO) } == -1 {
        write_to_stderr(b"Failed to redirect stdout to stderr\n");
    }

    formatter::write_banner(signum, config);

    let mut frames = [std::ptr::null_mut::<c_void>(); MAX_FRAMES_COUNT + FRAME_BUFFER_PAD];
    let wanted = config.frame_buffer_len();

    let guard = CaptureGuard::new();
    let captured = capture_frames(&mut frames[..wanted]);
    if captured <= FRAME_BUFFER_PAD {
        // Not even the handler's own frames unwound; the stack is too far
        // gone for a report.
        // SAFETY: no preconditions.
        unsafe { libc::abort() }
    }

    let start = first_reportable_frame(&mut frames[..captured], fault_address(ucontext));

    let exe = executable_path();
    let cwd = working_directory();

    for &address in &frames[start..captured] {
        let frame = resolve_frame(exe.as_bytes(), address);
        formatter::write_frame(&frame, cwd.as_bytes(), config);
    }
    drop(guard);

    if config.thread_safe() {
        // The parent stopped itself right after forking; wake it now that the
        // trace is complete.
        let _ = signal::kill(nix::unistd::getppid(), Signal::SIGCONT);
    }

    // SAFETY: no preconditions; this process existed only to report.
    unsafe { libc::_exit(libc::EXIT_SUCCESS) }
}

/// Captures raw return addresses into `frames`, innermost first.
pub(crate) fn capture_frames(frames: &mut [*mut c_void]) -> usize {
    let mut count = 0;
    // SAFETY: the unsynchronized variant is the one usable on the crash path;
    // the reporter process is single-threaded.
    unsafe {
        backtrace::trace_unsynchronized(|frame| {
            if count >= frames.len() {
                return false;
            }
            frames[count] = frame.ip();
            count += 1;
            count < frames.len()
        });
    }
    count
}

/// Decides where the reportable trace starts, cutting the handler's own
/// frames and the signal trampoline.
///
/// Preferred: scan for the faulting instruction address taken from the
/// machine context; everything before it belongs to the handler and the
/// unwinder. If the scan fails (context unavailable, or the unwinder did not
/// surface the exact fault ip), fall back to a positional heuristic:
/// overwrite the second entry with the fault address and skip one extra slot
/// when the walker reported the trampoline twice in a row.
pub(crate) fn first_reportable_frame(frames: &mut [*mut c_void], fault_ip: *mut c_void) -> usize {
    if !fault_ip.is_null() {
        if let Some(index) = frames.iter().position(|&ip| ip == fault_ip) {
            return index;
        }
    }
    if frames.len() < 2 {
        return 0;
    }
    let trampoline = frames[1];
    if !fault_ip.is_null() {
        frames[1] = fault_ip;
    }
    if frames.len() > 2 && frames[2] == trampoline {
        2
    } else {
        1
    }
}

/// The faulting instruction address from the platform machine context. The
/// naive walker's second entry is the signal trampoline on all supported
/// architectures, so this is the only truthful record of the fault site.
#[allow(unreachable_code, unused_variables)]
pub(crate) fn fault_address(ucontext: *const ucontext_t) -> *mut c_void {
    if ucontext.is_null() {
        return std::ptr::null_mut();
    }
    // SAFETY: the context was delivered by the kernel alongside the signal.
    unsafe {
        #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
        return (*ucontext).uc_mcontext.gregs[libc::REG_RIP as usize] as usize as *mut c_void;
        #[cfg(all(target_os = "linux", target_arch = "x86"))]
        return (*ucontext).uc_mcontext.gregs[libc::REG_EIP as usize] as usize as *mut c_void;
        #[cfg(all(target_os = "linux", target_arch = "aarch64"))]
        return (*ucontext).uc_mcontext.pc as usize as *mut c_void;
        #[cfg(all(target_os = "linux", target_arch = "arm"))]
        return (*ucontext).uc_mcontext.arm_pc as usize as *mut c_void;
        #[cfg(all(target_os = "macos", target_arch = "x86_64"))]
        return (*(*ucontext).uc_mcontext).__ss.__rip as usize as *mut c_void;
        #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
        return (*(*ucontext).uc_mcontext).__ss.__pc as usize as *mut c_void;
    }
    std::ptr::null_mut()
}

/// Absolute path of the main executable image. An unreadable link counts as
/// a diagnostic-path fatal error.
fn executable_path() -> FixedText<PATH_BUFFER_SIZE> {
    let mut path = FixedText::new();
    #[cfg(target_os = "linux")]
    {
        let mut buf = [0u8; PATH_BUFFER_SIZE];
        // SAFETY: constant NUL-terminated path, valid out-buffer.
        let len = unsafe {
            libc::readlink(
                b"/proc/self/exe\0".as_ptr() as *const libc::c_char,
                buf.as_mut_ptr() as *mut libc::c_char,
                buf.len() - 1,
            )
        };
        if len <= 0 {
            terminate();
        }
        path.push_bytes(&buf[..len as usize]);
    }
    // On other unices the resolver falls back to dladdr attribution or raw
    // addresses; an empty main-image path only degrades the output.
    path
}

/// Current working directory with a trailing slash, used for common-root
/// stripping. Unresolvable cwd is fatal in the diagnostic path.
fn working_directory() -> FixedText<PATH_BUFFER_SIZE> {
    let mut buf = [0u8; PATH_BUFFER_SIZE];
    // SAFETY: valid buffer/length pair.
    if unsafe { libc::getcwd(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) }.is_null() {
        terminate();
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(0);
    let mut cwd = FixedText::new();
    cwd.push_bytes(&buf[..len]);
    cwd.push_byte(b'/');
    cwd
}
