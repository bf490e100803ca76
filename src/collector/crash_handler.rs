// SPDX-License-Identifier: Apache-2.0

//! The signal-side coordinator: the sigaction callback, the process-wide
//! configuration slot it reads, and the parent's post-fork disposition.

use crate::collector::fork::alt_fork;
use crate::collector::reporter::run_reporter_child;
use crate::collector::safe_write::{terminate, write_to_stderr};
use crate::shared::configuration::HandlerConfig;
use libc::{c_int, c_void, siginfo_t, ucontext_t};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::wait::{self, WaitPidFlag};
use nix::unistd::Pid;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering::SeqCst};

extern "C" {
    // C11, provided by glibc and musl; skips atexit handlers but still
    // runs at_quick_exit ones.
    fn quick_exit(status: c_int) -> !;
}

static DEFAULT_CONFIG: HandlerConfig = HandlerConfig::new();

/// The configuration the handler reads at crash time.
///
/// Swapped atomically so an update racing a crash hands the handler either
/// the old or the new complete value, never a torn one. The pointed-to box
/// is leaked for the old value's lifetime only.
static CONFIG: AtomicPtr<HandlerConfig> = AtomicPtr::new(std::ptr::null_mut());

pub(crate) fn install_config(config: HandlerConfig) {
    let prev = CONFIG.swap(Box::into_raw(Box::new(config)), SeqCst);
    if !prev.is_null() {
        // SAFETY: only this function stores non-null values into CONFIG, and
        // each is a Box::into_raw result swapped out exactly once.
        drop(unsafe { Box::from_raw(prev) });
    }
}

pub(crate) fn loaded_config() -> &'static HandlerConfig {
    let ptr = CONFIG.load(SeqCst);
    if ptr.is_null() {
        &DEFAULT_CONFIG
    } else {
        // SAFETY: non-null values are live Box::into_raw results; the old
        // value is dropped only after being swapped out, and the crash path
        // never swaps.
        unsafe { &*ptr }
    }
}

/// The sigaction entry point registered for every tracked signal. Everything
/// reachable from here before the fork is async-signal-safe.
pub(crate) extern "C" fn handle_posix_sigaction(
    signum: c_int,
    _sig_info: *mut siginfo_t,
    ucontext: *mut c_void,
) {
    handle_crash(signum, ucontext as *const ucontext_t);
}

static TIMES_ENTERED: AtomicU64 = AtomicU64::new(0);

fn handle_crash(signum: c_int, ucontext: *const ucontext_t) {
    // A second fatal signal while reporting (including one raised by the
    // report path itself, since the reporter inherits both the handler and
    // a non-zero counter) must die through the default disposition. Merely
    // returning would re-execute the faulting instruction and loop.
    if TIMES_ENTERED.fetch_add(1, SeqCst) > 0 {
        let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
        if let Ok(signal) = Signal::try_from(signum) {
            // SAFETY: re-arming the kernel default for the signal we took.
            let _ = unsafe { signal::sigaction(signal, &default) };
        }
        // SAFETY: re-raising with the default disposition pending; delivery
        // on handler return terminates the process.
        unsafe { libc::raise(signum) };
        return;
    }

    let config = loaded_config();

    // Raw clone, not fork(): pthread_atfork handlers may touch locks the
    // crashed thread holds.
    match alt_fork() {
        0 => run_reporter_child(signum, ucontext, config),
        pid if pid > 0 => finish_parent(Pid::from_raw(pid), config),
        _ => {
            write_to_stderr(b"Failed to fork the reporter process\n");
            terminate()
        }
    }
}

/// Parent-side epilogue: wait for the reporter, then die the configured way.
fn finish_parent(child: Pid, config: &HandlerConfig) -> ! {
    if config.thread_safe() {
        // Freeze every thread immediately so none of them run over the
        // snapshot the reporter is reading; the reporter sends SIGCONT when
        // the trace is out.
        let _ = signal::kill(nix::unistd::getpid(), Signal::SIGSTOP);
        let _ = wait::waitpid(child, Some(WaitPidFlag::WNOHANG));
    } else {
        let _ = wait::waitpid(child, None);
    }

    if config.quick_exit() {
        // SAFETY: no preconditions.
        unsafe { quick_exit(libc::EXIT_FAILURE) }
    }
    if config.generate_core_dump() {
        let abort_default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
        // SAFETY: restoring the default disposition so the re-raised abort
        // dumps core instead of re-entering this handler.
        let _ = unsafe { signal::sigaction(Signal::SIGABRT, &abort_default) };
        // SAFETY: no preconditions.
        unsafe { libc::abort() }
    }
    if config.cleanup() {
        std::process::exit(libc::EXIT_FAILURE);
    }
    terminate()
}

#[cfg(test)]
pub(crate) static CONFIG_TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_slot_defaults_then_updates() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        assert_eq!(loaded_config().frames_count(), DEFAULT_CONFIG.frames_count());

        let mut config = HandlerConfig::new();
        config.set_append_pid(true);
        config.set_frames_count(40).unwrap();
        install_config(config);

        assert_eq!(loaded_config().frames_count(), 40);
        assert!(loaded_config().append_pid());

        install_config(HandlerConfig::new());
        assert!(!loaded_config().append_pid());
    }

    #[test]
    fn test_reentered_handler_dies_by_default_disposition() {
        use nix::sys::wait::{waitpid, WaitStatus};

        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        match unsafe { libc::fork() } {
            0 => {
                // The reporter child's situation: handler installed, counter
                // already past the first entry, and a fresh hardware fault.
                TIMES_ENTERED.store(1, SeqCst);
                let action = SigAction::new(
                    SigHandler::SigAction(handle_posix_sigaction),
                    SaFlags::SA_RESTART,
                    SigSet::empty(),
                );
                unsafe { signal::sigaction(Signal::SIGSEGV, &action).unwrap() };
                unsafe { std::ptr::write_volatile(std::ptr::null_mut::<u32>(), 1) };
                unsafe { libc::_exit(0) }
            }
            pid if pid > 0 => {
                // A looping handler would hang this wait forever.
                let status = waitpid(Pid::from_raw(pid), None).unwrap();
                assert!(
                    matches!(status, WaitStatus::Signaled(_, Signal::SIGSEGV, _)),
                    "child ended with {status:?}"
                );
            }
            _ => panic!("fork failed"),
        }
    }
}
