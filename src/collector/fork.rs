// SPDX-License-Identifier: Apache-2.0

//! Isolation fork for the crash reporter.
//!
//! The reporter needs a private copy-on-write snapshot of the crashing
//! process's address space. On Linux the fork goes through `clone(2)`
//! directly with the same flags glibc's `fork()` uses, skipping the atfork
//! handlers: those may try to take locks the faulting thread already holds.

#[cfg(target_os = "linux")]
pub(crate) fn alt_fork() -> libc::pid_t {
    use libc::{
        c_ulong, c_void, pid_t, syscall, SYS_clone, CLONE_CHILD_CLEARTID, CLONE_CHILD_SETTID,
        SIGCHLD,
    };

    let mut ptid: pid_t = 0;
    let mut ctid: pid_t = 0;

    // SAFETY: the raw clone(2) replicates a plain fork(); the out-pointers
    // live across the call.
    let res = unsafe {
        syscall(
            SYS_clone,
            (CLONE_CHILD_CLEARTID | CLONE_CHILD_SETTID | SIGCHLD) as c_ulong,
            std::ptr::null_mut::<c_void>(),
            &mut ptid as *mut pid_t,
            &mut ctid as *mut pid_t,
            0 as c_ulong,
        )
    };

    // PIDs fit an i32; anything outside is a sign-extended error value.
    if (res as i64) > (pid_t::MAX as i64) {
        pid_t::MAX
    } else if (res as i64) < (pid_t::MIN as i64) {
        pid_t::MIN
    } else {
        res as pid_t
    }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn alt_fork() -> libc::pid_t {
    // No usable lower-level clone on other unices; atfork handlers run.
    // SAFETY: no preconditions.
    unsafe { libc::fork() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::wait::{waitpid, WaitStatus};
    use nix::unistd::Pid;

    #[test]
    fn test_alt_fork_child_is_reapable() {
        match alt_fork() {
            0 => unsafe { libc::_exit(7) },
            pid if pid > 0 => {
                let status = waitpid(Pid::from_raw(pid), None).expect("child reaped");
                assert_eq!(status, WaitStatus::Exited(Pid::from_raw(pid), 7));
            }
            _ => panic!("alt_fork failed"),
        }
    }
}
