// SPDX-License-Identifier: Apache-2.0

//! Scratch arena active while a stack capture is in flight.
//!
//! The classic trick of swapping glibc's `__malloc_hook` pair for the
//! duration of the unwind no longer exists (the hooks were removed in glibc
//! 2.34), so this takes the stronger route: nothing in the capture path calls
//! an allocating unwinder, and the small amounts of dynamic-sized memory the
//! reporting path does need (the resolver's per-frame exec arguments) come
//! from a fixed 512-byte static arena. Allocation is bump-only, deallocation
//! is a no-op, and a request the arena cannot serve is a fatal internal error:
//! the capture machinery is not expected to need more, and falling back to
//! the possibly-corrupted process heap is exactly what this exists to avoid.

use crate::collector::safe_write::{terminate, write_to_stderr};
use crate::shared::constants::SCRATCH_ARENA_SIZE;
use std::cell::UnsafeCell;
use std::sync::atomic::Ordering::SeqCst;
use std::sync::atomic::{AtomicBool, AtomicUsize};

struct Arena(UnsafeCell<[u8; SCRATCH_ARENA_SIZE]>);

// SAFETY: handed out only while ACTIVE, and a capture is single-threaded by
// construction (only the forked reporter ever activates the arena).
unsafe impl Sync for Arena {}

static ARENA: Arena = Arena(UnsafeCell::new([0; SCRATCH_ARENA_SIZE]));
static CURSOR: AtomicUsize = AtomicUsize::new(0);
static ACTIVE: AtomicBool = AtomicBool::new(false);

/// RAII scope for one capture. Construction activates the arena and resets
/// the bump cursor; drop deactivates it on every exit path, since leaving the
/// arena armed would hand out stale scratch memory to a later caller.
pub(crate) struct CaptureGuard {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl CaptureGuard {
    pub fn new() -> Self {
        CURSOR.store(0, SeqCst);
        ACTIVE.store(true, SeqCst);
        Self {
            _not_send: std::marker::PhantomData,
        }
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        ACTIVE.store(false, SeqCst);
    }
}

/// Releases everything handed out so far. The per-frame resolver scratch is
/// dead by the time the next frame is processed, so the reporter resets the
/// cursor between frames instead of ever freeing.
pub(crate) fn scratch_reset() {
    CURSOR.store(0, SeqCst);
}

/// Bump-allocates `len` bytes from the arena. `None` when no capture is in
/// flight or the arena cannot serve the request.
pub(crate) fn scratch_alloc(len: usize) -> Option<&'static mut [u8]> {
    if !ACTIVE.load(SeqCst) {
        return None;
    }
    let start = CURSOR.fetch_add(len, SeqCst);
    let end = start.checked_add(len)?;
    if end > SCRATCH_ARENA_SIZE {
        return None;
    }
    // SAFETY: ACTIVE guarantees exclusive single-threaded use, and disjoint
    // cursor ranges never alias.
    unsafe {
        let base = ARENA.0.get() as *mut u8;
        Some(std::slice::from_raw_parts_mut(base.add(start), len))
    }
}

/// Crash-path variant: an unsatisfiable request means the capture machinery
/// itself is broken, so fail fast rather than risk a secondary heap fault.
pub(crate) fn scratch_alloc_or_die(len: usize) -> &'static mut [u8] {
    match scratch_alloc(len) {
        Some(slice) => slice,
        None => {
            write_to_stderr(b"scratch arena cannot serve the requested block\n");
            terminate()
        }
    }
}

#[cfg(test)]
pub(crate) static ARENA_TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inactive_arena_refuses() {
        let _lock = ARENA_TEST_LOCK.lock().unwrap();
        assert!(scratch_alloc(16).is_none());
    }

    #[test]
    fn test_alloc_within_capacity() {
        let _lock = ARENA_TEST_LOCK.lock().unwrap();
        let _guard = CaptureGuard::new();
        let block = scratch_alloc(64).expect("64 bytes fit");
        assert_eq!(block.len(), 64);
        block.fill(0xAB);
        let other = scratch_alloc(64).expect("second block fits");
        other.fill(0xCD);
        assert!(block.iter().all(|&b| b == 0xAB), "blocks must not alias");
    }

    #[test]
    fn test_oversized_request_refused() {
        let _lock = ARENA_TEST_LOCK.lock().unwrap();
        let _guard = CaptureGuard::new();
        assert!(scratch_alloc(SCRATCH_ARENA_SIZE + 1).is_none());
    }

    #[test]
    fn test_exhaustion_and_reset() {
        let _lock = ARENA_TEST_LOCK.lock().unwrap();
        let _guard = CaptureGuard::new();
        assert!(scratch_alloc(SCRATCH_ARENA_SIZE).is_some());
        assert!(scratch_alloc(1).is_none());
        scratch_reset();
        assert!(scratch_alloc(1).is_some());
    }

    #[test]
    fn test_guard_drop_deactivates() {
        let _lock = ARENA_TEST_LOCK.lock().unwrap();
        {
            let _guard = CaptureGuard::new();
            assert!(scratch_alloc(8).is_some());
        }
        assert!(scratch_alloc(8).is_none());
    }
}
