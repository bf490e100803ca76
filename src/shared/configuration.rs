// SPDX-License-Identifier: Apache-2.0

use crate::shared::constants::{DEFAULT_FRAMES_COUNT, FRAME_BUFFER_PAD, MAX_FRAMES_COUNT};

/// Process-wide tunables for the crash handler.
///
/// Writers are expected to mutate a `HandlerConfig` only before the handler is
/// installed (typically once, near process start). The signal handler reads
/// the installed copy and never writes it, so no locking is needed as long as
/// that single-writer-before-activation discipline holds. A setter call after
/// installation only takes effect once the new value is re-installed via
/// [`crate::update_config`], and racing that against a concurrent crash means
/// either the old or the new copy may be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerConfig {
    generate_core_dump: bool,
    cleanup: bool,
    quick_exit: bool,
    frames_count: usize,
    cut_common_path_root: bool,
    cut_relative_paths: bool,
    append_pid: bool,
    color_output: bool,
    thread_safe: bool,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerConfig {
    pub const fn new() -> Self {
        Self {
            generate_core_dump: true,
            cleanup: true,
            quick_exit: false,
            frames_count: DEFAULT_FRAMES_COUNT,
            cut_common_path_root: true,
            cut_relative_paths: true,
            append_pid: false,
            color_output: true,
            thread_safe: true,
        }
    }

    /// Whether the parent re-raises SIGABRT with the default disposition after
    /// the trace is printed, producing a core dump and the conventional
    /// abnormal-termination status.
    pub fn generate_core_dump(&self) -> bool {
        self.generate_core_dump
    }

    /// Whether the parent exits through `exit(3)` (running atexit handlers)
    /// rather than `_exit(2)`. Only consulted when no core dump is requested.
    pub fn cleanup(&self) -> bool {
        self.cleanup
    }

    /// Whether the parent exits through `quick_exit(3)`. Takes precedence over
    /// both the core-dump and cleanup dispositions.
    pub fn quick_exit(&self) -> bool {
        self.quick_exit
    }

    /// Number of stack frames reported, not counting the handler's own
    /// trampoline frames.
    pub fn frames_count(&self) -> usize {
        self.frames_count
    }

    pub fn cut_common_path_root(&self) -> bool {
        self.cut_common_path_root
    }

    pub fn cut_relative_paths(&self) -> bool {
        self.cut_relative_paths
    }

    pub fn append_pid(&self) -> bool {
        self.append_pid
    }

    pub fn color_output(&self) -> bool {
        self.color_output
    }

    /// When set, the crashing process freezes all of its threads (SIGSTOP to
    /// itself) while the reporter runs, and is resumed with SIGCONT once the
    /// trace is complete. When unset, only the faulting thread blocks and
    /// sibling threads keep running, possibly crashing independently.
    pub fn thread_safe(&self) -> bool {
        self.thread_safe
    }

    pub fn set_generate_core_dump(&mut self, value: bool) {
        self.generate_core_dump = value;
    }

    pub fn set_cleanup(&mut self, value: bool) {
        self.cleanup = value;
    }

    pub fn set_quick_exit(&mut self, value: bool) {
        self.quick_exit = value;
    }

    pub fn set_frames_count(&mut self, value: usize) -> anyhow::Result<()> {
        anyhow::ensure!(
            value > 0 && value <= MAX_FRAMES_COUNT,
            "frames_count must be in (0, {MAX_FRAMES_COUNT}], got {value}"
        );
        self.frames_count = value;
        Ok(())
    }

    pub fn set_cut_common_path_root(&mut self, value: bool) {
        self.cut_common_path_root = value;
    }

    pub fn set_cut_relative_paths(&mut self, value: bool) {
        self.cut_relative_paths = value;
    }

    pub fn set_append_pid(&mut self, value: bool) {
        self.append_pid = value;
    }

    pub fn set_color_output(&mut self, value: bool) {
        self.color_output = value;
    }

    pub fn set_thread_safe(&mut self, value: bool) {
        self.thread_safe = value;
    }

    /// Capture-buffer length: the configured frame count plus two slots for
    /// the signal trampoline artifacts the walker reports first.
    pub(crate) fn frame_buffer_len(&self) -> usize {
        self.frames_count + FRAME_BUFFER_PAD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = HandlerConfig::default();
        assert!(config.generate_core_dump());
        assert!(config.cleanup());
        assert!(!config.quick_exit());
        assert_eq!(config.frames_count(), DEFAULT_FRAMES_COUNT);
        assert!(config.cut_common_path_root());
        assert!(config.cut_relative_paths());
        assert!(!config.append_pid());
        assert!(config.color_output());
        assert!(config.thread_safe());
    }

    #[test]
    fn test_frames_count_bounds() {
        let mut config = HandlerConfig::default();
        assert!(config.set_frames_count(0).is_err());
        assert!(config.set_frames_count(MAX_FRAMES_COUNT + 1).is_err());
        assert!(config.set_frames_count(1).is_ok());
        assert_eq!(config.frames_count(), 1);
        assert!(config.set_frames_count(MAX_FRAMES_COUNT).is_ok());
        assert_eq!(config.frames_count(), MAX_FRAMES_COUNT);
    }

    #[test]
    fn test_frame_buffer_accommodates_trampoline_slots() {
        let mut config = HandlerConfig::default();
        for n in 1..=MAX_FRAMES_COUNT {
            config.set_frames_count(n).unwrap();
            assert_eq!(config.frame_buffer_len(), n + FRAME_BUFFER_PAD);
            assert!(config.frame_buffer_len() <= MAX_FRAMES_COUNT + FRAME_BUFFER_PAD);
        }
    }
}
