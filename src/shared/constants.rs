// SPDX-License-Identifier: Apache-2.0

//! Constants shared by the formatter and the crash-handling path.

/// Red bold, used for the signal name in the banner.
pub const COLOR_SIGNAL: &str = "\x1b[31;1m";
/// Yellow bold, used for thread ids and pids.
pub const COLOR_EMPHASIS: &str = "\x1b[33;1m";
/// Blue bold, used for bracketed function names.
pub const COLOR_FUNCTION: &str = "\x1b[34;1m";
/// Green bold, used for line numbers and raw addresses.
pub const COLOR_LOCATION: &str = "\x1b[32;1m";
pub const COLOR_RESET: &str = "\x1b[0m";

/// Upper bound on the configurable frame count.
pub const MAX_FRAMES_COUNT: usize = 100;
pub const DEFAULT_FRAMES_COUNT: usize = 16;
/// Extra slots for the handler trampoline frames the walker captures first.
pub const FRAME_BUFFER_PAD: usize = 2;

/// Size of the static scratch arena available while a capture is in flight.
pub const SCRATCH_ARENA_SIZE: usize = 512;
/// Upper bound on the output read back from the resolver subprocess.
pub const RESOLVER_OUTPUT_SIZE: usize = 4096;
pub const PATH_BUFFER_SIZE: usize = 1024;
pub const LINE_BUFFER_SIZE: usize = 1024;
