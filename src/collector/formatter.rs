// SPDX-License-Identifier: Apache-2.0

//! Turns resolved frames into finished output lines.
//!
//! All lines are assembled in fixed-capacity buffers and written through the
//! raw stderr primitive. The informational content is identical with and
//! without colorization; the ANSI escapes are pure decoration, and external
//! tooling is expected to grep these lines for function names, file names and
//! `:<line>` suffixes.

use crate::collector::resolver::ResolvedFrame;
use crate::collector::safe_write::{itoa, utoa, write_to_stderr, LineBuf};
use crate::shared::configuration::HandlerConfig;
use crate::shared::constants::{
    COLOR_EMPHASIS, COLOR_FUNCTION, COLOR_LOCATION, COLOR_RESET, COLOR_SIGNAL,
};
use libc::c_int;

/// Banner plus the `Stack trace:` heading, written once before any frame.
pub(crate) fn write_banner(signum: c_int, config: &HandlerConfig) {
    // SAFETY: pthread_self has no preconditions; the id survives the fork.
    let tid = unsafe { libc::pthread_self() } as usize as u64;
    let pid = nix::unistd::getppid().as_raw();
    let line = format_banner(signum, tid, pid, config);
    write_to_stderr(line.as_bytes());
}

pub(crate) fn write_frame(frame: &ResolvedFrame, cwd: &[u8], config: &HandlerConfig) {
    let pid = nix::unistd::getppid().as_raw();
    if frame.resolved {
        let function = format_function_line(frame.function.as_str(), pid, config);
        write_to_stderr(function.as_bytes());
        let location = format_location_line(frame.location.as_bytes(), cwd, pid, config);
        write_to_stderr(location.as_bytes());
    } else {
        let line = format_unresolved_line(frame, pid, config);
        write_to_stderr(line.as_bytes());
    }
}

pub(crate) fn format_banner(signum: c_int, tid: u64, pid: i32, config: &HandlerConfig) -> LineBuf {
    let mut line = LineBuf::new();
    if config.color_output() {
        line.push_str(COLOR_SIGNAL);
    }
    match signum {
        libc::SIGSEGV => line.push_str("Segmentation fault"),
        libc::SIGABRT => line.push_str("Aborted"),
        other => {
            line.push_str("Caught signal ");
            line.push_i64(other as i64, 10);
        }
    }
    if config.color_output() {
        line.push_str(COLOR_RESET);
    }
    line.push_str(" (thread ");
    push_emphasized_u64(&mut line, tid, config);
    line.push_str(", pid ");
    push_emphasized_u64(&mut line, pid as u64, config);
    line.push_str(")\nStack trace:\n");
    line
}

/// `[function]`, optionally colorized and pid-decorated.
pub(crate) fn format_function_line(function: &str, pid: i32, config: &HandlerConfig) -> LineBuf {
    let mut line = LineBuf::new();
    if config.color_output() {
        line.push_str(COLOR_FUNCTION);
    }
    line.push_byte(b'[');
    line.push_str(function);
    line.push_byte(b']');
    if config.color_output() {
        line.push_str(COLOR_RESET);
    }
    push_pid_suffix(&mut line, pid, config);
    line.push_byte(b'\n');
    line
}

/// The `file:line` detail line with path normalization applied.
pub(crate) fn format_location_line(
    location: &[u8],
    cwd: &[u8],
    pid: i32,
    config: &HandlerConfig,
) -> LineBuf {
    let mut path = location;
    if config.cut_common_path_root() {
        path = strip_common_root(path, cwd);
    }
    if config.cut_relative_paths() {
        path = strip_relative_segments(path);
    }

    let mut line = LineBuf::new();
    match path.iter().rposition(|&b| b == b':') {
        Some(colon) if config.color_output() => {
            line.push_bytes(&path[..colon]);
            line.push_str(COLOR_LOCATION);
            line.push_bytes(&path[colon..]);
            line.push_str(COLOR_RESET);
        }
        _ => line.push_bytes(path),
    }
    push_pid_suffix(&mut line, pid, config);
    line.push_byte(b'\n');
    line
}

/// Fallback line for frames without symbol information:
/// `<hex address> at <image path>`.
pub(crate) fn format_unresolved_line(
    frame: &ResolvedFrame,
    pid: i32,
    config: &HandlerConfig,
) -> LineBuf {
    let mut line = LineBuf::new();
    if config.color_output() {
        line.push_str(COLOR_LOCATION);
    }
    line.push_ptr(frame.address);
    if config.color_output() {
        line.push_str(COLOR_RESET);
    }
    line.push_str(" at ");
    line.push_bytes(frame.image.as_bytes());
    push_pid_suffix(&mut line, pid, config);
    line.push_byte(b'\n');
    line
}

fn push_emphasized_u64(line: &mut LineBuf, value: u64, config: &HandlerConfig) {
    if config.color_output() {
        line.push_str(COLOR_EMPHASIS);
    }
    line.push_bytes(utoa(value, 10).as_bytes());
    if config.color_output() {
        line.push_str(COLOR_RESET);
    }
}

fn push_pid_suffix(line: &mut LineBuf, pid: i32, config: &HandlerConfig) {
    if !config.append_pid() {
        return;
    }
    line.push_byte(b' ');
    if config.color_output() {
        line.push_str(COLOR_EMPHASIS);
    }
    line.push_byte(b'(');
    line.push_bytes(itoa(pid as i64, 10).as_bytes());
    line.push_byte(b')');
    if config.color_output() {
        line.push_str(COLOR_RESET);
    }
}

/// Removes the working-directory prefix from `path`, shortening absolute
/// paths to project-relative ones. The shared prefix is cut back to the last
/// path separator before the divergence point. Idempotent: a stripped path is
/// relative and shares nothing with an absolute cwd.
pub(crate) fn strip_common_root<'a>(path: &'a [u8], cwd: &[u8]) -> &'a [u8] {
    let mut common = 0;
    while common < path.len() && common < cwd.len() && path[common] == cwd[common] {
        common += 1;
    }
    let cut = path[..common]
        .iter()
        .rposition(|&b| b == b'/')
        .map(|sep| sep + 1)
        .unwrap_or(0);
    if cut > 1 {
        &path[cut..]
    } else {
        path
    }
}

/// Consumes the first run of `../` segments, including anything before it,
/// leaving the path starting at the first real directory name.
pub(crate) fn strip_relative_segments(path: &[u8]) -> &[u8] {
    let Some(pos) = find_subslice(path, b"../") else {
        return path;
    };
    let mut cut = pos + 3;
    while path[cut..].starts_with(b"../") {
        cut += 3;
    }
    &path[cut..]
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
