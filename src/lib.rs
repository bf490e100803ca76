// SPDX-License-Identifier: Apache-2.0

//! In-process fatal-signal reporter.
//!
//! When the process takes SIGSEGV or SIGABRT, a handler forks a reporter
//! process that owns a copy-on-write snapshot of the crashed address space,
//! prints a resolved, colorized stack trace to stderr, and then lets the
//! original process die the way it was configured to (core dump, clean exit,
//! quick exit, or immediate exit).
//!
//! The handler itself stays async-signal-safe: it allocates nothing, calls
//! nothing non-reentrant, and defers all heavy lifting (unwinding, symbol
//! resolution through `addr2line`, formatting) to the forked child, where a
//! corrupted heap in the parent cannot bite.
//!
//! ```no_run
//! fn main() -> anyhow::Result<()> {
//!     let config = sigtrace::HandlerConfig::new();
//!     let _handler = sigtrace::install(config)?;
//!     // crash anywhere past this point and a stack trace lands on stderr
//!     Ok(())
//! }
//! ```

#[cfg(unix)]
mod collector;
#[cfg(unix)]
mod shared;

#[cfg(unix)]
pub use collector::{HandlerRegistration, RegistrationError};
#[cfg(unix)]
pub use shared::configuration::HandlerConfig;

/// Installs the crash handler for SIGSEGV and SIGABRT.
///
/// The returned guard restores the previous signal dispositions when dropped,
/// so keep it alive for as long as crashes should be reported. Installing a
/// second guard while one is live is allowed; dispositions then unwind in
/// drop order.
#[cfg(unix)]
pub fn install(config: HandlerConfig) -> Result<HandlerRegistration, RegistrationError> {
    HandlerRegistration::new(config)
}

/// Replaces the configuration consulted at crash time without touching the
/// signal dispositions.
#[cfg(unix)]
pub fn update_config(config: HandlerConfig) {
    collector::install_config(config);
}
