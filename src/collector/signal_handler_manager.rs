// SPDX-License-Identifier: Apache-2.0

//! Registration and restoration of the fatal-signal dispositions.

use crate::collector::crash_handler::{handle_posix_sigaction, install_config};
use crate::shared::configuration::HandlerConfig;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

/// The signals the handler intercepts.
pub(crate) const TRACKED_SIGNALS: [Signal; 2] = [Signal::SIGSEGV, Signal::SIGABRT];

#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("failed to install the handler for {signal:?}: {source}")]
    Install {
        signal: Signal,
        source: nix::Error,
    },
}

/// Owns the previous dispositions of every tracked signal; dropping it puts
/// them back.
pub struct HandlerRegistration {
    previous: Vec<(Signal, SigAction)>,
}

impl HandlerRegistration {
    /// Installs `config` and the crash handler for all tracked signals.
    ///
    /// On a mid-sequence failure the signals already taken over are restored
    /// before the error is returned, so a failed registration leaves the
    /// process exactly as it found it.
    pub(crate) fn new(config: HandlerConfig) -> Result<Self, RegistrationError> {
        install_config(config);

        let action = SigAction::new(
            SigHandler::SigAction(handle_posix_sigaction),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );

        let mut previous = Vec::with_capacity(TRACKED_SIGNALS.len());
        for signal in TRACKED_SIGNALS {
            // SAFETY: the handler only performs async-signal-safe work before
            // forking, and everything heavier runs in the child.
            match unsafe { signal::sigaction(signal, &action) } {
                Ok(old) => previous.push((signal, old)),
                Err(source) => {
                    Self::restore(&mut previous);
                    return Err(RegistrationError::Install { signal, source });
                }
            }
        }
        Ok(Self { previous })
    }

    fn restore(previous: &mut Vec<(Signal, SigAction)>) {
        while let Some((signal, action)) = previous.pop() {
            // SAFETY: re-installing a disposition sigaction itself reported.
            let _ = unsafe { signal::sigaction(signal, &action) };
        }
    }
}

impl Drop for HandlerRegistration {
    fn drop(&mut self) {
        Self::restore(&mut self.previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn current_segv_handler() -> SigAction {
        let probe = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
        let old = unsafe { signal::sigaction(Signal::SIGSEGV, &probe).unwrap() };
        unsafe { signal::sigaction(Signal::SIGSEGV, &old).unwrap() };
        old
    }

    #[test]
    fn test_registration_installs_and_drop_restores() {
        let _lock = crate::collector::crash_handler::CONFIG_TEST_LOCK.lock().unwrap();
        let before = current_segv_handler();

        let registration = HandlerRegistration::new(HandlerConfig::new()).unwrap();
        let during = current_segv_handler();
        assert_ne!(during.handler(), before.handler());
        assert_eq!(
            during.handler(),
            SigHandler::SigAction(handle_posix_sigaction)
        );

        drop(registration);
        let after = current_segv_handler();
        assert_eq!(after.handler(), before.handler());
    }
}
