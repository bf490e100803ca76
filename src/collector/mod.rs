// SPDX-License-Identifier: Apache-2.0

mod alloc_guard;
mod crash_handler;
mod fork;
mod formatter;
mod reporter;
mod resolver;
mod safe_write;
mod signal_handler_manager;

pub(crate) use crash_handler::install_config;
pub use signal_handler_manager::{HandlerRegistration, RegistrationError};
