// SPDX-License-Identifier: Apache-2.0

//! Structures and constants shared between the handler lifecycle and the
//! crash-reporting path.

pub(crate) mod configuration;
pub(crate) mod constants;
