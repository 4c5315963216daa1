// Copyright (c) The spoon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Stable constants shared between spoon and tools that drive it.
//!
//! Currently this is limited to the process exit codes documented in [`SpoonExitCode`].

mod exit_codes;

pub use exit_codes::*;
