// Copyright (c) The spoon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `spoon` command-line interface.
//!
//! `spoon run` installs an application and its instrumentation on every attached Android device,
//! runs the tests concurrently and aggregates the results into per-device JUnit reports and a
//! JSON run summary. The engine itself lives in [`spoon_runner`].

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
#[doc(hidden)]
pub use output::{OutputContext, StderrStyles};
