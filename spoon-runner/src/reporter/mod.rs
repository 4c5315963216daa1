// Copyright (c) The spoon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-device reports.
//!
//! Each device's sealed result is written out as a JUnit XML report once the device finishes.
//! The run-wide summary is serialized by the caller, since [`RunSummary`](crate::model::RunSummary)
//! implements `Serialize`.

mod junit;

pub use junit::*;
