// Copyright (c) The spoon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The data model for device test runs.
//!
//! Results are accumulated through builders while devices are running: a
//! [`DeviceResultBuilder`] per device, holding one [`TestResultBuilder`] per test. Once a device
//! finishes, its builder is sealed into an immutable [`DeviceResult`], and every device result is
//! folded into a [`RunSummary`].

mod device;
mod identity;
mod logs;
mod summary;
mod test_result;

pub use device::*;
pub use identity::*;
pub use logs::*;
pub use summary::*;
pub use test_result::*;
