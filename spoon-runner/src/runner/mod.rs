// Copyright (c) The spoon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Drives test runs on devices.
//!
//! A [`DeviceRunner`] owns a single device's lifecycle: install, run, collect. A
//! [`FleetCoordinator`] owns one runner per device and drives them concurrently, folding their
//! results into a [`RunSummary`](crate::model::RunSummary).

mod device;
mod fleet;
mod launcher;

pub use device::*;
pub use fleet::*;

use std::fmt;

/// The lifecycle state of a [`DeviceRunner`].
///
/// ```text
/// Created -> Installing -> InstallFailed
///                       -> Installed -> Running -> Collecting -> Finished
/// ```
///
/// `Running` may be re-entered. `InstallFailed` and `Finished` are terminal.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeviceRunnerState {
    /// The runner has been created but nothing has been installed.
    Created,

    /// Packages are being installed.
    Installing,

    /// A package failed to install. The device will not run tests.
    InstallFailed,

    /// Both packages are installed.
    Installed,

    /// Tests have been run at least once.
    Running,

    /// Logs and screenshots are being collected.
    Collecting,

    /// The device result has been sealed.
    Finished,
}

impl DeviceRunnerState {
    /// Returns true if no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::InstallFailed | Self::Finished)
    }
}

impl fmt::Display for DeviceRunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Installing => "installing",
            Self::InstallFailed => "install-failed",
            Self::Installed => "installed",
            Self::Running => "running",
            Self::Collecting => "collecting",
            Self::Finished => "finished",
        };
        f.write_str(s)
    }
}

/// The lifecycle state of a [`FleetCoordinator`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FleetState {
    /// No devices have been set up yet.
    Created,

    /// Devices have been set up and packages installed.
    Initialized,

    /// Tests have been run at least once.
    Ran,
}

impl fmt::Display for FleetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "not initialized",
            Self::Initialized => "initialized",
            Self::Ran => "done running tests",
        };
        f.write_str(s)
    }
}

/// How a device's instrumentation run ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunStatus {
    /// The event stream ended normally.
    Completed,

    /// The transport failed while running instrumentation. The failure was recorded as a device
    /// exception.
    TransportFailed,

    /// The device went silent for longer than the configured limit. The timeout was recorded as
    /// a device exception.
    TimedOut,
}
