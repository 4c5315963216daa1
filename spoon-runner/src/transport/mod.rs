// Copyright (c) The spoon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The boundary between spoon and the devices it talks to.
//!
//! A [`TransportProvider`] enumerates attached devices and hands out one [`DeviceTransport`] per
//! device. The [`adb`] module provides an implementation that shells out to the `adb` tool; tests
//! substitute scripted in-memory transports.

pub mod adb;

use crate::{
    errors::{InstallError, TestSizeParseError, TransportError},
    events::LifecycleEvent,
    model::{DeviceDetails, DeviceLogs, TestSelector},
    screenshots::RawImage,
};
use camino::Utf8Path;
use serde::Deserialize;
use std::{fmt, str::FromStr};
use tokio::sync::mpsc::UnboundedSender;

/// Options for installing a package on a device.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct InstallOptions {
    /// Replace the package if it's already installed.
    pub reinstall: bool,

    /// Allow installing a package with a lower version code than the one installed.
    pub allow_downgrade: bool,
}

/// Restricts an instrumentation run to tests annotated with a given size.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestSize {
    /// Small tests.
    Small,
    /// Medium tests.
    Medium,
    /// Large tests.
    Large,
}

impl TestSize {
    /// Returns the value passed to the instrumentation's `size` argument.
    pub fn as_arg(self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
        }
    }
}

impl FromStr for TestSize {
    type Err = TestSizeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "small" => Ok(Self::Small),
            "medium" => Ok(Self::Medium),
            "large" => Ok(Self::Large),
            other => Err(TestSizeParseError::new(other)),
        }
    }
}

impl fmt::Display for TestSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_arg())
    }
}

/// Describes the instrumentation to run on a device.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstrumentationRequest {
    /// The package containing the tests.
    pub instrumentation_package: String,

    /// The fully-qualified class name of the test runner.
    pub test_runner: String,

    /// Which tests to run.
    pub selector: TestSelector,

    /// Restrict the run to tests of this size.
    pub test_size: Option<TestSize>,
}

/// The outcome of pulling files from a device.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PullOutcome {
    /// The files were copied.
    Pulled,

    /// The remote path doesn't exist.
    NotFound,
}

/// A connection to a single device.
///
/// Every method is scoped to the device: failures are reported as errors and never affect other
/// devices.
#[allow(async_fn_in_trait)]
pub trait DeviceTransport {
    /// Installs a package file.
    async fn install_package(
        &self,
        package: &Utf8Path,
        options: InstallOptions,
    ) -> Result<(), InstallError>;

    /// Runs a shell command on the device, returning its standard output.
    async fn execute_shell_command(&self, command: &str) -> Result<String, TransportError>;

    /// Runs instrumentation tests, streaming lifecycle events into `events` as they're reported.
    ///
    /// Returns once the instrumentation has finished.
    async fn run_instrumentation(
        &self,
        request: &InstrumentationRequest,
        events: UnboundedSender<LifecycleEvent>,
    ) -> Result<(), TransportError>;

    /// Captures the current contents of the screen.
    async fn capture_screenshot(&self) -> Result<RawImage, TransportError>;

    /// Copies a remote directory to `local`.
    async fn pull_files(&self, remote: &str, local: &Utf8Path)
    -> Result<PullOutcome, TransportError>;

    /// Reads device metadata.
    async fn device_details(&self) -> Result<DeviceDetails, TransportError>;

    /// Starts capturing device logs.
    async fn start_log_capture(&self) -> Result<(), TransportError>;

    /// Returns the device logs captured since [`start_log_capture`](Self::start_log_capture),
    /// segmented by test.
    async fn collect_logs(&self) -> Result<DeviceLogs, TransportError>;
}

/// Enumerates devices and connects to them.
pub trait TransportProvider {
    /// The transport type handed out for each device.
    type Transport: DeviceTransport;

    /// Returns the serials of every device currently attached and ready.
    fn attached_devices(&self) -> Result<Vec<String>, TransportError>;

    /// Connects to the device with the given serial.
    fn connect(&self, serial: &str) -> Result<Self::Transport, TransportError>;
}
