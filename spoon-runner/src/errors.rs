// Copyright (c) The spoon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by spoon.
//!
//! Errors here are scoped: [`InstallError`] and [`TransportError`] only ever affect a single
//! device, and are recorded into that device's result. [`FleetInitError`] is the only error that
//! aborts a run.

use crate::{
    model::{TestIdentity, TestOutcomeStatus},
    runner::{DeviceRunnerState, FleetState},
};
use camino::Utf8PathBuf;
use config::ConfigError;
use std::{error, fmt, io};
use thiserror::Error;

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error("failed to parse spoon config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    err: ConfigError,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, err: ConfigError) -> Self {
        Self {
            config_file: config_file.into(),
            err,
        }
    }

    /// Returns the config file for this error.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }
}

/// An error that occurs while building a [`TestSelector`](crate::model::TestSelector).
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[non_exhaustive]
pub enum TestSelectorError {
    /// A method name was specified without a class name.
    #[error("method name `{method_name}` was specified without a class name")]
    MethodWithoutClass {
        /// The method name.
        method_name: String,
    },
}

/// An error that occurs while parsing a [`TestSize`](crate::transport::TestSize) from a string.
#[derive(Clone, Debug, Error)]
#[error("unrecognized value for test size: {input}\n(known values: small, medium, large)")]
pub struct TestSizeParseError {
    input: String,
}

impl TestSizeParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// An error that occurred while talking to a device.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// A device command could not be spawned.
    #[error("failed to spawn `{command}`")]
    Spawn {
        /// The command that was being spawned.
        command: String,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// A device command exited unsuccessfully.
    #[error("`{command}` failed ({status}): {stderr}")]
    CommandFailed {
        /// The command that failed.
        command: String,

        /// A description of the exit status.
        status: String,

        /// Standard error produced by the command, trimmed.
        stderr: String,
    },

    /// A device command produced output that couldn't be interpreted.
    #[error("unexpected output from `{command}`: {message}")]
    InvalidOutput {
        /// The command.
        command: String,

        /// What was wrong with the output.
        message: String,
    },

    /// A local filesystem operation performed on behalf of the device failed.
    #[error("I/O error at `{path}`")]
    Io {
        /// The path being operated on.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// A scripted or in-memory transport reported a failure.
    #[error("device transport failure: {message}")]
    Other {
        /// A description of the failure.
        message: String,
    },
}

impl TransportError {
    /// Creates a new `TransportError::Other` with the given message.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}

/// An error that occurred while installing a package on a device.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InstallError {
    /// The device rejected the package.
    #[error("device rejected `{package}`: {reason}")]
    Rejected {
        /// The package file that was being installed.
        package: Utf8PathBuf,

        /// The reason reported by the device.
        reason: String,
    },

    /// The package could not be delivered to the device.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// An operation was attempted on a device runner in a state that doesn't allow it.
#[derive(Clone, Debug, Error)]
#[error("cannot {operation} on device `{serial}`: runner is {state}")]
pub struct DeviceStateError {
    serial: String,
    operation: &'static str,
    state: DeviceRunnerState,
}

impl DeviceStateError {
    pub(crate) fn new(
        serial: impl Into<String>,
        operation: &'static str,
        state: DeviceRunnerState,
    ) -> Self {
        Self {
            serial: serial.into(),
            operation,
            state,
        }
    }

    /// Returns the state the runner was in.
    pub fn state(&self) -> DeviceRunnerState {
        self.state
    }
}

/// An operation was attempted on the fleet coordinator in a state that doesn't allow it.
#[derive(Clone, Debug, Error)]
#[error("cannot {operation}: fleet is {state}")]
pub struct FleetStateError {
    operation: &'static str,
    state: FleetState,
}

impl FleetStateError {
    pub(crate) fn new(operation: &'static str, state: FleetState) -> Self {
        Self { operation, state }
    }

    /// Returns the state the fleet was in.
    pub fn state(&self) -> FleetState {
        self.state
    }
}

/// A fleet-scoped error that aborts the run before any device is exercised.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FleetInitError {
    /// No devices were available and the run was configured to fail in that case.
    #[error("no devices available to run tests on")]
    NoDevices,

    /// A package file required by the run does not exist.
    #[error("{kind} APK `{path}` does not exist")]
    MissingArtifact {
        /// Which package was missing ("application" or "instrumentation").
        kind: &'static str,

        /// The path that was checked.
        path: Utf8PathBuf,
    },

    /// The output directory could not be cleaned or created.
    #[error("error preparing output directory `{path}`")]
    CleanOutputDir {
        /// The output directory.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The list of attached devices could not be obtained.
    #[error("error listing attached devices")]
    DeviceDiscovery(#[source] TransportError),

    /// A transport to a device could not be established.
    #[error("error connecting to device `{serial}`")]
    Connect {
        /// The device serial.
        serial: String,

        /// The underlying error.
        #[source]
        error: TransportError,
    },

    /// An error occurred while creating the Tokio runtime.
    #[error("error creating Tokio runtime")]
    TokioRuntimeCreate(#[source] io::Error),

    /// The fleet was already initialized.
    #[error(transparent)]
    State(#[from] FleetStateError),
}

/// A test result transition was requested on a result that's already terminal.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("test `{identity}` is already {current}, cannot transition to {requested}")]
pub struct StatusTransitionError {
    identity: TestIdentity,
    current: TestOutcomeStatus,
    requested: TestOutcomeStatus,
}

impl StatusTransitionError {
    pub(crate) fn new(
        identity: TestIdentity,
        current: TestOutcomeStatus,
        requested: TestOutcomeStatus,
    ) -> Self {
        Self {
            identity,
            current,
            requested,
        }
    }

    /// Returns the status the result already had.
    pub fn current(&self) -> TestOutcomeStatus {
        self.current
    }
}

/// A second test result was published for a test identity within a device result.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("a result for `{identity}` was already recorded")]
pub struct DuplicateTestResult {
    identity: TestIdentity,
}

impl DuplicateTestResult {
    pub(crate) fn new(identity: TestIdentity) -> Self {
        Self { identity }
    }

    /// Returns the duplicated identity.
    pub fn identity(&self) -> &TestIdentity {
        &self.identity
    }
}

/// A second device result was added to a run summary under the same key.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("a result for device `{key}` was already recorded")]
pub struct DuplicateDeviceResult {
    key: String,
}

impl DuplicateDeviceResult {
    pub(crate) fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    /// Returns the duplicated key.
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// An error that occurred while organizing a device's screenshots.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ScreenshotError {
    /// A screenshot directory could not be read.
    #[error("error reading screenshot directory `{path}`")]
    ReadDir {
        /// The directory.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// An output directory could not be created.
    #[error("error creating directory `{path}`")]
    CreateDir {
        /// The directory.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// A screenshot could not be copied into the image directory.
    #[error("error copying screenshot `{from}` to `{to}`")]
    Copy {
        /// The source file.
        from: Utf8PathBuf,

        /// The destination file.
        to: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// A captured screenshot could not be encoded or written.
    #[error("error writing screenshot `{path}`")]
    Write {
        /// The destination file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: RawImageError,
    },

    /// The blocking task writing a captured screenshot panicked or was cancelled.
    #[error("task writing a screenshot into `{dir}` did not complete")]
    Task {
        /// The staging directory.
        dir: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: tokio::task::JoinError,
    },
}

/// An error that occurred while synthesizing an animated GIF out of screenshots.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GifError {
    /// A frame could not be opened or the output could not be created.
    #[error("I/O error at `{path}`")]
    Io {
        /// The file being read or written.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// A frame could not be decoded.
    #[error("error decoding frame `{path}`")]
    Decode {
        /// The frame file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: png::DecodingError,
    },

    /// A frame has a pixel layout that can't be converted into RGBA.
    #[error("frame `{path}` has unsupported color type {color_type:?}")]
    UnsupportedColor {
        /// The frame file.
        path: Utf8PathBuf,

        /// The color type after normalization.
        color_type: png::ColorType,
    },

    /// The frames are too large to fit into a GIF logical screen.
    #[error("frame `{path}` is too large for a GIF ({width}x{height})")]
    TooLarge {
        /// The frame file.
        path: Utf8PathBuf,

        /// Frame width.
        width: u32,

        /// Frame height.
        height: u32,
    },

    /// The GIF could not be encoded.
    #[error("error encoding `{path}`")]
    Encode {
        /// The output file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: gif::EncodingError,
    },

    /// The blocking task encoding the GIF panicked or was cancelled.
    #[error("task encoding `{path}` did not complete")]
    Task {
        /// The output file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: tokio::task::JoinError,
    },
}

/// An error that occurred while interpreting or encoding a raw framebuffer capture.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RawImageError {
    /// The framebuffer header was too short or had an unknown layout.
    #[error("invalid framebuffer header: {0}")]
    InvalidHeader(String),

    /// The framebuffer format isn't supported.
    #[error("unsupported framebuffer pixel format {0}")]
    UnsupportedFormat(u32),

    /// The pixel data is shorter than the dimensions require.
    #[error("framebuffer data is truncated: expected {expected} bytes, found {actual}")]
    Truncated {
        /// Number of bytes required.
        expected: usize,

        /// Number of bytes present.
        actual: usize,
    },

    /// The PNG encoder failed.
    #[error("error encoding PNG")]
    Encode(#[source] png::EncodingError),

    /// The PNG file could not be written.
    #[error("error writing PNG")]
    Io(#[source] io::Error),
}

/// An error that occurred while writing a per-device report.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WriteReportError {
    /// An error occurred while creating the report file or its directory.
    #[error("error writing JUnit report to `{file}`")]
    Fs {
        /// The file being written to.
        file: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// An error occurred while serializing the report.
    #[error("error serializing JUnit report to `{file}`")]
    Junit {
        /// The file being written to.
        file: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: quick_junit::SerializeError,
    },
}

/// The launcher activity couldn't be determined from package manager output.
#[derive(Clone, Debug, Error)]
#[error("unable to find launcher activity for package `{package}`")]
pub struct LauncherParseError {
    package: String,
}

impl LauncherParseError {
    pub(crate) fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
        }
    }
}

/// An error that occurred while looking up a package's launcher activity.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LauncherError {
    /// The package manager could not be queried.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The package manager output didn't name a launcher activity.
    #[error(transparent)]
    Parse(#[from] LauncherParseError),
}

/// Displays an error along with its chain of sources, on a single line.
pub struct DisplayErrorChain<E> {
    error: E,
}

impl<E: error::Error> DisplayErrorChain<E> {
    /// Creates a new `DisplayErrorChain`.
    pub fn new(error: E) -> Self {
        Self { error }
    }
}

impl<E: error::Error> fmt::Display for DisplayErrorChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;
        let mut source = self.error.source();
        while let Some(error) = source {
            write!(f, ": {error}")?;
            source = error.source();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_error_chain() {
        let error = TransportError::Io {
            path: "out/work".into(),
            error: io::Error::other("disk full"),
        };
        assert_eq!(
            DisplayErrorChain::new(&error).to_string(),
            "I/O error at `out/work`: disk full"
        );

        let error = InstallError::from(TransportError::other("device offline"));
        assert_eq!(
            DisplayErrorChain::new(&error).to_string(),
            "device transport failure: device offline"
        );
    }
}
