// Copyright (c) The spoon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING_TARGET, StderrStyles};
use camino::{FromPathBufError, Utf8PathBuf};
use owo_colors::OwoColorize;
use spoon_metadata::SpoonExitCode;
use spoon_runner::errors::{
    ConfigParseError, FleetInitError, FleetStateError, TestSelectorError, TransportError,
};
use std::error::Error;
use thiserror::Error;
use tracing::error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// Note that the #[error()] strings are mostly placeholder messages -- the expected way to print out
// errors is with the display_to_stderr method, which colorizes errors.

/// An error that spoon anticipates and reports with a documented exit code.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("could not determine the current directory")]
    CurrentDirFailed {
        #[source]
        err: std::io::Error,
    },
    #[error("current directory is not valid UTF-8")]
    CurrentDirInvalidUtf8 {
        #[source]
        err: FromPathBufError,
    },
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("test selector error")]
    TestSelectorError {
        #[from]
        err: TestSelectorError,
    },
    #[error("fleet setup error")]
    FleetInitError {
        #[from]
        err: FleetInitError,
    },
    #[error("fleet state error")]
    FleetStateError {
        #[from]
        err: FleetStateError,
    },
    #[error("error listing devices")]
    DeviceListError {
        #[source]
        err: TransportError,
    },
    #[error("error writing run summary")]
    WriteSummaryError {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("error serializing run summary")]
    SerializeSummaryError {
        #[source]
        err: serde_json::Error,
    },
    #[error("error writing to stdout")]
    WriteStdoutError {
        #[source]
        err: std::io::Error,
    },
    #[error("test run failed")]
    TestRunFailed,
}

impl ExpectedError {
    pub(crate) fn write_summary_error(path: impl Into<Utf8PathBuf>, err: std::io::Error) -> Self {
        Self::WriteSummaryError {
            path: path.into(),
            err,
        }
    }

    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::CurrentDirFailed { .. }
            | Self::CurrentDirInvalidUtf8 { .. }
            | Self::ConfigParseError { .. }
            | Self::TestSelectorError { .. }
            | Self::FleetStateError { .. }
            | Self::DeviceListError { .. } => SpoonExitCode::SETUP_ERROR,
            Self::FleetInitError { err } => match err {
                FleetInitError::NoDevices => SpoonExitCode::NO_DEVICES,
                FleetInitError::MissingArtifact { .. } => SpoonExitCode::MISSING_ARTIFACT,
                _ => SpoonExitCode::SETUP_ERROR,
            },
            Self::WriteSummaryError { .. }
            | Self::SerializeSummaryError { .. }
            | Self::WriteStdoutError { .. } => SpoonExitCode::WRITE_OUTPUT_ERROR,
            Self::TestRunFailed => SpoonExitCode::TEST_RUN_FAILED,
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match &self {
            Self::CurrentDirFailed { err } => {
                error!("could not determine the current directory");
                Some(err as &dyn Error)
            }
            Self::CurrentDirInvalidUtf8 { err } => {
                error!("current directory is not valid UTF-8");
                Some(err as &dyn Error)
            }
            Self::ConfigParseError { err } => {
                error!(
                    "failed to parse spoon config at `{}`",
                    err.config_file().style(styles.bold)
                );
                err.source()
            }
            Self::TestSelectorError { err } => {
                error!("{err}");
                None
            }
            Self::FleetInitError { err } => {
                match err {
                    FleetInitError::NoDevices => {
                        error!("no devices available to run tests on");
                        error!(
                            target: NO_HEADING_TARGET,
                            "(hint: {} to list attached devices)",
                            "spoon devices".style(styles.bold),
                        );
                    }
                    FleetInitError::MissingArtifact { kind, path } => {
                        error!("{kind} APK `{}` does not exist", path.style(styles.bold));
                    }
                    other => error!("{other}"),
                }
                err.source()
            }
            Self::FleetStateError { err } => {
                error!("{err}");
                None
            }
            Self::DeviceListError { err } => {
                error!("error listing attached devices");
                Some(err as &dyn Error)
            }
            Self::WriteSummaryError { path, err } => {
                error!("error writing run summary to `{}`", path.style(styles.bold));
                Some(err as &dyn Error)
            }
            Self::SerializeSummaryError { err } => {
                error!("error serializing run summary");
                Some(err as &dyn Error)
            }
            Self::WriteStdoutError { err } => {
                error!("error writing to stdout");
                Some(err as &dyn Error)
            }
            Self::TestRunFailed => {
                error!("test run failed");
                None
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}
