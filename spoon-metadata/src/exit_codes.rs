// Copyright (c) The spoon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `spoon` failures.
///
/// `spoon` runs may fail for a variety of reasons. This structure documents the exit codes that
/// may occur in case of expected failures.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum SpoonExitCode {}

impl SpoonExitCode {
    /// No errors occurred and every test passed on every device.
    pub const OK: i32 = 0;

    /// No devices were available, and at least one device was required.
    pub const NO_DEVICES: i32 = 4;

    /// An application or instrumentation package could not be found.
    pub const MISSING_ARTIFACT: i32 = 5;

    /// A user issue happened while setting up a spoon invocation.
    pub const SETUP_ERROR: i32 = 96;

    /// One or more tests failed, or a device could not complete its run.
    pub const TEST_RUN_FAILED: i32 = 100;

    /// Writing the run summary or another output file produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;

    /// Returns a short, human-readable name for the given exit code, if it is documented.
    pub fn name(code: i32) -> Option<&'static str> {
        match code {
            Self::OK => Some("ok"),
            Self::NO_DEVICES => Some("no-devices"),
            Self::MISSING_ARTIFACT => Some("missing-artifact"),
            Self::SETUP_ERROR => Some("setup-error"),
            Self::TEST_RUN_FAILED => Some("test-run-failed"),
            Self::WRITE_OUTPUT_ERROR => Some("write-output-error"),
            _ => None,
        }
    }
}
