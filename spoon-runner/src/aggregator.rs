// Copyright (c) The spoon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Computes the overall verdict for a run.
//!
//! A run is successful unless any device:
//!
//! * failed to install,
//! * recorded device-level exceptions without producing a single test result, or
//! * has a test whose status is anything other than [`Pass`](TestOutcomeStatus::Pass).
//!
//! Exceptions on a device that did produce test results don't fail the run by themselves: the
//! test results are the source of truth in that case.
//!
//! A run with no devices at all is considered successful; that case is rejected up front when
//! the run is configured to fail without devices.

use crate::model::{DeviceResult, RunSummary, TestOutcomeStatus};

/// Returns the overall verdict for a sealed run summary.
pub fn compute_success(summary: &RunSummary) -> bool {
    compute_success_for(summary.results().values())
}

/// Returns the overall verdict for a set of device results.
pub fn compute_success_for<'a>(results: impl IntoIterator<Item = &'a DeviceResult>) -> bool {
    results.into_iter().all(device_succeeded)
}

/// Returns true if a single device contributes a successful verdict.
pub fn device_succeeded(result: &DeviceResult) -> bool {
    if result.install_failed() {
        return false;
    }
    if !result.exceptions().is_empty() && result.test_results().is_empty() {
        return false;
    }
    result
        .test_results()
        .values()
        .all(|test| test.status() == TestOutcomeStatus::Pass)
}
