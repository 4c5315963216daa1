// Copyright (c) The spoon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{LogMessage, TestIdentity};
use crate::errors::StatusTransitionError;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

/// The status of a single test.
///
/// A test starts out as `Running` and transitions to exactly one terminal status. Once terminal,
/// the status never changes.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[cfg_attr(test, derive(test_strategy::Arbitrary))]
#[serde(rename_all = "kebab-case")]
pub enum TestOutcomeStatus {
    /// The test has started but hasn't reached a terminal status.
    Running,

    /// The test passed.
    Pass,

    /// The test failed an assertion.
    Fail,

    /// The test threw an unexpected error, or never completed.
    Error,

    /// The test was skipped.
    Ignored,

    /// An assumption made by the test did not hold.
    AssumptionFailure,
}

impl TestOutcomeStatus {
    /// Returns true if this status is terminal.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Returns true if this status counts as a success towards the overall verdict.
    ///
    /// Only `Pass` counts: ignored tests and assumption failures do not.
    pub fn is_success(self) -> bool {
        matches!(self, Self::Pass)
    }

    /// Returns true if results with this status carry a failure trace.
    pub fn has_trace(self) -> bool {
        matches!(self, Self::Fail | Self::Error | Self::AssumptionFailure)
    }
}

impl fmt::Display for TestOutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Error => "error",
            Self::Ignored => "ignored",
            Self::AssumptionFailure => "assumption-failure",
        };
        f.write_str(s)
    }
}

/// The outcome of a single test on a single device.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestResult {
    identity: TestIdentity,
    status: TestOutcomeStatus,
    started_at: Option<DateTime<Local>>,
    ended_at: Option<DateTime<Local>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trace: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    metrics: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    log: Vec<LogMessage>,
    screenshots: Vec<Utf8PathBuf>,
    animated_gif: Option<Utf8PathBuf>,
}

impl TestResult {
    /// Returns the identity of this test.
    pub fn identity(&self) -> &TestIdentity {
        &self.identity
    }

    /// Returns the terminal status of this test.
    pub fn status(&self) -> TestOutcomeStatus {
        self.status
    }

    /// Returns the time the test started, if a start event was seen.
    pub fn started_at(&self) -> Option<DateTime<Local>> {
        self.started_at
    }

    /// Returns the time the test ended, if an end event was seen.
    pub fn ended_at(&self) -> Option<DateTime<Local>> {
        self.ended_at
    }

    /// Returns the failure trace. Present if and only if the status carries one.
    pub fn trace(&self) -> Option<&str> {
        self.trace.as_deref()
    }

    /// Returns the instrumentation metrics reported when the test ended.
    pub fn metrics(&self) -> &BTreeMap<String, String> {
        &self.metrics
    }

    /// Returns the device log messages attributed to this test.
    pub fn log(&self) -> &[LogMessage] {
        &self.log
    }

    /// Returns the screenshots attached to this test, in capture order.
    pub fn screenshots(&self) -> &[Utf8PathBuf] {
        &self.screenshots
    }

    /// Returns the animated GIF synthesized from this test's screenshots, if any.
    pub fn animated_gif(&self) -> Option<&Utf8Path> {
        self.animated_gif.as_deref()
    }
}

/// Accumulates the state of a [`TestResult`] while its device is still running.
#[derive(Clone, Debug)]
pub struct TestResultBuilder {
    identity: TestIdentity,
    status: TestOutcomeStatus,
    started_at: Option<DateTime<Local>>,
    ended_at: Option<DateTime<Local>>,
    trace: Option<String>,
    metrics: BTreeMap<String, String>,
    log: Vec<LogMessage>,
    screenshots: Vec<Utf8PathBuf>,
    animated_gif: Option<Utf8PathBuf>,
}

impl TestResultBuilder {
    /// Creates a builder for a test that started at the given time.
    pub fn started(identity: TestIdentity, at: DateTime<Local>) -> Self {
        Self {
            started_at: Some(at),
            ..Self::placeholder(identity)
        }
    }

    /// Creates a builder for a test whose start was never observed.
    pub fn placeholder(identity: TestIdentity) -> Self {
        Self {
            identity,
            status: TestOutcomeStatus::Running,
            started_at: None,
            ended_at: None,
            trace: None,
            metrics: BTreeMap::new(),
            log: Vec::new(),
            screenshots: Vec::new(),
            animated_gif: None,
        }
    }

    /// Returns the identity of this test.
    pub fn identity(&self) -> &TestIdentity {
        &self.identity
    }

    /// Returns the current status.
    pub fn status(&self) -> TestOutcomeStatus {
        self.status
    }

    /// Moves a running test to a terminal status.
    ///
    /// The trace is kept only for statuses that carry one. Fails if the test is already terminal
    /// or if `status` isn't terminal.
    pub fn transition(
        &mut self,
        status: TestOutcomeStatus,
        trace: Option<String>,
    ) -> Result<(), StatusTransitionError> {
        if self.status.is_terminal() || !status.is_terminal() {
            return Err(StatusTransitionError::new(
                self.identity.clone(),
                self.status,
                status,
            ));
        }
        self.status = status;
        if status.has_trace() {
            self.trace = Some(trace.unwrap_or_default());
        }
        Ok(())
    }

    /// Records the end of the test. A test that's still running is marked as passing.
    pub fn end(&mut self, at: DateTime<Local>, metrics: BTreeMap<String, String>) {
        if self.status == TestOutcomeStatus::Running {
            self.status = TestOutcomeStatus::Pass;
        }
        self.ended_at = Some(at);
        self.metrics.extend(metrics);
    }

    /// Marks a test that never completed as an error with the given trace.
    ///
    /// Has no effect on tests that are already terminal.
    pub fn mark_incomplete(&mut self, trace: impl Into<String>) {
        if self.status == TestOutcomeStatus::Running {
            self.status = TestOutcomeStatus::Error;
            self.trace = Some(trace.into());
        }
    }

    /// Appends device log messages attributed to this test.
    pub fn add_log(&mut self, messages: impl IntoIterator<Item = LogMessage>) {
        self.log.extend(messages);
    }

    /// Appends a screenshot. Screenshots must be added in capture order.
    pub fn add_screenshot(&mut self, path: impl Into<Utf8PathBuf>) {
        self.screenshots.push(path.into());
    }

    /// Returns the screenshots attached so far.
    pub fn screenshots(&self) -> &[Utf8PathBuf] {
        &self.screenshots
    }

    /// Sets the animated GIF synthesized from this test's screenshots.
    pub fn set_animated_gif(&mut self, path: impl Into<Utf8PathBuf>) {
        self.animated_gif = Some(path.into());
    }

    /// Builds the final, immutable result.
    pub fn build(self) -> TestResult {
        TestResult {
            identity: self.identity,
            status: self.status,
            started_at: self.started_at,
            ended_at: self.ended_at,
            trace: self.trace,
            metrics: self.metrics,
            log: self.log,
            screenshots: self.screenshots,
            animated_gif: self.animated_gif,
        }
    }
}
