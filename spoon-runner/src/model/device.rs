// Copyright (c) The spoon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{TestIdentity, TestResult, TestResultBuilder};
use crate::errors::DuplicateTestResult;
use chrono::{DateTime, Local};
use serde::{Serialize, Serializer};
use std::{collections::BTreeMap, fmt};

/// A snapshot of a device's metadata, captured once when its run starts.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DeviceDetails {
    /// The device model, e.g. `Pixel 7`.
    pub model: Option<String>,

    /// The device manufacturer.
    pub manufacturer: Option<String>,

    /// The OS version string, e.g. `14`.
    pub version: Option<String>,

    /// The OS API level.
    pub api_level: Option<u32>,

    /// The configured language.
    pub language: Option<String>,

    /// The configured region.
    pub region: Option<String>,

    /// Whether the device is an emulator.
    pub is_emulator: bool,

    /// The emulator's virtual device name, if any.
    pub avd_name: Option<String>,
}

impl DeviceDetails {
    /// Builds device details out of the device's system properties.
    pub fn from_properties(serial: &str, properties: &BTreeMap<String, String>) -> Self {
        let get = |key: &str| {
            properties
                .get(key)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
                .map(str::to_owned)
        };
        let first = |keys: &[&str]| keys.iter().find_map(|key| get(*key));

        let is_emulator =
            serial.starts_with("emulator-") || get("ro.kernel.qemu").as_deref() == Some("1");
        let avd_name = if is_emulator {
            first(&["ro.boot.qemu.avd_name", "ro.kernel.qemu.avd_name"])
        } else {
            None
        };

        Self {
            model: get("ro.product.model"),
            manufacturer: get("ro.product.manufacturer"),
            version: get("ro.build.version.release"),
            api_level: get("ro.build.version.sdk").and_then(|level| level.parse().ok()),
            language: first(&["persist.sys.language", "ro.product.locale.language"]),
            region: first(&["persist.sys.country", "ro.product.locale.region"]),
            is_emulator,
            avd_name,
        }
    }
}

/// The kind of a device-level exception.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceExceptionKind {
    /// The instrumentation reported that the run failed.
    RunFailed,

    /// Talking to the device failed while tests were running.
    Transport,

    /// The device went silent for longer than the configured maximum.
    Timeout,

    /// Collecting logs or screenshots from the device failed.
    Collect,
}

impl fmt::Display for DeviceExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RunFailed => "run failed",
            Self::Transport => "transport error",
            Self::Timeout => "timeout",
            Self::Collect => "collection error",
        };
        f.write_str(s)
    }
}

/// A device-level problem that isn't attributable to a single test.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DeviceException {
    /// The kind of exception.
    pub kind: DeviceExceptionKind,

    /// A human-readable description.
    pub message: String,
}

impl fmt::Display for DeviceException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Details about a failed installation.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct InstallFailure {
    /// Why the installation failed.
    pub reason: String,
}

/// The sealed outcome of a run on a single device.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DeviceResult {
    serial: String,
    details: Option<DeviceDetails>,
    install_failure: Option<InstallFailure>,
    exceptions: Vec<DeviceException>,
    #[serde(serialize_with = "serialize_test_results")]
    test_results: BTreeMap<TestIdentity, TestResult>,
    started_at: Option<DateTime<Local>>,
    ended_at: Option<DateTime<Local>>,
}

impl DeviceResult {
    /// Returns the serial of the device.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Returns the device metadata, if it was captured.
    pub fn details(&self) -> Option<&DeviceDetails> {
        self.details.as_ref()
    }

    /// Returns true if installing packages on this device failed.
    pub fn install_failed(&self) -> bool {
        self.install_failure.is_some()
    }

    /// Returns details about the install failure, if any.
    pub fn install_failure(&self) -> Option<&InstallFailure> {
        self.install_failure.as_ref()
    }

    /// Returns device-level exceptions, in the order they were recorded.
    pub fn exceptions(&self) -> &[DeviceException] {
        &self.exceptions
    }

    /// Returns the test results, ordered by identity.
    pub fn test_results(&self) -> &BTreeMap<TestIdentity, TestResult> {
        &self.test_results
    }

    /// Returns the time tests started running on this device.
    pub fn started_at(&self) -> Option<DateTime<Local>> {
        self.started_at
    }

    /// Returns the time tests finished running on this device.
    pub fn ended_at(&self) -> Option<DateTime<Local>> {
        self.ended_at
    }
}

fn serialize_test_results<S: Serializer>(
    results: &BTreeMap<TestIdentity, TestResult>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    // JSON object keys must be strings: emit the results as a list, each carrying its identity.
    serializer.collect_seq(results.values())
}

/// Accumulates a [`DeviceResult`] while the device is being exercised.
///
/// The builder is append-only: test results can be published once per identity, and exceptions
/// are only ever added.
#[derive(Debug)]
pub struct DeviceResultBuilder {
    serial: String,
    details: Option<DeviceDetails>,
    install_failure: Option<InstallFailure>,
    exceptions: Vec<DeviceException>,
    tests: BTreeMap<TestIdentity, TestResultBuilder>,
    started_at: Option<DateTime<Local>>,
    ended_at: Option<DateTime<Local>>,
}

impl DeviceResultBuilder {
    /// Creates a new builder for the given device.
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            details: None,
            install_failure: None,
            exceptions: Vec::new(),
            tests: BTreeMap::new(),
            started_at: None,
            ended_at: None,
        }
    }

    /// Returns the serial of the device.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Records that installation failed. Any test results are discarded.
    pub fn mark_install_failed(&mut self, reason: impl Into<String>) {
        self.install_failure = Some(InstallFailure {
            reason: reason.into(),
        });
        self.tests.clear();
    }

    /// Returns true if installation failed.
    pub fn install_failed(&self) -> bool {
        self.install_failure.is_some()
    }

    /// Sets device metadata. Only the first snapshot is kept; returns false if one was already
    /// present.
    pub fn set_details(&mut self, details: DeviceDetails) -> bool {
        if self.details.is_some() {
            return false;
        }
        self.details = Some(details);
        true
    }

    /// Returns true if device metadata has been captured.
    pub fn has_details(&self) -> bool {
        self.details.is_some()
    }

    /// Records the start of the test run. Only the first call has an effect.
    pub fn start_tests(&mut self, at: DateTime<Local>) {
        self.started_at.get_or_insert(at);
    }

    /// Records the end of the test run. Later calls overwrite earlier ones.
    pub fn end_tests(&mut self, at: DateTime<Local>) {
        self.ended_at = Some(at);
    }

    /// Appends a device-level exception.
    pub fn add_exception(&mut self, kind: super::DeviceExceptionKind, message: impl Into<String>) {
        self.exceptions.push(DeviceException {
            kind,
            message: message.into(),
        });
    }

    /// Returns the exceptions recorded so far.
    pub fn exceptions(&self) -> &[DeviceException] {
        &self.exceptions
    }

    /// Publishes a test result.
    ///
    /// Fails without modifying the builder if a result for the same identity was already
    /// published, or if installation failed.
    pub fn publish(&mut self, test: TestResultBuilder) -> Result<(), DuplicateTestResult> {
        if self.install_failure.is_some() || self.tests.contains_key(test.identity()) {
            return Err(DuplicateTestResult::new(test.identity().clone()));
        }
        self.tests.insert(test.identity().clone(), test);
        Ok(())
    }

    /// Returns true if a result for the identity was published.
    pub fn contains(&self, identity: &TestIdentity) -> bool {
        self.tests.contains_key(identity)
    }

    /// Returns the status of a published test.
    pub fn status_of(&self, identity: &TestIdentity) -> Option<super::TestOutcomeStatus> {
        self.tests.get(identity).map(|test| test.status())
    }

    /// Returns mutable access to a published test, for attaching logs and screenshots.
    pub fn test_mut(&mut self, identity: &TestIdentity) -> Option<&mut TestResultBuilder> {
        self.tests.get_mut(identity)
    }

    /// Iterates over the identities of published tests, in order.
    pub fn identities(&self) -> impl Iterator<Item = &TestIdentity> {
        self.tests.keys()
    }

    /// Returns the number of published tests.
    pub fn test_count(&self) -> usize {
        self.tests.len()
    }

    /// Seals the result.
    ///
    /// Any test still running at this point is recorded as an error.
    pub fn build(self) -> DeviceResult {
        let test_results = self
            .tests
            .into_iter()
            .map(|(identity, mut test)| {
                test.mark_incomplete("test did not complete before results were sealed");
                (identity, test.build())
            })
            .collect();

        DeviceResult {
            serial: self.serial,
            details: self.details,
            install_failure: self.install_failure,
            exceptions: self.exceptions,
            test_results,
            started_at: self.started_at,
            ended_at: self.ended_at,
        }
    }
}
