// Copyright (c) The spoon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Code to generate JUnit XML reports from device results.

use crate::{
    errors::WriteReportError,
    model::{DeviceResult, TestOutcomeStatus, TestResult},
};
use camino::Utf8Path;
use chrono::{DateTime, Local};
use quick_junit::{NonSuccessKind, Property, Report, TestCase, TestCaseStatus, TestSuite};
use std::{fs::File, time::Duration};
use swrite::{SWrite, swriteln};

/// Writes the JUnit report for a single device to `path`, creating parent directories as
/// needed.
pub fn write_junit(result: &DeviceResult, path: &Utf8Path) -> Result<(), WriteReportError> {
    let report = junit_report(result);

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|error| WriteReportError::Fs {
            file: dir.to_owned(),
            error,
        })?;
    }
    let f = File::create(path).map_err(|error| WriteReportError::Fs {
        file: path.to_owned(),
        error,
    })?;
    report
        .serialize(f)
        .map_err(|error| WriteReportError::Junit {
            file: path.to_owned(),
            error,
        })
}

/// Builds the JUnit report for a single device.
///
/// The report has one suite, named after the device serial, with one test case per test.
pub fn junit_report(result: &DeviceResult) -> Report {
    let mut suite = TestSuite::new(result.serial());
    if let Some(started_at) = result.started_at() {
        suite.set_timestamp(started_at);
    }
    if let Some(time) = elapsed(result.started_at(), result.ended_at()) {
        suite.set_time(time);
    }

    if let Some(details) = result.details() {
        let properties = [
            ("model", &details.model),
            ("manufacturer", &details.manufacturer),
            ("version", &details.version),
            ("language", &details.language),
            ("region", &details.region),
            ("avd-name", &details.avd_name),
        ];
        for (name, value) in properties {
            if let Some(value) = value {
                suite.add_property((name, value.as_str()));
            }
        }
        if let Some(api_level) = details.api_level {
            suite.add_property(Property::new("api-level", api_level.to_string()));
        }
        suite.add_property(Property::new("emulator", details.is_emulator.to_string()));
    }
    if let Some(failure) = result.install_failure() {
        suite.add_property(("install-failure", failure.reason.as_str()));
    }

    if !result.exceptions().is_empty() {
        let mut system_err = String::new();
        for exception in result.exceptions() {
            swriteln!(system_err, "{exception}");
        }
        suite.set_system_err(system_err);
    }

    suite.add_test_cases(result.test_results().values().map(test_case));

    let mut report = Report::new("spoon");
    if let Some(started_at) = result.started_at() {
        report.set_timestamp(started_at);
    }
    if let Some(time) = elapsed(result.started_at(), result.ended_at()) {
        report.set_time(time);
    }
    report.add_test_suite(suite);
    report
}

fn test_case(test: &TestResult) -> TestCase {
    let identity = test.identity();
    let mut status = match test.status() {
        TestOutcomeStatus::Pass => TestCaseStatus::success(),
        TestOutcomeStatus::Fail => TestCaseStatus::non_success(NonSuccessKind::Failure),
        // Running never survives sealing; report it the same as an error if it ever does.
        TestOutcomeStatus::Error | TestOutcomeStatus::Running => {
            TestCaseStatus::non_success(NonSuccessKind::Error)
        }
        TestOutcomeStatus::Ignored | TestOutcomeStatus::AssumptionFailure => {
            TestCaseStatus::skipped()
        }
    };
    if let Some(trace) = test.trace() {
        if let Some(first_line) = trace.lines().next() {
            status.set_message(first_line);
        }
        status.set_description(trace);
    }
    if test.status() == TestOutcomeStatus::AssumptionFailure {
        status.set_type("assumption failure");
    }

    let mut testcase = TestCase::new(identity.method_name(), status);
    testcase.set_classname(identity.class_name());
    if let Some(started_at) = test.started_at() {
        testcase.set_timestamp(started_at);
    }
    if let Some(time) = elapsed(test.started_at(), test.ended_at()) {
        testcase.set_time(time);
    }
    if !test.log().is_empty() {
        let mut system_out = String::new();
        for message in test.log() {
            swriteln!(system_out, "{message}");
        }
        testcase.set_system_out(system_out);
    }
    testcase
}

fn elapsed(start: Option<DateTime<Local>>, end: Option<DateTime<Local>>) -> Option<Duration> {
    let (start, end) = (start?, end?);
    (end - start).to_std().ok()
}
