// Copyright (c) The spoon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parser for the raw output of `am instrument -r -w`.
//!
//! The instrumentation reports a sequence of status bundles. Each bundle is a set of
//! `INSTRUMENTATION_STATUS: key=value` lines (values may span several lines) terminated by an
//! `INSTRUMENTATION_STATUS_CODE: <code>` line. The run ends with an `INSTRUMENTATION_RESULT`
//! bundle terminated by `INSTRUMENTATION_CODE: <code>`.

use crate::{
    events::{LifecycleEvent, TestMetrics},
    model::TestIdentity,
};
use std::{collections::BTreeMap, time::Duration};

const STATUS_PREFIX: &str = "INSTRUMENTATION_STATUS: ";
const STATUS_CODE_PREFIX: &str = "INSTRUMENTATION_STATUS_CODE: ";
const RESULT_PREFIX: &str = "INSTRUMENTATION_RESULT: ";
const CODE_PREFIX: &str = "INSTRUMENTATION_CODE: ";
const FAILED_PREFIX: &str = "INSTRUMENTATION_FAILED: ";
const ABORTED_PREFIX: &str = "INSTRUMENTATION_ABORTED: ";

/// Bundle keys that are part of the protocol rather than test metrics.
const KNOWN_KEYS: &[&str] = &["class", "test", "stack", "stream", "current", "numtests", "id"];

mod status_code {
    pub(super) const START: i32 = 1;
    pub(super) const IN_PROGRESS: i32 = 2;
    pub(super) const OK: i32 = 0;
    pub(super) const ERROR: i32 = -1;
    pub(super) const FAILURE: i32 = -2;
    pub(super) const IGNORED: i32 = -3;
    pub(super) const ASSUMPTION_FAILURE: i32 = -4;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Section {
    Status,
    Result,
}

/// Incrementally converts instrumentation output lines into lifecycle events.
#[derive(Debug, Default)]
pub(crate) struct InstrumentationParser {
    current_key: Option<(Section, String)>,
    status: BTreeMap<String, String>,
    result: BTreeMap<String, String>,
    run_name: Option<String>,
    expected_tests: Option<usize>,
    completed_tests: usize,
    in_progress: Option<TestIdentity>,
    run_failure: Option<String>,
    saw_result_code: bool,
}

impl InstrumentationParser {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Feeds a single line of output, returning any events it completes.
    pub(crate) fn feed_line(&mut self, line: &str) -> Vec<LifecycleEvent> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let mut events = Vec::new();

        if let Some(rest) = line.strip_prefix(STATUS_PREFIX) {
            self.start_value(Section::Status, rest);
        } else if let Some(rest) = line.strip_prefix(STATUS_CODE_PREFIX) {
            self.current_key = None;
            if let Ok(code) = rest.trim().parse::<i32>() {
                self.handle_status(code, &mut events);
            }
            self.status.clear();
        } else if let Some(rest) = line.strip_prefix(RESULT_PREFIX) {
            self.start_value(Section::Result, rest);
        } else if line.starts_with(CODE_PREFIX) {
            self.current_key = None;
            self.saw_result_code = true;
        } else if let Some(rest) = line
            .strip_prefix(FAILED_PREFIX)
            .or_else(|| line.strip_prefix(ABORTED_PREFIX))
        {
            self.current_key = None;
            self.run_failure
                .get_or_insert_with(|| format!("instrumentation failed: {}", rest.trim()));
        } else if let Some((section, key)) = &self.current_key {
            let bundle = match section {
                Section::Status => &mut self.status,
                Section::Result => &mut self.result,
            };
            if let Some(value) = bundle.get_mut(key) {
                value.push('\n');
                value.push_str(line);
            }
        }

        events
    }

    /// Signals the end of output, returning the trailing events.
    pub(crate) fn finish(mut self) -> Vec<LifecycleEvent> {
        let mut events = Vec::new();

        let short_msg = self
            .result
            .get("shortMsg")
            .map(|msg| msg.trim().to_owned())
            .filter(|msg| !msg.is_empty());
        let failure = self
            .run_failure
            .take()
            .or(short_msg)
            .or_else(|| {
                (!self.saw_result_code).then(|| "test run failed to complete".to_owned())
            })
            .or_else(|| match self.expected_tests {
                Some(expected) if expected > self.completed_tests => Some(format!(
                    "test run failed to complete: expected {expected} tests, received {}",
                    self.completed_tests
                )),
                _ => None,
            });

        if let Some(test) = self.in_progress.take() {
            let reason = failure.as_deref().unwrap_or("test run failed to complete");
            events.push(LifecycleEvent::Failed {
                test: test.clone(),
                trace: format!("test failed to run to completion: {reason}"),
            });
            events.push(LifecycleEvent::Ended {
                test,
                metrics: TestMetrics::new(),
            });
        }
        if let Some(message) = failure {
            events.push(LifecycleEvent::RunFailed { message });
        }
        events.push(LifecycleEvent::RunEnded {
            elapsed: self.elapsed(),
        });
        events
    }

    fn start_value(&mut self, section: Section, rest: &str) {
        let (key, value) = rest.split_once('=').unwrap_or((rest, ""));
        let bundle = match section {
            Section::Status => &mut self.status,
            Section::Result => &mut self.result,
        };
        bundle.insert(key.to_owned(), value.to_owned());
        self.current_key = Some((section, key.to_owned()));
    }

    fn handle_status(&mut self, code: i32, events: &mut Vec<LifecycleEvent>) {
        if self.run_name.is_none() {
            if let Some(test_count) = self
                .status
                .get("numtests")
                .and_then(|count| count.trim().parse().ok())
            {
                let run_name = self.status.get("id").cloned().unwrap_or_default();
                self.expected_tests = Some(test_count);
                self.run_name = Some(run_name.clone());
                events.push(LifecycleEvent::RunStarted {
                    run_name,
                    test_count,
                });
            }
        }

        let (Some(class_name), Some(method_name)) = (self.status.get("class"), self.status.get("test"))
        else {
            if let Some(error) = self.status.get("Error") {
                self.run_failure.get_or_insert_with(|| error.trim().to_owned());
            }
            return;
        };
        let test = TestIdentity::new(class_name.trim(), method_name.trim());
        let trace = || self.status.get("stack").cloned().unwrap_or_default();

        match code {
            status_code::START => {
                self.in_progress = Some(test.clone());
                events.push(LifecycleEvent::Started { test });
                return;
            }
            status_code::IN_PROGRESS => return,
            status_code::OK => {}
            status_code::ERROR | status_code::FAILURE => {
                events.push(LifecycleEvent::Failed {
                    test: test.clone(),
                    trace: trace(),
                });
            }
            status_code::IGNORED => {
                events.push(LifecycleEvent::Ignored { test: test.clone() });
            }
            status_code::ASSUMPTION_FAILURE => {
                events.push(LifecycleEvent::AssumptionFailed {
                    test: test.clone(),
                    trace: trace(),
                });
            }
            _ => return,
        }

        let metrics: TestMetrics = self
            .status
            .iter()
            .filter(|(key, _)| !KNOWN_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        self.in_progress = None;
        self.completed_tests += 1;
        events.push(LifecycleEvent::Ended { test, metrics });
    }

    fn elapsed(&self) -> Duration {
        self.result
            .get("stream")
            .into_iter()
            .flat_map(|stream| stream.lines())
            .find_map(|line| line.trim().strip_prefix("Time: "))
            .and_then(|secs| secs.replace(',', "").trim().parse::<f64>().ok())
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or_default()
    }
}
