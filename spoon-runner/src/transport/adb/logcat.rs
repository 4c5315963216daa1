// Copyright (c) The spoon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parsing and per-test segmentation of `logcat -v threadtime` output.

use crate::model::{DeviceLogs, LogMessage, LogPriority, TestIdentity};
use std::collections::HashMap;
use tracing::debug;

const TEST_RUNNER_TAG: &str = "TestRunner";

/// Parses a single `threadtime` line:
///
/// ```text
/// 01-02 03:04:05.678  1234  5678 I TestRunner: started: signIn(com.example.LoginTest)
/// ```
pub(crate) fn parse_line(line: &str) -> Option<LogMessage> {
    let mut rest = line.trim_end_matches('\r');
    let mut next_field = || {
        let trimmed = rest.trim_start();
        let end = trimmed.find(char::is_whitespace).unwrap_or(trimmed.len());
        let (field, tail) = trimmed.split_at(end);
        rest = tail;
        (!field.is_empty()).then_some(field)
    };

    let date = next_field()?;
    let time = next_field()?;
    let pid = next_field()?.parse().ok()?;
    let tid = next_field()?.parse().ok()?;
    let priority = next_field()?;
    let mut priority_chars = priority.chars();
    let priority = match (priority_chars.next(), priority_chars.next()) {
        (Some(letter), None) => LogPriority::from_letter(letter)?,
        _ => return None,
    };

    let (tag, message) = rest.trim_start().split_once(": ").or_else(|| {
        // Messages can be empty, in which case the separator loses its trailing space.
        rest.trim_start().strip_suffix(':').map(|tag| (tag, ""))
    })?;

    Some(LogMessage {
        timestamp: format!("{date} {time}"),
        pid,
        tid,
        priority,
        tag: tag.trim_end().to_owned(),
        message: message.to_owned(),
    })
}

/// Parses test runner markers of the form `started: method(class)` and `finished: method(class)`.
fn parse_marker(message: &str) -> Option<(Marker, TestIdentity)> {
    let (marker, rest) = if let Some(rest) = message.strip_prefix("started: ") {
        (Marker::Started, rest)
    } else if let Some(rest) = message.strip_prefix("finished: ") {
        (Marker::Finished, rest)
    } else {
        return None;
    };
    let (method, class) = rest.trim().strip_suffix(')')?.split_once('(')?;
    Some((marker, TestIdentity::new(class, method)))
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Marker {
    Started,
    Finished,
}

/// Splits a device log dump into per-test segments.
///
/// A segment spans from the test runner's `started` marker to its `finished` marker for the same
/// test, and only includes messages from the process that emitted the markers. Everything else
/// is dropped.
pub(crate) fn segment_by_test(output: &str) -> DeviceLogs {
    let mut logs = DeviceLogs::new();
    let mut active: HashMap<u32, TestIdentity> = HashMap::new();
    let mut unparsed = 0usize;

    for line in output.lines() {
        let Some(message) = parse_line(line) else {
            if !line.trim().is_empty() && !line.starts_with("---------") {
                unparsed += 1;
            }
            continue;
        };

        if message.tag == TEST_RUNNER_TAG {
            if let Some((marker, test)) = parse_marker(&message.message) {
                match marker {
                    Marker::Started => {
                        let pid = message.pid;
                        logs.entry(test.clone()).or_default().push(message);
                        active.insert(pid, test);
                    }
                    Marker::Finished => {
                        let pid = message.pid;
                        logs.entry(test.clone()).or_default().push(message);
                        if active.get(&pid) == Some(&test) {
                            active.remove(&pid);
                        }
                    }
                }
                continue;
            }
        }

        if let Some(test) = active.get(&message.pid) {
            logs.entry(test.clone()).or_default().push(message);
        }
    }

    if unparsed > 0 {
        debug!("skipped {unparsed} unparseable log lines");
    }
    logs
}
