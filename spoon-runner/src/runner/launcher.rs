// Copyright (c) The spoon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::LauncherParseError;

const MAIN_ACTION: &str = "android.intent.action.MAIN:";

/// Extracts the launcher activity component from `pm dump <package>` output.
///
/// The component is the second word on the line following the `MAIN` action header, for example
/// `com.example/.MainActivity` in:
///
/// ```text
/// android.intent.action.MAIN:
///   43b6bb2 com.example/.MainActivity filter 8b9e4e3
/// ```
pub(crate) fn parse_launcher_component(
    package: &str,
    output: &str,
) -> Result<String, LauncherParseError> {
    let mut lines = output.lines();
    lines
        .find(|line| line.trim() == MAIN_ACTION)
        .and_then(|_| lines.next())
        .and_then(|line| line.split_whitespace().nth(1))
        .map(str::to_owned)
        .ok_or_else(|| LauncherParseError::new(package))
}
