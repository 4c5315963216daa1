// Copyright (c) The spoon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! General support code for spoon-runner.

use std::collections::HashSet;
use tracing::warn;

/// Utilities for pluralizing various words based on count.
pub(crate) mod plural {
    /// Returns "test" if `count` is 1, otherwise "tests".
    pub(crate) fn tests_str(count: usize) -> &'static str {
        if count == 1 { "test" } else { "tests" }
    }

    /// Returns "device" if `count` is 1, otherwise "devices".
    pub(crate) fn devices_str(count: usize) -> &'static str {
        if count == 1 { "device" } else { "devices" }
    }

    /// Returns "screenshot" if `count` is 1, otherwise "screenshots".
    pub(crate) fn screenshots_str(count: usize) -> &'static str {
        if count == 1 {
            "screenshot"
        } else {
            "screenshots"
        }
    }
}

/// Turns a device serial into a string that's safe to use as a file name and as a summary key.
///
/// Every character outside `[A-Za-z0-9_-]` is replaced with an underscore, so network serials
/// like `192.168.1.5:5555` become `192_168_1_5_5555`.
pub fn sanitize_serial(serial: &str) -> String {
    serial
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Turns a test class or method name into a single path component.
///
/// Separators and control characters become underscores. A name made up only of dots, or an
/// empty name, has every character replaced so it can't refer to a parent or current directory.
pub(crate) fn sanitize_path_component(name: &str) -> String {
    if name.chars().all(|c| c == '.') {
        return "_".repeat(name.len().max(1));
    }
    name.chars()
        .map(|c| {
            if c == '/' || c == '\\' || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect()
}

/// Returns the sanitized form of `serial`, suffixed if needed so that it isn't already in
/// `taken`. The returned key is added to `taken`.
pub(crate) fn unique_key(serial: &str, taken: &mut HashSet<String>) -> String {
    let base = sanitize_serial(serial);
    let mut key = base.clone();
    let mut suffix = 2;
    while !taken.insert(key.clone()) {
        key = format!("{base}-{suffix}");
        suffix += 1;
    }
    if key != base {
        warn!(%serial, %key, "sanitized serial collides with another device, using a suffixed key");
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("emulator-5554", "emulator-5554"; "already safe")]
    #[test_case("192.168.1.5:5555", "192_168_1_5_5555"; "network serial")]
    #[test_case("a b/c", "a_b_c"; "spaces and slashes")]
    #[test_case("", ""; "empty")]
    fn sanitize(input: &str, expected: &str) {
        assert_eq!(sanitize_serial(input), expected);
    }

    #[test_case("com.example.LoginTest", "com.example.LoginTest"; "class names keep their dots")]
    #[test_case("signIn[user=a/b]", "signIn[user=a_b]"; "parameterized with a slash")]
    #[test_case("back\\slash", "back_slash"; "backslash")]
    #[test_case("..", "__"; "parent directory")]
    #[test_case(".", "_"; "current directory")]
    #[test_case("", "_"; "empty")]
    #[test_case("tab\there", "tab_here"; "control character")]
    fn sanitize_component(input: &str, expected: &str) {
        assert_eq!(sanitize_path_component(input), expected);
    }

    #[test]
    fn colliding_keys_are_suffixed() {
        let mut taken = HashSet::new();
        assert_eq!(unique_key("10.0.0.1:5555", &mut taken), "10_0_0_1_5555");
        assert_eq!(unique_key("10.0.0.1_5555", &mut taken), "10_0_0_1_5555-2");
        assert_eq!(unique_key("10_0_0_1:5555", &mut taken), "10_0_0_1_5555-3");
        assert_eq!(unique_key("emulator-5554", &mut taken), "emulator-5554");
    }
}
