// Copyright (c) The spoon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Screenshot discovery, association with test results, and animated GIF synthesis.
//!
//! Screenshots are staged locally in trees laid out as `<root>/<class>/<method>/<file>`. Once a
//! device's event stream has drained, the trees are scanned into [`ScreenshotGroups`] and handed
//! to a [`ScreenshotAssociator`], which copies every screenshot into the device's image directory
//! and attaches it to the matching test result.

mod animation;
mod associator;
mod raw;

pub use associator::*;
pub use raw::*;

use crate::{errors::ScreenshotError, model::TestIdentity};
use camino::{Utf8Path, Utf8PathBuf};
use std::{collections::BTreeMap, io};

/// Screenshots are always PNG: the device-side client writes PNG, and so does local capture.
const SCREENSHOT_EXTENSION: &str = "png";

/// Screenshot files grouped by the test that captured them.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ScreenshotGroups {
    groups: BTreeMap<TestIdentity, Vec<Utf8PathBuf>>,
}

impl ScreenshotGroups {
    /// Creates an empty set of groups.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scans each root in turn, merging the groups found under it.
    ///
    /// Roots that don't exist are skipped. Files that aren't PNG images are ignored. Within each
    /// group, files are sorted into capture order.
    pub fn discover(roots: &[Utf8PathBuf]) -> Result<Self, ScreenshotError> {
        let mut groups = Self::new();
        for root in roots {
            groups.scan_root(root)?;
        }
        groups.sort_capture_order();
        Ok(groups)
    }

    /// Adds a single screenshot to the group for `test`.
    pub fn add(&mut self, test: TestIdentity, path: impl Into<Utf8PathBuf>) {
        self.groups.entry(test).or_default().push(path.into());
    }

    /// Returns the number of groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Returns true if there are no groups.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Returns the screenshots for a test.
    pub fn get(&self, test: &TestIdentity) -> Option<&[Utf8PathBuf]> {
        self.groups.get(test).map(Vec::as_slice)
    }

    /// Iterates over groups in identity order.
    pub fn iter(&self) -> impl Iterator<Item = (&TestIdentity, &[Utf8PathBuf])> {
        self.groups
            .iter()
            .map(|(test, files)| (test, files.as_slice()))
    }

    /// Sorts every group into capture order.
    pub fn sort_capture_order(&mut self) {
        for files in self.groups.values_mut() {
            files.sort_by_cached_key(|path| capture_order_key(path));
        }
    }

    fn scan_root(&mut self, root: &Utf8Path) -> Result<(), ScreenshotError> {
        let Some(classes) = read_dir_if_exists(root)? else {
            return Ok(());
        };
        for (class_name, class_dir) in classes {
            let Some(methods) = read_dir_if_exists(&class_dir)? else {
                continue;
            };
            for (method_name, method_dir) in methods {
                let Some(files) = read_dir_if_exists(&method_dir)? else {
                    continue;
                };
                let test = TestIdentity::new(class_name.clone(), method_name);
                for (_, file) in files {
                    if is_screenshot(&file) {
                        self.add(test.clone(), file);
                    }
                }
            }
        }
        Ok(())
    }
}

impl IntoIterator for ScreenshotGroups {
    type Item = (TestIdentity, Vec<Utf8PathBuf>);
    type IntoIter = std::collections::btree_map::IntoIter<TestIdentity, Vec<Utf8PathBuf>>;

    fn into_iter(self) -> Self::IntoIter {
        self.groups.into_iter()
    }
}

/// Lists the entries of a directory as (file name, path) pairs, in filesystem order.
///
/// Returns `None` if `dir` doesn't exist or isn't a directory.
fn read_dir_if_exists(dir: &Utf8Path) -> Result<Option<Vec<(String, Utf8PathBuf)>>, ScreenshotError> {
    let read_dir_err = |error| ScreenshotError::ReadDir {
        path: dir.to_owned(),
        error,
    };
    let entries = match dir.read_dir_utf8() {
        Ok(entries) => entries,
        Err(error) if matches!(error.kind(), io::ErrorKind::NotFound | io::ErrorKind::NotADirectory) => {
            return Ok(None);
        }
        Err(error) => return Err(read_dir_err(error)),
    };

    let mut out = Vec::new();
    for entry in entries {
        let entry = entry.map_err(read_dir_err)?;
        out.push((entry.file_name().to_owned(), entry.into_path()));
    }
    Ok(Some(out))
}

fn is_screenshot(path: &Utf8Path) -> bool {
    path.is_file()
        && path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(SCREENSHOT_EXTENSION))
}

/// The sort key for capture order: names with a leading numeric sequence sort first, by that
/// sequence; everything then compares lexicographically.
fn capture_order_key(path: &Utf8Path) -> (bool, u128, String) {
    let name = path.file_name().unwrap_or_default();
    let digits: String = name.chars().take_while(char::is_ascii_digit).collect();
    match digits.parse::<u128>() {
        Ok(seq) => (false, seq, name.to_owned()),
        Err(_) => (true, 0, name.to_owned()),
    }
}
