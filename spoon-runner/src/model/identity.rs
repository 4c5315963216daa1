// Copyright (c) The spoon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{errors::TestSelectorError, helpers::sanitize_path_component};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a single test case within a device run: a class name and a method name.
///
/// Identities are ordered by class name, then by method name.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestIdentity {
    class_name: String,
    method_name: String,
}

impl TestIdentity {
    /// Creates a new test identity.
    pub fn new(class_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            method_name: method_name.into(),
        }
    }

    /// Returns the fully-qualified class name.
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Returns the method name.
    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    /// Returns this identity with both names made safe to use as single path components.
    ///
    /// Screenshots are staged and written under `<class>/<method>` using these names.
    pub fn to_path_safe(&self) -> Self {
        Self {
            class_name: sanitize_path_component(&self.class_name),
            method_name: sanitize_path_component(&self.method_name),
        }
    }
}

impl fmt::Display for TestIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.class_name, self.method_name)
    }
}

/// Narrows down which tests an instrumentation run executes.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum TestSelector {
    /// Run every test in the instrumentation package.
    #[default]
    All,

    /// Run every test in a single class.
    Class(String),

    /// Run a single test method.
    Method(TestIdentity),
}

impl TestSelector {
    /// Builds a selector out of an optional class name and an optional method name.
    ///
    /// Empty strings are treated as missing. Specifying a method name without a class name is an
    /// error.
    pub fn new(
        class_name: Option<&str>,
        method_name: Option<&str>,
    ) -> Result<Self, TestSelectorError> {
        let class_name = class_name.filter(|s| !s.is_empty());
        let method_name = method_name.filter(|s| !s.is_empty());
        match (class_name, method_name) {
            (None, None) => Ok(Self::All),
            (Some(class_name), None) => Ok(Self::Class(class_name.to_owned())),
            (Some(class_name), Some(method_name)) => {
                Ok(Self::Method(TestIdentity::new(class_name, method_name)))
            }
            (None, Some(method_name)) => Err(TestSelectorError::MethodWithoutClass {
                method_name: method_name.to_owned(),
            }),
        }
    }

    /// Returns the class this selector is restricted to, if any.
    pub fn class_name(&self) -> Option<&str> {
        match self {
            Self::All => None,
            Self::Class(class_name) => Some(class_name),
            Self::Method(identity) => Some(identity.class_name()),
        }
    }

    /// Returns the instrumentation `class` argument for this selector: `class` or
    /// `class#method`.
    pub fn instrumentation_class_arg(&self) -> Option<String> {
        match self {
            Self::All => None,
            Self::Class(class_name) => Some(class_name.clone()),
            Self::Method(identity) => Some(identity.to_string()),
        }
    }
}

impl fmt::Display for TestSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all tests"),
            Self::Class(class_name) => write!(f, "{class_name}"),
            Self::Method(identity) => write!(f, "{identity}"),
        }
    }
}
