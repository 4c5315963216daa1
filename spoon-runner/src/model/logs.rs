// Copyright (c) The spoon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::TestIdentity;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

/// Device log messages, segmented by the test that was running when they were emitted.
pub type DeviceLogs = BTreeMap<TestIdentity, Vec<LogMessage>>;

/// The priority of a device log message.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogPriority {
    /// Verbose.
    Verbose,
    /// Debug.
    Debug,
    /// Info.
    Info,
    /// Warning.
    Warn,
    /// Error.
    Error,
    /// Assertion failure.
    Assert,
}

impl LogPriority {
    /// Parses the single-letter priority used by device log output.
    pub fn from_letter(letter: char) -> Option<Self> {
        match letter {
            'V' => Some(Self::Verbose),
            'D' => Some(Self::Debug),
            'I' => Some(Self::Info),
            'W' => Some(Self::Warn),
            'E' => Some(Self::Error),
            'A' | 'F' => Some(Self::Assert),
            _ => None,
        }
    }

    /// Returns the single-letter form of this priority.
    pub fn letter(self) -> char {
        match self {
            Self::Verbose => 'V',
            Self::Debug => 'D',
            Self::Info => 'I',
            Self::Warn => 'W',
            Self::Error => 'E',
            Self::Assert => 'A',
        }
    }
}

/// A single device log message.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LogMessage {
    /// The timestamp as printed by the device, e.g. `01-02 03:04:05.678`.
    pub timestamp: String,

    /// The emitting process.
    pub pid: u32,

    /// The emitting thread.
    pub tid: u32,

    /// The priority.
    pub priority: LogPriority,

    /// The log tag.
    pub tag: String,

    /// The message text.
    pub message: String,
}

impl fmt::Display for LogMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:>5} {:>5} {} {}: {}",
            self.timestamp,
            self.pid,
            self.tid,
            self.priority.letter(),
            self.tag,
            self.message
        )
    }
}
