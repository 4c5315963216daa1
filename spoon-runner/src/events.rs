// Copyright (c) The spoon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test lifecycle events streamed by a device while an instrumentation run is in progress.
//!
//! Events are produced by a [`DeviceTransport`](crate::transport::DeviceTransport) and consumed,
//! in order, by the device's [`EventMarshal`](crate::marshal::EventMarshal). No ordering is
//! guaranteed between them: a device may report a failure for a test it never reported as
//! started, or end a test twice.

use crate::model::TestIdentity;
use std::{collections::BTreeMap, time::Duration};

/// Metrics reported by the instrumentation when a test ends.
pub type TestMetrics = BTreeMap<String, String>;

/// A single lifecycle event reported by a device.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LifecycleEvent {
    /// The instrumentation run started.
    RunStarted {
        /// The name of the run.
        run_name: String,

        /// The number of tests the device expects to run.
        test_count: usize,
    },

    /// A test started.
    Started {
        /// The test.
        test: TestIdentity,
    },

    /// A test failed.
    Failed {
        /// The test.
        test: TestIdentity,

        /// The failure trace.
        trace: String,
    },

    /// An assumption made by a test did not hold.
    AssumptionFailed {
        /// The test.
        test: TestIdentity,

        /// The failure trace.
        trace: String,
    },

    /// A test was skipped.
    Ignored {
        /// The test.
        test: TestIdentity,
    },

    /// A test ended.
    Ended {
        /// The test.
        test: TestIdentity,

        /// Metrics reported alongside the end event.
        metrics: TestMetrics,
    },

    /// The instrumentation run failed as a whole.
    RunFailed {
        /// The reason reported by the device.
        message: String,
    },

    /// The instrumentation run was stopped before completing.
    RunStopped {
        /// Time elapsed before the stop.
        elapsed: Duration,
    },

    /// The instrumentation run ended.
    RunEnded {
        /// Time elapsed over the run.
        elapsed: Duration,
    },
}

impl LifecycleEvent {
    /// Returns the test this event pertains to, if it's a per-test event.
    pub fn test(&self) -> Option<&TestIdentity> {
        match self {
            Self::Started { test }
            | Self::Failed { test, .. }
            | Self::AssumptionFailed { test, .. }
            | Self::Ignored { test }
            | Self::Ended { test, .. } => Some(test),
            Self::RunStarted { .. }
            | Self::RunFailed { .. }
            | Self::RunStopped { .. }
            | Self::RunEnded { .. } => None,
        }
    }
}
