// Copyright (c) The spoon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reconciles a device's lifecycle event stream into per-test results.
//!
//! Every test is in one of three entry states: absent (no event seen yet), in flight (tracked by
//! the marshal), or published (handed over to the [`DeviceResultBuilder`]). Each event is applied
//! according to the event kind and the entry state of its test:
//!
//! | event               | absent                          | in flight (running)  | in flight (terminal) | published      |
//! |---------------------|---------------------------------|----------------------|----------------------|----------------|
//! | `started`           | in flight (running)             | duplicate start      | duplicate start      | duplicate start |
//! | `failed`/`assumption` | missing start, then terminal  | terminal             | late event           | late event     |
//! | `ignored`           | in flight (ignored)             | ignored              | late event           | late event     |
//! | `ended`             | missing start, published (pass) | published (pass)     | published            | duplicate end  |
//!
//! Anomalies never abort the device: they are logged and counted.

use crate::{
    events::{LifecycleEvent, TestMetrics},
    model::{DeviceExceptionKind, DeviceResultBuilder, TestIdentity, TestOutcomeStatus, TestResultBuilder},
};
use chrono::Local;
use std::{collections::BTreeMap, fmt};
use tracing::{debug, info, warn};

/// The trace recorded for tests that were still running when the event stream ended.
pub const INCOMPLETE_TRACE: &str = "test did not complete before the instrumentation run ended";

/// A protocol violation observed in a device's event stream.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProtocolAnomaly {
    /// A test was started more than once.
    DuplicateStart {
        /// The test.
        test: TestIdentity,
    },

    /// An event arrived for a test whose start was never reported.
    MissingStart {
        /// The test.
        test: TestIdentity,

        /// The event that arrived.
        event: &'static str,
    },

    /// An event arrived for a test that had already reached a terminal status.
    LateEvent {
        /// The test.
        test: TestIdentity,

        /// The event that arrived.
        event: &'static str,

        /// The status the test already had.
        status: TestOutcomeStatus,
    },

    /// A test was ended more than once.
    DuplicateEnd {
        /// The test.
        test: TestIdentity,
    },
}

impl fmt::Display for ProtocolAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateStart { test } => write!(f, "test {test} was started more than once"),
            Self::MissingStart { test, event } => {
                write!(f, "received {event} for test {test} which was never started")
            }
            Self::LateEvent {
                test,
                event,
                status,
            } => write!(
                f,
                "received {event} for test {test} which already has status {status}"
            ),
            Self::DuplicateEnd { test } => write!(f, "test {test} was ended more than once"),
        }
    }
}

/// What happened as a result of applying an event.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Applied {
    /// A test's in-flight state was created or updated.
    Tracked,

    /// A test ended and its result was published.
    Published(TestIdentity),

    /// A device-level exception was recorded.
    DeviceException,

    /// The event was logged without affecting any result.
    Logged,

    /// The event violated the protocol and was not applied.
    Rejected,
}

/// Converts one device's lifecycle events into test results.
#[derive(Debug)]
pub struct EventMarshal {
    serial: String,
    in_flight: BTreeMap<TestIdentity, TestResultBuilder>,
    anomalies: Vec<ProtocolAnomaly>,
}

impl EventMarshal {
    /// Creates a new marshal for the given device.
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            in_flight: BTreeMap::new(),
            anomalies: Vec::new(),
        }
    }

    /// Returns the anomalies observed so far.
    pub fn anomalies(&self) -> &[ProtocolAnomaly] {
        &self.anomalies
    }

    /// Returns the number of tests that have started but haven't been published.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Applies a single event.
    pub fn apply(&mut self, event: LifecycleEvent, device: &mut DeviceResultBuilder) -> Applied {
        match event {
            LifecycleEvent::RunStarted {
                run_name,
                test_count,
            } => {
                debug!(serial = %self.serial, %run_name, test_count, "instrumentation run started");
                Applied::Logged
            }
            LifecycleEvent::Started { test } => self.on_started(test, device),
            LifecycleEvent::Failed { test, trace } => {
                self.on_terminal(test, TestOutcomeStatus::Fail, Some(trace), "failed", device)
            }
            LifecycleEvent::AssumptionFailed { test, trace } => self.on_terminal(
                test,
                TestOutcomeStatus::AssumptionFailure,
                Some(trace),
                "assumption failure",
                device,
            ),
            LifecycleEvent::Ignored { test } => {
                self.on_terminal(test, TestOutcomeStatus::Ignored, None, "ignored", device)
            }
            LifecycleEvent::Ended { test, metrics } => self.on_ended(test, metrics, device),
            LifecycleEvent::RunFailed { message } => {
                warn!(serial = %self.serial, %message, "instrumentation run failed");
                device.add_exception(DeviceExceptionKind::RunFailed, message);
                Applied::DeviceException
            }
            LifecycleEvent::RunStopped { elapsed } => {
                debug!(serial = %self.serial, ?elapsed, "instrumentation run stopped");
                Applied::Logged
            }
            LifecycleEvent::RunEnded { elapsed } => {
                debug!(serial = %self.serial, ?elapsed, "instrumentation run ended");
                Applied::Logged
            }
        }
    }

    /// Publishes every test that's still in flight.
    ///
    /// Tests that are still running are recorded as errors. Returns the number of tests
    /// published.
    pub fn drain(&mut self, device: &mut DeviceResultBuilder) -> usize {
        let in_flight = std::mem::take(&mut self.in_flight);
        let mut published = 0;
        for (test, mut builder) in in_flight {
            if builder.status() == TestOutcomeStatus::Running {
                warn!(serial = %self.serial, %test, "test never ended, recording it as an error");
                builder.mark_incomplete(INCOMPLETE_TRACE);
            }
            match device.publish(builder) {
                Ok(()) => published += 1,
                Err(error) => {
                    warn!(serial = %self.serial, %error, "discarding unfinished test");
                }
            }
        }
        published
    }

    fn on_started(&mut self, test: TestIdentity, device: &DeviceResultBuilder) -> Applied {
        if self.in_flight.contains_key(&test) || device.contains(&test) {
            self.record(ProtocolAnomaly::DuplicateStart { test });
            return Applied::Rejected;
        }
        debug!(serial = %self.serial, %test, "test started");
        let builder = TestResultBuilder::started(test.clone(), Local::now());
        self.in_flight.insert(test, builder);
        Applied::Tracked
    }

    fn on_terminal(
        &mut self,
        test: TestIdentity,
        status: TestOutcomeStatus,
        trace: Option<String>,
        event: &'static str,
        device: &DeviceResultBuilder,
    ) -> Applied {
        if let Some(published) = device.status_of(&test) {
            self.record(ProtocolAnomaly::LateEvent {
                test,
                event,
                status: published,
            });
            return Applied::Rejected;
        }

        if !self.in_flight.contains_key(&test) {
            // Ignored tests are allowed to skip the start event.
            if status != TestOutcomeStatus::Ignored {
                self.record(ProtocolAnomaly::MissingStart {
                    test: test.clone(),
                    event,
                });
            }
            self.in_flight
                .insert(test.clone(), TestResultBuilder::placeholder(test.clone()));
        }

        let Some(builder) = self.in_flight.get_mut(&test) else {
            return Applied::Rejected;
        };
        match builder.transition(status, trace) {
            Ok(()) => {
                debug!(serial = %self.serial, %test, %status, "test reached terminal status");
                Applied::Tracked
            }
            Err(error) => {
                let current = error.current();
                self.record(ProtocolAnomaly::LateEvent {
                    test,
                    event,
                    status: current,
                });
                Applied::Rejected
            }
        }
    }

    fn on_ended(
        &mut self,
        test: TestIdentity,
        metrics: TestMetrics,
        device: &mut DeviceResultBuilder,
    ) -> Applied {
        if device.contains(&test) {
            self.record(ProtocolAnomaly::DuplicateEnd { test });
            return Applied::Rejected;
        }

        let mut builder = match self.in_flight.remove(&test) {
            Some(builder) => builder,
            None => {
                self.record(ProtocolAnomaly::MissingStart {
                    test: test.clone(),
                    event: "ended",
                });
                TestResultBuilder::placeholder(test.clone())
            }
        };
        builder.end(Local::now(), metrics);
        let status = builder.status();

        match device.publish(builder) {
            Ok(()) => {
                info!(serial = %self.serial, %test, %status, "test finished");
                Applied::Published(test)
            }
            Err(_) => {
                self.record(ProtocolAnomaly::DuplicateEnd { test });
                Applied::Rejected
            }
        }
    }

    fn record(&mut self, anomaly: ProtocolAnomaly) {
        warn!(serial = %self.serial, "{anomaly}");
        self.anomalies.push(anomaly);
    }
}
