// Copyright (c) The spoon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for spoon: running an instrumentation test suite across a fleet of devices
//! and aggregating the results into a single run summary.
//!
//! The basic flow of operations is:
//!
//! 1. A [`FleetCoordinator`](runner::FleetCoordinator) is created with a
//!    [`TransportProvider`](transport::TransportProvider) and [`RunSettings`](config::RunSettings).
//! 2. [`init`](runner::FleetCoordinator::init) installs the application and instrumentation
//!    packages on every device. Install failures are isolated to the device they happen on.
//! 3. [`run_tests`](runner::FleetCoordinator::run_tests) runs the instrumentation on every device
//!    concurrently. Each device's lifecycle events are reconciled into per-test results by an
//!    [`EventMarshal`](marshal::EventMarshal).
//! 4. [`finish`](runner::FleetCoordinator::finish) collects logs and screenshots, builds
//!    animated GIFs, seals every [`DeviceResult`](model::DeviceResult) and folds them into a
//!    [`RunSummary`](model::RunSummary), whose verdict is computed by
//!    [`compute_success`](aggregator::compute_success).

pub mod aggregator;
pub mod config;
pub mod errors;
pub mod events;
mod helpers;
pub mod marshal;
pub mod model;
pub mod reporter;
pub mod runner;
pub mod screenshots;
mod stopwatch;
pub mod transport;

pub use helpers::sanitize_serial;
