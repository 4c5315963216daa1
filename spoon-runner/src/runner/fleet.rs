// Copyright (c) The spoon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{DeviceRunner, DeviceRunnerState, FleetState};
use crate::{
    config::RunSettings,
    errors::{DisplayErrorChain, FleetInitError, FleetStateError, TransportError},
    helpers::{plural, unique_key},
    model::{DeviceResult, RunSummary, RunSummaryBuilder, TestSelector},
    stopwatch::{StopwatchStart, stopwatch},
    transport::{InstallOptions, TransportProvider},
};
use camino::Utf8Path;
use futures::{StreamExt, future, stream};
use indexmap::IndexMap;
use std::{collections::HashSet, io, sync::Arc};
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

/// The sealed result of a fleet run.
#[derive(Clone, Debug)]
pub struct FleetOutcome {
    /// Per-device results and run metadata.
    pub summary: RunSummary,

    /// The overall verdict. Same as [`RunSummary::success`].
    pub success: bool,
}

/// Owns one [`DeviceRunner`] per device and drives them concurrently.
///
/// The lifecycle is [`init`](Self::init), then [`run_tests`](Self::run_tests) one or more times,
/// then [`finish`](Self::finish).
pub struct FleetCoordinator<P: TransportProvider> {
    provider: P,
    settings: Arc<RunSettings>,
    runtime: Runtime,
    stopwatch: StopwatchStart,
    state: FleetState,
    runners: IndexMap<String, DeviceRunner<P::Transport>>,
}

impl<P: TransportProvider> FleetCoordinator<P> {
    /// Creates a new coordinator.
    pub fn new(provider: P, settings: RunSettings) -> Result<Self, FleetInitError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("spoon-runner-worker")
            .build()
            .map_err(FleetInitError::TokioRuntimeCreate)?;
        Ok(Self {
            provider,
            settings: Arc::new(settings),
            runtime,
            stopwatch: stopwatch(),
            state: FleetState::Created,
            runners: IndexMap::new(),
        })
    }

    /// Returns the current state.
    pub fn state(&self) -> FleetState {
        self.state
    }

    /// Returns the settings for this run.
    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Returns the device runners, in the order their serials were first seen.
    pub fn runners(&self) -> impl ExactSizeIterator<Item = &DeviceRunner<P::Transport>> {
        self.runners.values()
    }

    /// Prepares the output directory, connects to every device and installs the packages under
    /// test on each of them.
    ///
    /// If `serials` is empty, every attached device is used. Duplicate serials are ignored.
    /// Returns the number of devices the packages were installed on. Install failures are
    /// recorded per device and don't fail this call.
    pub fn init(&mut self, serials: Vec<String>) -> Result<usize, FleetInitError> {
        if self.state != FleetState::Created {
            return Err(FleetStateError::new("initialize the fleet", self.state).into());
        }

        check_artifact("application", &self.settings.app_apk)?;
        check_artifact("instrumentation", &self.settings.test_apk)?;

        let serials = if serials.is_empty() {
            self.provider
                .attached_devices()
                .map_err(FleetInitError::DeviceDiscovery)?
        } else {
            serials
        };
        if serials.is_empty() {
            if self.settings.fail_if_no_device {
                return Err(FleetInitError::NoDevices);
            }
            warn!("no devices attached, nothing will be run");
        }

        clean_output_dir(&self.settings.output_dir).map_err(|error| {
            FleetInitError::CleanOutputDir {
                path: self.settings.output_dir.clone(),
                error,
            }
        })?;

        let mut keys = HashSet::new();
        for serial in serials {
            if self.runners.contains_key(&serial) {
                debug!(%serial, "ignoring duplicate device serial");
                continue;
            }
            let key = unique_key(&serial, &mut keys);
            let transport =
                self.provider
                    .connect(&serial)
                    .map_err(|error| FleetInitError::Connect {
                        serial: serial.clone(),
                        error,
                    })?;
            let runner = DeviceRunner::new(serial.clone(), key, transport, self.settings.clone());
            self.runners.insert(serial, runner);
        }

        let device_count = self.runners.len();
        let concurrency = self.settings.concurrency_for(device_count);
        let options = InstallOptions {
            reinstall: true,
            allow_downgrade: self.settings.allow_downgrade,
        };
        info!(
            "installing on {device_count} {}",
            plural::devices_str(device_count)
        );

        let runners = &mut self.runners;
        let installed = self.runtime.block_on(async move {
            stream::iter(runners.values_mut())
                .map(|runner| runner.install(options))
                .buffer_unordered(concurrency)
                .filter(|installed| future::ready(*installed))
                .count()
                .await
        });

        if installed < device_count {
            warn!(
                "packages installed on {installed} of {device_count} {}",
                plural::devices_str(device_count),
            );
        }
        self.state = FleetState::Initialized;
        Ok(installed)
    }

    /// Runs the tests matching `selector` on every device the packages were installed on.
    ///
    /// Devices run concurrently and independently: faults are recorded into each device's
    /// result.
    pub fn run_tests(&mut self, selector: &TestSelector) -> Result<(), FleetStateError> {
        match self.state {
            FleetState::Initialized | FleetState::Ran => {}
            state => return Err(FleetStateError::new("run tests", state)),
        }

        let runnable: Vec<_> = self
            .runners
            .values_mut()
            .filter(|runner| {
                matches!(
                    runner.state(),
                    DeviceRunnerState::Installed | DeviceRunnerState::Running
                )
            })
            .collect();
        let concurrency = self.settings.concurrency_for(runnable.len());
        info!(
            %selector,
            "running tests on {} {}",
            runnable.len(),
            plural::devices_str(runnable.len()),
        );

        self.runtime.block_on(async move {
            stream::iter(runnable)
                .map(|runner| async move {
                    let result = runner.run(selector).await;
                    if let Err(error) = result {
                        warn!(serial = %runner.serial(), "{error}");
                    }
                })
                .buffer_unordered(concurrency)
                .for_each(future::ready)
                .await
        });

        self.state = FleetState::Ran;
        Ok(())
    }

    /// Clears the data of `package` on every installed device.
    ///
    /// Per-device failures are logged. Returns the number of devices it succeeded on.
    pub fn clear_data(&self, package: &str) -> usize {
        self.for_each_installed("clear data", |runner| runner.clear_data(package))
    }

    /// Force-stops `package` on every installed device.
    ///
    /// Per-device failures are logged. Returns the number of devices it succeeded on.
    pub fn force_stop(&self, package: &str) -> usize {
        self.for_each_installed("force stop", |runner| runner.force_stop(package))
    }

    /// Finishes every device and seals the run summary.
    ///
    /// Removes the work directory unless configured to keep it.
    pub fn finish(mut self) -> Result<FleetOutcome, FleetStateError> {
        if self.state != FleetState::Ran {
            return Err(FleetStateError::new("finish the run", self.state));
        }

        let concurrency = self.settings.concurrency_for(self.runners.len());
        let runners = &mut self.runners;
        let results: Vec<(String, DeviceResult)> = self.runtime.block_on(async move {
            stream::iter(runners.values_mut())
                .map(|runner| async move {
                    let result = runner.finish().await;
                    match result {
                        Ok(result) => Some((runner.key().to_owned(), result)),
                        Err(error) => {
                            warn!(serial = %runner.serial(), "{error}");
                            None
                        }
                    }
                })
                .buffer_unordered(concurrency)
                .filter_map(future::ready)
                .collect()
                .await
        });

        let mut builder =
            RunSummaryBuilder::new(self.settings.title.clone(), self.stopwatch.start_time());
        for (key, result) in results {
            if let Err(error) = builder.add_result(key, result) {
                warn!("{error}");
            }
        }
        let summary = builder.build(self.stopwatch.snapshot().end_time());

        let work_dir = self.settings.work_dir();
        if self.settings.keeps_work_dir() {
            debug!(path = %work_dir, "keeping work directory");
        } else {
            match std::fs::remove_dir_all(&work_dir) {
                Ok(()) => {}
                Err(error) if error.kind() == io::ErrorKind::NotFound => {}
                Err(error) => {
                    warn!(path = %work_dir, "unable to remove work directory: {error}");
                }
            }
        }

        self.runtime.shutdown_background();

        info!(
            success = summary.success(),
            "run finished with {} {}",
            summary.results().len(),
            plural::devices_str(summary.results().len()),
        );
        Ok(FleetOutcome {
            success: summary.success(),
            summary,
        })
    }

    fn for_each_installed<'a, F, Fut>(&'a self, operation: &'static str, f: F) -> usize
    where
        F: Fn(&'a DeviceRunner<P::Transport>) -> Fut,
        Fut: Future<Output = Result<(), TransportError>>,
    {
        let installed: Vec<_> = self
            .runners
            .values()
            .filter(|runner| {
                !matches!(
                    runner.state(),
                    DeviceRunnerState::Created
                        | DeviceRunnerState::Installing
                        | DeviceRunnerState::InstallFailed
                )
            })
            .collect();
        let concurrency = self.settings.concurrency_for(installed.len());

        self.runtime.block_on(async {
            stream::iter(installed)
                .map(|runner| {
                    let fut = f(runner);
                    async move {
                        match fut.await {
                            Ok(()) => true,
                            Err(error) => {
                                warn!(
                                    serial = %runner.serial(),
                                    "unable to {operation}: {}",
                                    DisplayErrorChain::new(&error),
                                );
                                false
                            }
                        }
                    }
                })
                .buffer_unordered(concurrency)
                .filter(|ok| future::ready(*ok))
                .count()
                .await
        })
    }
}

fn check_artifact(kind: &'static str, path: &Utf8Path) -> Result<(), FleetInitError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(FleetInitError::MissingArtifact {
            kind,
            path: path.to_owned(),
        })
    }
}

fn clean_output_dir(output_dir: &Utf8Path) -> io::Result<()> {
    match std::fs::remove_dir_all(output_dir) {
        Ok(()) => {}
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => return Err(error),
    }
    std::fs::create_dir_all(output_dir)
}
