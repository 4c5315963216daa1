// Copyright (c) The spoon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{DeviceRunnerState, RunStatus, launcher::parse_launcher_component};
use crate::{
    config::RunSettings,
    errors::{
        DeviceStateError, DisplayErrorChain, InstallError, LauncherError, ScreenshotError,
        TransportError,
    },
    helpers::plural,
    marshal::{Applied, EventMarshal},
    model::{
        DeviceExceptionKind, DeviceResult, DeviceResultBuilder, TestIdentity, TestSelector,
    },
    reporter::write_junit,
    screenshots::{RawImage, ScreenshotAssociator, ScreenshotGroups},
    stopwatch::stopwatch,
    transport::{DeviceTransport, InstallOptions, InstrumentationRequest, PullOutcome},
};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Local;
use std::{fs, sync::Arc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Drives the install, run and collect phases for a single device.
///
/// Every failure is scoped to this device: install failures and transport faults are recorded
/// into the device's result and never propagate to the caller.
#[derive(Debug)]
pub struct DeviceRunner<T> {
    serial: String,
    key: String,
    transport: T,
    settings: Arc<RunSettings>,
    state: DeviceRunnerState,
    builder: DeviceResultBuilder,
    sealed: Option<DeviceResult>,
    marshal: EventMarshal,
    associator: ScreenshotAssociator,
    log_capture_started: bool,
}

impl<T: DeviceTransport> DeviceRunner<T> {
    /// Creates a new runner.
    ///
    /// `key` names this device's entries in the output directory and the run summary.
    pub fn new(
        serial: impl Into<String>,
        key: impl Into<String>,
        transport: T,
        settings: Arc<RunSettings>,
    ) -> Self {
        let serial = serial.into();
        let key = key.into();
        let associator =
            ScreenshotAssociator::new(serial.clone(), settings.image_dir(&key), settings.gif);
        Self {
            builder: DeviceResultBuilder::new(serial.clone()),
            marshal: EventMarshal::new(serial.clone()),
            serial,
            key,
            transport,
            settings,
            state: DeviceRunnerState::Created,
            sealed: None,
            associator,
            log_capture_started: false,
        }
    }

    /// Returns the device serial.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Returns the key this device's output is written under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the current state.
    pub fn state(&self) -> DeviceRunnerState {
        self.state
    }

    /// Returns the transport for this device.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Installs the application package, then the instrumentation package.
    ///
    /// Returns true if both were installed. On failure, the reason is recorded into the device
    /// result and the runner moves to [`DeviceRunnerState::InstallFailed`].
    pub async fn install(&mut self, options: InstallOptions) -> bool {
        if self.state != DeviceRunnerState::Created {
            debug!(serial = %self.serial, state = %self.state, "install already attempted");
            return !matches!(self.state, DeviceRunnerState::InstallFailed);
        }
        self.state = DeviceRunnerState::Installing;

        let app_apk = self.settings.app_apk.clone();
        debug!(serial = %self.serial, apk = %app_apk, "installing application");
        if let Err(error) = self.transport.install_package(&app_apk, options).await {
            self.install_failed(&error, "Unable to install application APK.");
            return false;
        }

        // The downgrade flag only applies to the application.
        let test_options = InstallOptions {
            allow_downgrade: false,
            ..options
        };
        let test_apk = self.settings.test_apk.clone();
        debug!(serial = %self.serial, apk = %test_apk, "installing instrumentation");
        if let Err(error) = self.transport.install_package(&test_apk, test_options).await {
            self.install_failed(&error, "Unable to install instrumentation APK.");
            return false;
        }

        self.state = DeviceRunnerState::Installed;
        true
    }

    /// Runs the instrumentation tests matching `selector`, recording their results.
    ///
    /// May be called more than once. Transport faults and timeouts are recorded as device
    /// exceptions rather than returned.
    pub async fn run(&mut self, selector: &TestSelector) -> Result<RunStatus, DeviceStateError> {
        match self.state {
            DeviceRunnerState::Installed | DeviceRunnerState::Running => {}
            state => return Err(DeviceStateError::new(&self.serial, "run tests", state)),
        }
        self.state = DeviceRunnerState::Running;

        let stopwatch = stopwatch();
        self.builder.start_tests(stopwatch.start_time());
        self.capture_details().await;
        self.start_log_capture().await;

        let request = InstrumentationRequest {
            instrumentation_package: self.settings.instrumentation_package.clone(),
            test_runner: self.settings.test_runner.clone(),
            selector: selector.clone(),
            test_size: self.settings.test_size,
        };
        info!(serial = %self.serial, %selector, "running instrumentation");

        let captured_dir = self.captured_dir();
        let max_silence = self.settings.max_silence;
        let Self {
            serial,
            transport,
            builder,
            marshal,
            ..
        } = self;

        let (sender, mut receiver) = mpsc::unbounded_channel();
        let producer = transport.run_instrumentation(&request, sender);
        tokio::pin!(producer);

        let mut producer_result = None;
        let mut timed_out = false;
        loop {
            tokio::select! {
                result = &mut producer, if producer_result.is_none() => {
                    producer_result = Some(result);
                }
                next = tokio::time::timeout(max_silence, receiver.recv()) => {
                    match next {
                        Ok(Some(event)) => {
                            if let Applied::Published(test) = marshal.apply(event, builder) {
                                capture_screenshot(serial, transport, &captured_dir, &test).await;
                            }
                        }
                        // All senders are gone: the instrumentation has finished.
                        Ok(None) => break,
                        Err(_) => {
                            timed_out = true;
                            break;
                        }
                    }
                }
            }
        }

        // The sender may be dropped before the producer returns.
        if producer_result.is_none() && !timed_out {
            match tokio::time::timeout(max_silence, &mut producer).await {
                Ok(result) => producer_result = Some(result),
                Err(_) => timed_out = true,
            }
        }

        let status = if timed_out {
            warn!(
                serial = %serial,
                "no test events received for {}, abandoning the run",
                humantime::format_duration(max_silence),
            );
            builder.add_exception(
                DeviceExceptionKind::Timeout,
                format!(
                    "no test events received for {}",
                    humantime::format_duration(max_silence)
                ),
            );
            RunStatus::TimedOut
        } else if let Some(Err(error)) = producer_result {
            let message = DisplayErrorChain::new(&error).to_string();
            warn!(serial = %serial, "instrumentation failed: {message}");
            builder.add_exception(DeviceExceptionKind::Transport, message);
            RunStatus::TransportFailed
        } else {
            RunStatus::Completed
        };

        let drained = marshal.drain(builder);
        if drained > 0 {
            debug!(serial = %serial, drained, "published tests that were still in flight");
        }
        if !marshal.anomalies().is_empty() {
            debug!(
                serial = %serial,
                anomalies = marshal.anomalies().len(),
                "event stream contained protocol anomalies",
            );
        }

        let snapshot = stopwatch.snapshot();
        info!(
            serial = %serial,
            ?status,
            "run finished in {:.3}s with {} {} recorded",
            snapshot.duration.as_secs_f64(),
            builder.test_count(),
            plural::tests_str(builder.test_count()),
        );
        Ok(status)
    }

    /// Collects logs and screenshots, seals the device result and writes its JUnit report.
    ///
    /// Calling this again after it succeeded returns the same result.
    pub async fn finish(&mut self) -> Result<DeviceResult, DeviceStateError> {
        if let Some(result) = &self.sealed {
            return Ok(result.clone());
        }
        match self.state {
            DeviceRunnerState::Running => {
                self.state = DeviceRunnerState::Collecting;
                self.collect_logs().await;
                self.collect_screenshots().await;
                self.builder.end_tests(Local::now());
            }
            DeviceRunnerState::InstallFailed => {}
            state => return Err(DeviceStateError::new(&self.serial, "finish", state)),
        }

        let builder = std::mem::replace(
            &mut self.builder,
            DeviceResultBuilder::new(self.serial.clone()),
        );
        let result = builder.build();

        let junit_path = self.settings.junit_path(&self.key);
        if let Err(error) = write_junit(&result, &junit_path) {
            warn!(serial = %self.serial, "{}", DisplayErrorChain::new(&error));
        }

        if self.state == DeviceRunnerState::Collecting {
            self.state = DeviceRunnerState::Finished;
        }
        self.sealed = Some(result.clone());
        Ok(result)
    }

    /// Clears the data of `package` on the device.
    pub async fn clear_data(&self, package: &str) -> Result<(), TransportError> {
        self.expect_success(&format!("pm clear {package}")).await
    }

    /// Stops every process belonging to `package` on the device.
    pub async fn force_stop(&self, package: &str) -> Result<(), TransportError> {
        self.transport
            .execute_shell_command(&format!("am force-stop {package}"))
            .await?;
        Ok(())
    }

    /// Returns the launcher activity component of `package`, e.g. `com.example/.MainActivity`.
    pub async fn launcher_component(&self, package: &str) -> Result<String, LauncherError> {
        let output = self
            .transport
            .execute_shell_command(&format!("pm dump {package}"))
            .await?;
        Ok(parse_launcher_component(package, &output)?)
    }

    fn install_failed(&mut self, error: &InstallError, rejected_reason: &str) {
        let reason = match error {
            InstallError::Rejected { .. } => rejected_reason.to_owned(),
            other => DisplayErrorChain::new(other).to_string(),
        };
        warn!(
            serial = %self.serial,
            "install failed: {}",
            DisplayErrorChain::new(error),
        );
        self.builder.mark_install_failed(reason);
        self.state = DeviceRunnerState::InstallFailed;
    }

    async fn capture_details(&mut self) {
        if self.builder.has_details() {
            return;
        }
        match self.transport.device_details().await {
            Ok(details) => {
                self.builder.set_details(details);
            }
            Err(error) => {
                warn!(
                    serial = %self.serial,
                    "unable to read device details: {}",
                    DisplayErrorChain::new(&error),
                );
            }
        }
    }

    async fn start_log_capture(&mut self) {
        if self.log_capture_started {
            return;
        }
        match self.transport.start_log_capture().await {
            Ok(()) => self.log_capture_started = true,
            Err(error) => {
                warn!(
                    serial = %self.serial,
                    "unable to start log capture: {}",
                    DisplayErrorChain::new(&error),
                );
            }
        }
    }

    async fn collect_logs(&mut self) {
        if !self.log_capture_started {
            return;
        }
        let logs = match self.transport.collect_logs().await {
            Ok(logs) => logs,
            Err(error) => {
                let message = format!("collecting logs: {}", DisplayErrorChain::new(&error));
                warn!(serial = %self.serial, "{message}");
                self.builder
                    .add_exception(DeviceExceptionKind::Collect, message);
                return;
            }
        };

        for (test, messages) in logs {
            match self.builder.test_mut(&test) {
                Some(result) => result.add_log(messages),
                None => {
                    debug!(
                        serial = %self.serial,
                        %test,
                        "dropping {} log messages for a test with no result",
                        messages.len(),
                    );
                }
            }
        }
    }

    async fn collect_screenshots(&mut self) {
        let pulled_dir = self.pulled_dir();
        let remote = self.settings.device_screenshot_dir();
        match self.transport.pull_files(&remote, &pulled_dir).await {
            Ok(PullOutcome::Pulled) => {
                debug!(serial = %self.serial, %remote, "pulled screenshots");
            }
            Ok(PullOutcome::NotFound) => {
                debug!(serial = %self.serial, %remote, "no screenshots on device");
            }
            Err(error) => {
                let message = format!("pulling screenshots: {}", DisplayErrorChain::new(&error));
                warn!(serial = %self.serial, "{message}");
                self.builder
                    .add_exception(DeviceExceptionKind::Collect, message);
            }
        }

        let groups = match ScreenshotGroups::discover(&[pulled_dir, self.captured_dir()]) {
            Ok(groups) => groups,
            Err(error) => {
                warn!(serial = %self.serial, "{}", DisplayErrorChain::new(&error));
                return;
            }
        };
        let stats = self.associator.associate(groups, &mut self.builder).await;
        debug!(
            serial = %self.serial,
            attached = stats.attached,
            orphaned_groups = stats.orphaned_groups,
            gifs = stats.gifs,
            "associated screenshots",
        );
    }

    async fn expect_success(&self, command: &str) -> Result<(), TransportError> {
        let output = self.transport.execute_shell_command(command).await?;
        if output.trim().starts_with("Success") {
            Ok(())
        } else {
            Err(TransportError::InvalidOutput {
                command: command.to_owned(),
                message: output.trim().to_owned(),
            })
        }
    }

    fn work_dir(&self) -> Utf8PathBuf {
        self.settings.work_dir().join(&self.key)
    }

    fn pulled_dir(&self) -> Utf8PathBuf {
        self.work_dir().join("screenshots")
    }

    fn captured_dir(&self) -> Utf8PathBuf {
        self.work_dir().join("captured")
    }
}

async fn capture_screenshot<T: DeviceTransport>(
    serial: &str,
    transport: &T,
    captured_dir: &Utf8Path,
    test: &TestIdentity,
) {
    let image = match transport.capture_screenshot().await {
        Ok(image) => image,
        Err(error) => {
            debug!(
                %serial,
                %test,
                "unable to capture screenshot: {}",
                DisplayErrorChain::new(&error),
            );
            return;
        }
    };
    let safe = test.to_path_safe();
    let dir = captured_dir
        .join(safe.class_name())
        .join(safe.method_name());
    let staged = tokio::task::spawn_blocking({
        let dir = dir.clone();
        move || stage_screenshot(&dir, &image)
    })
    .await
    .map_err(|error| ScreenshotError::Task { dir, error })
    .and_then(|result| result);
    match staged {
        Ok(path) => debug!(%serial, %test, %path, "captured screenshot"),
        Err(error) => warn!(%serial, %test, "{}", DisplayErrorChain::new(&error)),
    }
}

/// Encodes `image` as PNG into `dir`, which holds the screenshots of a single test.
fn stage_screenshot(dir: &Utf8Path, image: &RawImage) -> Result<Utf8PathBuf, ScreenshotError> {
    fs::create_dir_all(dir).map_err(|error| ScreenshotError::CreateDir {
        path: dir.to_owned(),
        error,
    })?;
    let path = dir.join(format!("{}_test-ended.png", Local::now().timestamp_millis()));
    image
        .write_png(&path)
        .map_err(|error| ScreenshotError::Write {
            path: path.clone(),
            error,
        })?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::RunArtifacts,
        errors::InstallError,
        events::LifecycleEvent,
        model::{DeviceDetails, DeviceLogs, TestOutcomeStatus},
        screenshots::PixelFormat,
    };
    use camino_tempfile::Utf8TempDir;
    use pretty_assertions::assert_eq;
    use std::{cell::RefCell, time::Duration};
    use tokio::sync::mpsc::UnboundedSender;

    #[derive(Debug, Default)]
    struct StubTransport {
        reject: Option<&'static str>,
        events: Vec<LifecycleEvent>,
        hang: bool,
        shell: RefCell<Vec<String>>,
        shell_output: String,
    }

    impl DeviceTransport for StubTransport {
        async fn install_package(
            &self,
            package: &Utf8Path,
            _options: InstallOptions,
        ) -> Result<(), InstallError> {
            if self.reject.is_some_and(|name| package.as_str() == name) {
                return Err(InstallError::Rejected {
                    package: package.to_owned(),
                    reason: "INSTALL_FAILED_OLDER_SDK".to_owned(),
                });
            }
            Ok(())
        }

        async fn execute_shell_command(&self, command: &str) -> Result<String, TransportError> {
            self.shell.borrow_mut().push(command.to_owned());
            Ok(self.shell_output.clone())
        }

        async fn run_instrumentation(
            &self,
            _request: &InstrumentationRequest,
            events: UnboundedSender<LifecycleEvent>,
        ) -> Result<(), TransportError> {
            for event in &self.events {
                let _ = events.send(event.clone());
            }
            if self.hang {
                std::future::pending::<()>().await;
            }
            Ok(())
        }

        async fn capture_screenshot(&self) -> Result<RawImage, TransportError> {
            Ok(RawImage {
                width: 1,
                height: 1,
                format: PixelFormat::Rgba8888,
                data: vec![0, 0, 0, 255],
            })
        }

        async fn pull_files(
            &self,
            _remote: &str,
            _local: &Utf8Path,
        ) -> Result<PullOutcome, TransportError> {
            Ok(PullOutcome::NotFound)
        }

        async fn device_details(&self) -> Result<DeviceDetails, TransportError> {
            Ok(DeviceDetails::default())
        }

        async fn start_log_capture(&self) -> Result<(), TransportError> {
            Ok(())
        }

        async fn collect_logs(&self) -> Result<DeviceLogs, TransportError> {
            Ok(DeviceLogs::new())
        }
    }

    fn settings(output_dir: &Utf8Path) -> Arc<RunSettings> {
        let mut settings = RunSettings::new(
            output_dir,
            RunArtifacts {
                app_apk: "app.apk".into(),
                test_apk: "app-test.apk".into(),
                app_package: "com.example".to_owned(),
                instrumentation_package: "com.example.test".to_owned(),
                test_runner: None,
            },
        );
        settings.max_silence = Duration::from_millis(200);
        Arc::new(settings)
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime created")
    }

    fn test_a() -> TestIdentity {
        TestIdentity::new("com.example.LoginTest", "signIn")
    }

    #[test]
    fn rejected_application_skips_instrumentation() {
        let dir = Utf8TempDir::new().expect("temp dir created");
        let transport = StubTransport {
            reject: Some("app.apk"),
            ..Default::default()
        };
        let mut runner = DeviceRunner::new("emulator-5554", "emulator-5554", transport, settings(dir.path()));

        let result = runtime().block_on(async {
            assert!(!runner.install(InstallOptions::default()).await);
            assert_eq!(runner.state(), DeviceRunnerState::InstallFailed);
            let error = runner
                .run(&TestSelector::All)
                .await
                .expect_err("install-failed devices can't run");
            assert_eq!(error.state(), DeviceRunnerState::InstallFailed);
            runner.finish().await.expect("install failures can be sealed")
        });

        assert!(result.install_failed());
        assert_eq!(
            result.install_failure().map(|f| f.reason.as_str()),
            Some("Unable to install application APK.")
        );
        assert!(result.test_results().is_empty());
    }

    #[test]
    fn rejected_instrumentation() {
        let dir = Utf8TempDir::new().expect("temp dir created");
        let transport = StubTransport {
            reject: Some("app-test.apk"),
            ..Default::default()
        };
        let mut runner = DeviceRunner::new("emulator-5554", "emulator-5554", transport, settings(dir.path()));
        let result = runtime().block_on(async {
            assert!(!runner.install(InstallOptions::default()).await);
            runner.finish().await.expect("sealed")
        });
        assert_eq!(
            result.install_failure().map(|f| f.reason.as_str()),
            Some("Unable to install instrumentation APK.")
        );
    }

    #[test]
    fn finish_requires_run() {
        let dir = Utf8TempDir::new().expect("temp dir created");
        let mut runner = DeviceRunner::new(
            "emulator-5554",
            "emulator-5554",
            StubTransport::default(),
            settings(dir.path()),
        );
        runtime().block_on(async {
            let error = runner.finish().await.expect_err("not run yet");
            assert_eq!(error.state(), DeviceRunnerState::Created);
            assert!(runner.install(InstallOptions::default()).await);
            let error = runner.finish().await.expect_err("installed but not run");
            assert_eq!(error.state(), DeviceRunnerState::Installed);
        });
    }

    #[test]
    fn run_captures_screenshot_on_end() {
        let dir = Utf8TempDir::new().expect("temp dir created");
        let transport = StubTransport {
            events: vec![
                LifecycleEvent::Started { test: test_a() },
                LifecycleEvent::Ended {
                    test: test_a(),
                    metrics: Default::default(),
                },
            ],
            ..Default::default()
        };
        let mut runner = DeviceRunner::new("emulator-5554", "emulator-5554", transport, settings(dir.path()));

        let result = runtime().block_on(async {
            assert!(runner.install(InstallOptions::default()).await);
            let status = runner.run(&TestSelector::All).await.expect("run allowed");
            assert_eq!(status, RunStatus::Completed);
            runner.finish().await.expect("finished")
        });

        let test = &result.test_results()[&test_a()];
        assert_eq!(test.status(), TestOutcomeStatus::Pass);
        assert_eq!(test.screenshots().len(), 1, "screenshot captured on end");
        assert!(test.animated_gif().is_none(), "a single screenshot has no GIF");
        assert!(
            dir.path().join("junit-reports/emulator-5554.xml").is_file(),
            "JUnit report written"
        );
    }

    #[test]
    fn parameterized_names_keep_their_screenshots() {
        let dir = Utf8TempDir::new().expect("temp dir created");
        let test = TestIdentity::new("com.example.LoginTest", "signIn[user=a/b]");
        let transport = StubTransport {
            events: vec![
                LifecycleEvent::Started { test: test.clone() },
                LifecycleEvent::Ended {
                    test: test.clone(),
                    metrics: Default::default(),
                },
            ],
            ..Default::default()
        };
        let mut runner = DeviceRunner::new("emulator-5554", "emulator-5554", transport, settings(dir.path()));

        let result = runtime().block_on(async {
            assert!(runner.install(InstallOptions::default()).await);
            runner.run(&TestSelector::All).await.expect("run allowed");
            runner.finish().await.expect("finished")
        });

        let screenshots = result.test_results()[&test].screenshots();
        assert_eq!(screenshots.len(), 1, "screenshot survives staging");
        assert!(
            screenshots[0].starts_with(
                dir.path()
                    .join("image/emulator-5554/com.example.LoginTest/signIn[user=a_b]")
            ),
            "{screenshots:?}"
        );
    }

    #[test]
    fn silence_times_out() {
        let dir = Utf8TempDir::new().expect("temp dir created");
        let transport = StubTransport {
            events: vec![LifecycleEvent::Started { test: test_a() }],
            hang: true,
            ..Default::default()
        };
        let mut runner = DeviceRunner::new("emulator-5554", "emulator-5554", transport, settings(dir.path()));

        let result = runtime().block_on(async {
            assert!(runner.install(InstallOptions::default()).await);
            let status = runner.run(&TestSelector::All).await.expect("run allowed");
            assert_eq!(status, RunStatus::TimedOut);
            runner.finish().await.expect("finished")
        });

        assert_eq!(result.exceptions().len(), 1);
        assert_eq!(result.exceptions()[0].kind, DeviceExceptionKind::Timeout);
        assert_eq!(
            result.test_results()[&test_a()].status(),
            TestOutcomeStatus::Error,
            "the test that never ended is an error"
        );
    }

    #[test]
    fn shell_helpers() {
        let dir = Utf8TempDir::new().expect("temp dir created");
        let transport = StubTransport {
            shell_output: "Success\n".to_owned(),
            ..Default::default()
        };
        let runner = DeviceRunner::new("emulator-5554", "emulator-5554", transport, settings(dir.path()));

        runtime().block_on(async {
            runner.clear_data("com.example").await.expect("cleared");
            runner.force_stop("com.example").await.expect("stopped");
            runner
                .launcher_component("com.example")
                .await
                .expect_err("no launcher in output");
        });

        assert_eq!(
            *runner.transport().shell.borrow(),
            vec![
                "pm clear com.example".to_owned(),
                "am force-stop com.example".to_owned(),
                "pm dump com.example".to_owned(),
            ]
        );
    }
}
