// Copyright (c) The spoon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::Utf8TempDir;
use spoon_runner::{
    config::{RunArtifacts, RunSettings},
    errors::{InstallError, TransportError},
    events::LifecycleEvent,
    model::{DeviceDetails, DeviceLogs, TestIdentity},
    screenshots::{PixelFormat, RawImage},
    transport::{
        DeviceTransport, InstallOptions, InstrumentationRequest, PullOutcome, TransportProvider,
    },
};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::mpsc::UnboundedSender;

pub(crate) const APP_PACKAGE: &str = "com.example";

/// How a scripted device responds to package installs.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) enum InstallBehavior {
    #[default]
    Accept,
    RejectApp,
    Offline,
}

/// Everything a scripted device does over the course of a run.
#[derive(Clone, Debug, Default)]
pub(crate) struct DeviceScript {
    pub(crate) install: InstallBehavior,
    pub(crate) events: Vec<LifecycleEvent>,
    pub(crate) instrumentation_error: Option<&'static str>,
    pub(crate) hang: bool,
    pub(crate) capture_screenshots: bool,
    pub(crate) device_screenshots: Vec<(TestIdentity, &'static str)>,
    pub(crate) logs: DeviceLogs,
    pub(crate) shell_output: &'static str,
}

impl DeviceScript {
    pub(crate) fn passing(tests: &[TestIdentity]) -> Self {
        Self {
            events: tests.iter().flat_map(started_and_ended).collect(),
            ..Default::default()
        }
    }
}

/// Records calls made against a scripted device.
#[derive(Debug, Default)]
pub(crate) struct CallLog {
    pub(crate) installs: Vec<(Utf8PathBuf, InstallOptions)>,
    pub(crate) shell: Vec<String>,
    pub(crate) requests: Vec<InstrumentationRequest>,
}

#[derive(Debug)]
pub(crate) struct FakeTransport {
    serial: String,
    script: DeviceScript,
    calls: Arc<Mutex<CallLog>>,
}

impl FakeTransport {
    pub(crate) fn new(serial: &str, script: DeviceScript) -> Self {
        Self {
            serial: serial.to_owned(),
            script,
            calls: Arc::default(),
        }
    }

    pub(crate) fn calls(&self) -> Arc<Mutex<CallLog>> {
        self.calls.clone()
    }
}

impl DeviceTransport for FakeTransport {
    async fn install_package(
        &self,
        package: &Utf8Path,
        options: InstallOptions,
    ) -> Result<(), InstallError> {
        self.calls
            .lock()
            .expect("lock not poisoned")
            .installs
            .push((package.to_owned(), options));
        let rejected = match self.script.install {
            InstallBehavior::Accept => false,
            InstallBehavior::RejectApp => package.as_str().ends_with("app.apk"),
            InstallBehavior::Offline => {
                return Err(TransportError::other(format!("device {} offline", self.serial)).into());
            }
        };
        if rejected {
            return Err(InstallError::Rejected {
                package: package.to_owned(),
                reason: "INSTALL_FAILED_UPDATE_INCOMPATIBLE".to_owned(),
            });
        }
        Ok(())
    }

    async fn execute_shell_command(&self, command: &str) -> Result<String, TransportError> {
        self.calls
            .lock()
            .expect("lock not poisoned")
            .shell
            .push(command.to_owned());
        Ok(self.script.shell_output.to_owned())
    }

    async fn run_instrumentation(
        &self,
        request: &InstrumentationRequest,
        events: UnboundedSender<LifecycleEvent>,
    ) -> Result<(), TransportError> {
        self.calls
            .lock()
            .expect("lock not poisoned")
            .requests
            .push(request.clone());
        for event in &self.script.events {
            // Yield so events interleave with other devices.
            tokio::task::yield_now().await;
            let _ = events.send(event.clone());
        }
        if self.script.hang {
            std::future::pending::<()>().await;
        }
        match self.script.instrumentation_error {
            Some(message) => Err(TransportError::other(message)),
            None => Ok(()),
        }
    }

    async fn capture_screenshot(&self) -> Result<RawImage, TransportError> {
        if self.script.capture_screenshots {
            Ok(solid_image(0x20))
        } else {
            Err(TransportError::other("screencap unavailable"))
        }
    }

    async fn pull_files(
        &self,
        remote: &str,
        local: &Utf8Path,
    ) -> Result<PullOutcome, TransportError> {
        assert_eq!(remote, format!("/data/data/{APP_PACKAGE}/app_spoon-screenshots"));
        if self.script.device_screenshots.is_empty() {
            return Ok(PullOutcome::NotFound);
        }
        for (index, (test, name)) in self.script.device_screenshots.iter().enumerate() {
            let dir = local.join(test.class_name()).join(test.method_name());
            std::fs::create_dir_all(&dir).map_err(|error| TransportError::Io {
                path: dir.clone(),
                error,
            })?;
            let shade = u8::try_from(index * 40 % 256).expect("fits in a byte");
            solid_image(shade)
                .write_png(&dir.join(name))
                .map_err(|error| TransportError::other(error.to_string()))?;
        }
        Ok(PullOutcome::Pulled)
    }

    async fn device_details(&self) -> Result<DeviceDetails, TransportError> {
        Ok(DeviceDetails {
            model: Some("Pixel 7".to_owned()),
            api_level: Some(34),
            ..Default::default()
        })
    }

    async fn start_log_capture(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn collect_logs(&self) -> Result<DeviceLogs, TransportError> {
        Ok(self.script.logs.clone())
    }
}

/// Hands out scripted transports. Serials without a script fail to connect.
#[derive(Debug, Default)]
pub(crate) struct FakeProvider {
    scripts: BTreeMap<String, DeviceScript>,
    attached: Vec<String>,
}

impl FakeProvider {
    pub(crate) fn new(devices: impl IntoIterator<Item = (&'static str, DeviceScript)>) -> Self {
        let mut provider = Self::default();
        for (serial, script) in devices {
            provider.attached.push(serial.to_owned());
            provider.scripts.insert(serial.to_owned(), script);
        }
        provider
    }
}

impl TransportProvider for FakeProvider {
    type Transport = FakeTransport;

    fn attached_devices(&self) -> Result<Vec<String>, TransportError> {
        Ok(self.attached.clone())
    }

    fn connect(&self, serial: &str) -> Result<FakeTransport, TransportError> {
        let script = self
            .scripts
            .get(serial)
            .cloned()
            .ok_or_else(|| TransportError::other(format!("unknown device {serial}")))?;
        Ok(FakeTransport::new(serial, script))
    }
}

/// A temporary workspace with package files in place.
pub(crate) struct Workspace {
    pub(crate) dir: Utf8TempDir,
}

impl Workspace {
    pub(crate) fn new() -> Self {
        let dir = Utf8TempDir::new().expect("temp dir created");
        std::fs::write(dir.path().join("app.apk"), b"app").expect("app written");
        std::fs::write(dir.path().join("app-test.apk"), b"test").expect("test apk written");
        Self { dir }
    }

    pub(crate) fn output_dir(&self) -> Utf8PathBuf {
        self.dir.path().join("spoon-output")
    }

    pub(crate) fn settings(&self) -> RunSettings {
        RunSettings::new(
            self.output_dir(),
            RunArtifacts {
                app_apk: self.dir.path().join("app.apk"),
                test_apk: self.dir.path().join("app-test.apk"),
                app_package: APP_PACKAGE.to_owned(),
                instrumentation_package: format!("{APP_PACKAGE}.test"),
                test_runner: None,
            },
        )
    }

    pub(crate) fn settings_with_silence(&self, max_silence: Duration) -> RunSettings {
        RunSettings {
            max_silence,
            ..self.settings()
        }
    }
}

pub(crate) fn test_id(class: &str, method: &str) -> TestIdentity {
    TestIdentity::new(format!("com.example.{class}"), method)
}

pub(crate) fn started_and_ended(test: &TestIdentity) -> [LifecycleEvent; 2] {
    [
        LifecycleEvent::Started { test: test.clone() },
        LifecycleEvent::Ended {
            test: test.clone(),
            metrics: BTreeMap::new(),
        },
    ]
}

pub(crate) fn current_thread_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime created")
}

fn solid_image(shade: u8) -> RawImage {
    let (width, height) = (4, 3);
    RawImage {
        width,
        height,
        format: PixelFormat::Rgba8888,
        data: [shade, 255 - shade, 0x80, 0xff].repeat((width * height) as usize),
    }
}
