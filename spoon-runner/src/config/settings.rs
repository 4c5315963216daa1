// Copyright (c) The spoon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{screenshots::GifSettings, transport::TestSize};
use camino::Utf8PathBuf;
use std::{num::NonZeroUsize, time::Duration};

/// The packages under test, as supplied on the command line.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunArtifacts {
    /// The application package file.
    pub app_apk: Utf8PathBuf,

    /// The instrumentation package file.
    pub test_apk: Utf8PathBuf,

    /// The application package name.
    pub app_package: String,

    /// The instrumentation package name.
    pub instrumentation_package: String,

    /// The test runner class, overriding the configured one.
    pub test_runner: Option<String>,
}

/// Everything a fleet run needs to know, with configuration and overrides resolved.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunSettings {
    /// The run title.
    pub title: String,

    /// The directory results are written to. Cleaned at the start of the run.
    pub output_dir: Utf8PathBuf,

    /// The application package file.
    pub app_apk: Utf8PathBuf,

    /// The instrumentation package file.
    pub test_apk: Utf8PathBuf,

    /// The application package name.
    pub app_package: String,

    /// The instrumentation package name.
    pub instrumentation_package: String,

    /// The instrumentation test runner class.
    pub test_runner: String,

    /// Restrict the run to tests of this size.
    pub test_size: Option<TestSize>,

    /// Allow installing an older application package over a newer one.
    pub allow_downgrade: bool,

    /// Fail the run up front if there are no devices.
    pub fail_if_no_device: bool,

    /// The longest a device may go without reporting a test event.
    pub max_silence: Duration,

    /// Keep the work directory after the run.
    pub keep_work_dir: bool,

    /// Debug mode. Implies keeping the work directory.
    pub debug: bool,

    /// Animated GIF settings.
    pub gif: GifSettings,

    /// The maximum number of devices operated on at once. `None` means no limit.
    pub device_concurrency: Option<NonZeroUsize>,
}

impl RunSettings {
    /// The name of the transient work directory within the output directory.
    pub const WORK_DIR: &'static str = "work";

    /// The name of the per-device JUnit report directory within the output directory.
    pub const JUNIT_DIR: &'static str = "junit-reports";

    /// The name of the screenshot directory within the output directory.
    pub const IMAGE_DIR: &'static str = "image";

    /// Creates settings with default values for everything except the output directory and the
    /// packages under test.
    pub fn new(output_dir: impl Into<Utf8PathBuf>, artifacts: RunArtifacts) -> Self {
        Self {
            title: "Spoon Execution".to_owned(),
            output_dir: output_dir.into(),
            app_apk: artifacts.app_apk,
            test_apk: artifacts.test_apk,
            app_package: artifacts.app_package,
            instrumentation_package: artifacts.instrumentation_package,
            test_runner: artifacts
                .test_runner
                .unwrap_or_else(|| "androidx.test.runner.AndroidJUnitRunner".to_owned()),
            test_size: None,
            allow_downgrade: false,
            fail_if_no_device: false,
            max_silence: Duration::from_secs(600),
            keep_work_dir: false,
            debug: false,
            gif: GifSettings::default(),
            device_concurrency: None,
        }
    }

    /// Returns the transient work directory.
    pub fn work_dir(&self) -> Utf8PathBuf {
        self.output_dir.join(Self::WORK_DIR)
    }

    /// Returns the JUnit report path for a device.
    pub fn junit_path(&self, device_key: &str) -> Utf8PathBuf {
        self.output_dir
            .join(Self::JUNIT_DIR)
            .join(format!("{device_key}.xml"))
    }

    /// Returns the screenshot directory for a device.
    pub fn image_dir(&self, device_key: &str) -> Utf8PathBuf {
        self.output_dir.join(Self::IMAGE_DIR).join(device_key)
    }

    /// Returns true if the work directory should be kept after the run.
    pub fn keeps_work_dir(&self) -> bool {
        self.keep_work_dir || self.debug
    }

    /// Returns the remote directory the application stores its screenshots in.
    pub fn device_screenshot_dir(&self) -> String {
        format!("/data/data/{}/app_spoon-screenshots", self.app_package)
    }

    /// Returns the maximum number of devices to operate on at once, given the fleet size.
    pub fn concurrency_for(&self, device_count: usize) -> usize {
        let limit = self
            .device_concurrency
            .map_or(usize::MAX, NonZeroUsize::get);
        device_count.min(limit).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> RunSettings {
        RunSettings::new(
            "/out",
            RunArtifacts {
                app_apk: "app.apk".into(),
                test_apk: "test.apk".into(),
                app_package: "com.example".to_owned(),
                instrumentation_package: "com.example.test".to_owned(),
                test_runner: None,
            },
        )
    }

    #[test]
    fn output_layout() {
        let settings = settings();
        assert_eq!(settings.work_dir(), "/out/work");
        assert_eq!(
            settings.junit_path("emulator-5554"),
            "/out/junit-reports/emulator-5554.xml"
        );
        assert_eq!(settings.image_dir("emulator-5554"), "/out/image/emulator-5554");
        assert_eq!(
            settings.device_screenshot_dir(),
            "/data/data/com.example/app_spoon-screenshots"
        );
    }

    #[test]
    fn concurrency() {
        let mut settings = settings();
        assert_eq!(settings.concurrency_for(5), 5);
        assert_eq!(settings.concurrency_for(0), 1);
        settings.device_concurrency = NonZeroUsize::new(2);
        assert_eq!(settings.concurrency_for(5), 2);
    }

    #[test]
    fn debug_keeps_work_dir() {
        let mut settings = settings();
        assert!(!settings.keeps_work_dir());
        settings.debug = true;
        assert!(settings.keeps_work_dir());
    }
}
