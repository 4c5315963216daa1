// Copyright (c) The spoon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::{ExpectedError, Result},
    output::{OutputContext, OutputOpts, StderrStyles, clap_styles},
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use owo_colors::OwoColorize;
use spoon_metadata::SpoonExitCode;
use spoon_runner::{
    aggregator::device_succeeded,
    config::{RunArtifacts, RunSettings, SpoonConfig},
    model::{RunSummary, TestOutcomeStatus, TestSelector},
    runner::FleetCoordinator,
    transport::{TestSize, TransportProvider, adb::AdbSession},
};
use std::{io::Write, num::NonZeroUsize, time::Duration};
use swrite::{SWrite, swrite, swriteln};
use tracing::{debug, info, warn};

/// The file the sealed run summary is written to, inside the output directory.
pub const SUMMARY_FILE: &str = "result.json";

/// Runs an Android instrumentation test suite across every attached device, and aggregates the
/// results.
#[derive(Debug, Parser)]
#[command(
    name = "spoon",
    version,
    styles = clap_styles::style(),
    max_term_width = 100
)]
pub struct SpoonApp {
    #[clap(flatten)]
    output: OutputOpts,

    #[clap(subcommand)]
    command: Command,
}

impl SpoonApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app, returning the process exit code.
    pub fn exec(self, output: OutputContext) -> Result<i32> {
        match self.command {
            Command::Run(opts) => opts.exec(output),
            Command::Devices(opts) => opts.exec(),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Install the packages on every device, run the tests and write reports
    ///
    /// Per-device JUnit reports are written to `junit-reports/` and screenshots to `image/`
    /// inside the output directory, along with a JSON summary of the whole run.
    Run(RunOpts),

    /// List the devices a run would use
    Devices(DevicesOpts),
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Config options")]
struct ConfigOpts {
    /// Config file [default: .config/spoon.toml in the current directory]
    #[arg(long, value_name = "PATH", env = "SPOON_CONFIG_FILE")]
    config_file: Option<Utf8PathBuf>,

    /// Path to the adb binary [default: from config, or adb on PATH]
    #[arg(long, value_name = "PATH", env = "SPOON_ADB")]
    adb: Option<Utf8PathBuf>,

    /// Android SDK to find adb in
    #[arg(long, value_name = "DIR", env = "SPOON_ANDROID_SDK", conflicts_with = "adb")]
    sdk: Option<Utf8PathBuf>,
}

impl ConfigOpts {
    fn load(&self) -> Result<SpoonConfig> {
        let cwd = std::env::current_dir().map_err(|err| ExpectedError::CurrentDirFailed { err })?;
        let cwd = Utf8PathBuf::try_from(cwd)
            .map_err(|err| ExpectedError::CurrentDirInvalidUtf8 { err })?;
        let config = SpoonConfig::from_sources(cwd, self.config_file.as_deref())?;
        Ok(config)
    }

    fn adb_session(&self, config: &SpoonConfig) -> AdbSession {
        let session = match (&self.adb, &self.sdk) {
            (Some(adb), _) => AdbSession::new(config.workspace_root().join(adb)),
            (None, Some(sdk)) => AdbSession::from_sdk(&config.workspace_root().join(sdk)),
            (None, None) => AdbSession::new(config.adb_path()),
        };
        debug!(adb = %session.adb(), "using adb");
        session
    }
}

#[derive(Debug, Args)]
struct RunOpts {
    #[clap(flatten)]
    config: ConfigOpts,

    /// Application APK
    #[arg(long, value_name = "PATH", env = "SPOON_APK")]
    apk: Utf8PathBuf,

    /// Instrumentation APK
    #[arg(long, value_name = "PATH", env = "SPOON_TEST_APK")]
    test_apk: Utf8PathBuf,

    /// Package name of the application under test
    #[arg(long, value_name = "PACKAGE", env = "SPOON_APP_PACKAGE")]
    app_package: String,

    /// Package name of the instrumentation [default: <APP_PACKAGE>.test]
    #[arg(long, value_name = "PACKAGE", env = "SPOON_INSTRUMENTATION_PACKAGE")]
    instrumentation_package: Option<String>,

    /// Instrumentation runner class [default: from config]
    #[arg(long, value_name = "CLASS", env = "SPOON_TEST_RUNNER")]
    test_runner: Option<String>,

    #[clap(flatten)]
    selection: SelectionOpts,

    #[clap(flatten)]
    run: RunSettingsOpts,

    /// Clear the application's data on every device before running tests
    #[arg(long, env = "SPOON_CLEAR_APP_DATA")]
    clear_app_data: bool,
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Test selection")]
struct SelectionOpts {
    /// Only run tests in this class
    #[arg(long, value_name = "CLASS", env = "SPOON_CLASS_NAME")]
    class_name: Option<String>,

    /// Only run this test method (requires --class-name)
    #[arg(long, value_name = "METHOD", env = "SPOON_METHOD_NAME")]
    method_name: Option<String>,

    /// Only run tests annotated with this size: small, medium, large
    #[arg(long, value_name = "SIZE", env = "SPOON_SIZE")]
    size: Option<TestSize>,
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Run options")]
struct RunSettingsOpts {
    /// Device serial to run on; may be repeated [default: every attached device]
    #[arg(
        long = "device",
        short = 's',
        value_name = "SERIAL",
        env = "SPOON_DEVICES",
        value_delimiter = ','
    )]
    devices: Vec<String>,

    /// Output directory [default: from config]
    #[arg(long, short = 'o', value_name = "DIR", env = "SPOON_OUTPUT")]
    output: Option<Utf8PathBuf>,

    /// Title of the run
    #[arg(long, value_name = "TITLE", env = "SPOON_TITLE")]
    title: Option<String>,

    /// Fail if no devices are available
    #[arg(long, env = "SPOON_FAIL_IF_NO_DEVICE")]
    fail_if_no_device: bool,

    /// Allow the application to be downgraded on install
    #[arg(long, env = "SPOON_ALLOW_DOWNGRADE")]
    allow_downgrade: bool,

    /// Longest a device may go without reporting a test event, e.g. "10m"
    #[arg(long, value_name = "DURATION", env = "SPOON_MAX_SILENCE", value_parser = humantime::parse_duration)]
    max_silence: Option<Duration>,

    /// Maximum number of devices to operate on at once
    #[arg(long, short = 'j', value_name = "N", env = "SPOON_DEVICE_CONCURRENCY")]
    device_concurrency: Option<NonZeroUsize>,

    /// Don't build animated GIFs out of test screenshots
    #[arg(long, env = "SPOON_NO_ANIMATED_GIF")]
    no_animated_gif: bool,

    /// Keep the work directory after the run
    #[arg(long, env = "SPOON_KEEP_WORK_DIR")]
    keep_work_dir: bool,

    /// Debug mode: log verbosely and keep the work directory
    #[arg(long, env = "SPOON_DEBUG")]
    debug: bool,
}

impl RunSettingsOpts {
    fn apply(&self, root: &Utf8Path, settings: &mut RunSettings) {
        if let Some(output) = &self.output {
            settings.output_dir = root.join(output);
        }
        if let Some(title) = &self.title {
            settings.title.clone_from(title);
        }
        if let Some(max_silence) = self.max_silence {
            settings.max_silence = max_silence;
        }
        if self.device_concurrency.is_some() {
            settings.device_concurrency = self.device_concurrency;
        }
        settings.fail_if_no_device |= self.fail_if_no_device;
        settings.allow_downgrade |= self.allow_downgrade;
        settings.keep_work_dir |= self.keep_work_dir;
        settings.debug |= self.debug;
        if self.no_animated_gif {
            settings.gif.enabled = false;
        }
    }
}

impl RunOpts {
    fn settings(&self, config: &SpoonConfig) -> RunSettings {
        let root = config.workspace_root();
        let mut settings = config.run_settings(RunArtifacts {
            app_apk: root.join(&self.apk),
            test_apk: root.join(&self.test_apk),
            app_package: self.app_package.clone(),
            instrumentation_package: self
                .instrumentation_package
                .clone()
                .unwrap_or_else(|| format!("{}.test", self.app_package)),
            test_runner: self.test_runner.clone(),
        });
        if self.selection.size.is_some() {
            settings.test_size = self.selection.size;
        }
        self.run.apply(root, &mut settings);
        settings
    }

    fn exec(self, output: OutputContext) -> Result<i32> {
        let config = self.config.load()?;
        let settings = self.settings(&config);
        if settings.debug {
            output.enable_debug_logging();
        }
        let selector = TestSelector::new(
            self.selection.class_name.as_deref(),
            self.selection.method_name.as_deref(),
        )?;
        let summary_path = settings.output_dir.join(SUMMARY_FILE);

        let provider = self.config.adb_session(&config);
        let mut fleet = FleetCoordinator::new(provider, settings)?;
        fleet.init(self.run.devices)?;
        if self.clear_app_data {
            fleet.clear_data(&self.app_package);
        }
        fleet.run_tests(&selector)?;
        let outcome = fleet.finish()?;

        write_summary(&outcome.summary, &summary_path)?;
        eprint!("{}", summary_text(&outcome.summary, &output.stderr_styles()));
        info!("run summary written to `{summary_path}`");

        if outcome.success {
            Ok(SpoonExitCode::OK)
        } else {
            Err(ExpectedError::TestRunFailed)
        }
    }
}

#[derive(Debug, Args)]
struct DevicesOpts {
    #[clap(flatten)]
    config: ConfigOpts,
}

impl DevicesOpts {
    fn exec(self) -> Result<i32> {
        let config = self.config.load()?;
        let session = self.config.adb_session(&config);
        let serials = session
            .attached_devices()
            .map_err(|err| ExpectedError::DeviceListError { err })?;
        if serials.is_empty() {
            warn!("no devices attached");
        }

        let mut stdout = std::io::stdout().lock();
        for serial in &serials {
            writeln!(stdout, "{serial}").map_err(|err| ExpectedError::WriteStdoutError { err })?;
        }
        stdout
            .flush()
            .map_err(|err| ExpectedError::WriteStdoutError { err })?;
        Ok(SpoonExitCode::OK)
    }
}

fn write_summary(summary: &RunSummary, path: &Utf8Path) -> Result<()> {
    let json = serde_json::to_string_pretty(summary)
        .map_err(|err| ExpectedError::SerializeSummaryError { err })?;
    std::fs::write(path, json).map_err(|err| ExpectedError::write_summary_error(path, err))
}

/// One line per device: how many tests passed, and what went wrong otherwise.
fn summary_text(summary: &RunSummary, styles: &StderrStyles) -> String {
    let mut out = String::new();
    swriteln!(out, "{}", summary.title().style(styles.bold));
    for (key, result) in summary.results() {
        let key = key.style(styles.bold);
        if let Some(failure) = result.install_failure() {
            swriteln!(
                out,
                "  {key}: {}",
                format!("install failed: {}", failure.reason).style(styles.warning_text)
            );
            continue;
        }

        let passed = result
            .test_results()
            .values()
            .filter(|test| test.status() == TestOutcomeStatus::Pass)
            .count();
        let total = result.test_results().len();
        let mut line = format!("{passed}/{total} passed");
        if !result.exceptions().is_empty() {
            swrite!(line, ", {} device errors", result.exceptions().len());
        }
        if device_succeeded(result) {
            swriteln!(out, "  {key}: {line}");
        } else {
            swriteln!(out, "  {key}: {}", line.style(styles.warning_text));
        }
    }
    out
}
