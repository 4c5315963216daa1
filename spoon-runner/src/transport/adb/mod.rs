// Copyright (c) The spoon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A transport that drives devices through the `adb` command-line tool.

mod instrument;
mod logcat;

use super::{
    DeviceTransport, InstallOptions, InstrumentationRequest, PullOutcome, TransportProvider,
};
use crate::{
    errors::{InstallError, TransportError},
    events::LifecycleEvent,
    model::{DeviceDetails, DeviceLogs},
    screenshots::RawImage,
};
use camino::{Utf8Path, Utf8PathBuf};
use instrument::InstrumentationParser;
use std::{borrow::Cow, collections::BTreeMap, process::Stdio};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, BufReader},
    sync::mpsc::UnboundedSender,
};
use tracing::{debug, trace};

/// A command-line invocation of `adb`.
#[derive(Clone, Debug)]
struct AdbCli<'a> {
    adb: &'a Utf8Path,
    args: Vec<Cow<'a, str>>,
}

impl<'a> AdbCli<'a> {
    fn new(adb: &'a Utf8Path) -> Self {
        Self {
            adb,
            args: Vec::new(),
        }
    }

    fn for_device(adb: &'a Utf8Path, serial: &'a str) -> Self {
        let mut cli = Self::new(adb);
        cli.add_arg("-s").add_arg(serial);
        cli
    }

    fn add_arg(&mut self, arg: impl Into<Cow<'a, str>>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    fn add_args(&mut self, args: impl IntoIterator<Item = impl Into<Cow<'a, str>>>) -> &mut Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn display(&self) -> String {
        shell_words::join(
            std::iter::once(self.adb.as_str()).chain(self.args.iter().map(|arg| &**arg)),
        )
    }

    fn to_expression(&self) -> duct::Expression {
        duct::cmd(self.adb.as_str(), self.args.iter().map(|arg| &**arg))
    }

    fn to_command(&self) -> tokio::process::Command {
        let mut command = tokio::process::Command::new(self.adb.as_std_path());
        command
            .args(self.args.iter().map(|arg| &**arg))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        command
    }

    async fn output(&self) -> Result<std::process::Output, TransportError> {
        trace!("executing `{}`", self.display());
        self.to_command()
            .output()
            .await
            .map_err(|error| TransportError::Spawn {
                command: self.display(),
                error,
            })
    }

    /// Runs the command, failing if it exits unsuccessfully, and returns standard output.
    async fn read(&self) -> Result<Vec<u8>, TransportError> {
        let output = self.output().await?;
        if !output.status.success() {
            return Err(TransportError::CommandFailed {
                command: self.display(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        Ok(output.stdout)
    }
}

/// A handle to the local `adb` server. Hands out one [`AdbTransport`] per device.
#[derive(Clone, Debug)]
pub struct AdbSession {
    adb: Utf8PathBuf,
}

impl AdbSession {
    /// Creates a session using the given `adb` binary.
    pub fn new(adb: impl Into<Utf8PathBuf>) -> Self {
        Self { adb: adb.into() }
    }

    /// Creates a session using the `adb` binary inside an Android SDK installation.
    pub fn from_sdk(sdk: &Utf8Path) -> Self {
        Self::new(sdk.join("platform-tools").join("adb"))
    }

    /// Returns the path to the `adb` binary.
    pub fn adb(&self) -> &Utf8Path {
        &self.adb
    }
}

impl TransportProvider for AdbSession {
    type Transport = AdbTransport;

    fn attached_devices(&self) -> Result<Vec<String>, TransportError> {
        let mut cli = AdbCli::new(&self.adb);
        cli.add_arg("devices");
        let output = cli
            .to_expression()
            .stdout_capture()
            .stderr_capture()
            .unchecked()
            .run()
            .map_err(|error| TransportError::Spawn {
                command: cli.display(),
                error,
            })?;
        if !output.status.success() {
            return Err(TransportError::CommandFailed {
                command: cli.display(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        Ok(parse_devices(&String::from_utf8_lossy(&output.stdout)))
    }

    fn connect(&self, serial: &str) -> Result<AdbTransport, TransportError> {
        Ok(AdbTransport {
            adb: self.adb.clone(),
            serial: serial.to_owned(),
        })
    }
}

/// Parses `adb devices` output, returning the serials of devices in the `device` state.
fn parse_devices(output: &str) -> Vec<String> {
    output
        .lines()
        .skip_while(|line| !line.starts_with("List of devices attached"))
        .skip(1)
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next()) {
                (Some(serial), Some("device")) => Some(serial.to_owned()),
                (Some(serial), Some(state)) => {
                    debug!(serial, state, "skipping device that isn't ready");
                    None
                }
                _ => None,
            }
        })
        .collect()
}

/// Parses `getprop` output: lines of the form `[key]: [value]`.
fn parse_getprop(output: &str) -> BTreeMap<String, String> {
    output
        .lines()
        .filter_map(|line| {
            let (key, value) = line.trim().split_once("]: [")?;
            let key = key.strip_prefix('[')?;
            let value = value.strip_suffix(']')?;
            Some((key.to_owned(), value.to_owned()))
        })
        .collect()
}

/// A connection to a single device through `adb -s <serial>`.
#[derive(Clone, Debug)]
pub struct AdbTransport {
    adb: Utf8PathBuf,
    serial: String,
}

impl AdbTransport {
    fn cli(&self) -> AdbCli<'_> {
        AdbCli::for_device(&self.adb, &self.serial)
    }

    fn instrument_command(request: &InstrumentationRequest) -> String {
        let class_arg = request.selector.instrumentation_class_arg();
        let component = format!(
            "{}/{}",
            request.instrumentation_package, request.test_runner
        );

        let mut args = vec!["am", "instrument", "-r", "-w"];
        if let Some(size) = request.test_size {
            args.extend(["-e", "size", size.as_arg()]);
        }
        if let Some(class_arg) = &class_arg {
            args.extend(["-e", "class", class_arg.as_str()]);
        }
        args.push(&component);
        shell_words::join(args)
    }
}

impl DeviceTransport for AdbTransport {
    async fn install_package(
        &self,
        package: &Utf8Path,
        options: InstallOptions,
    ) -> Result<(), InstallError> {
        let mut cli = self.cli();
        cli.add_arg("install");
        if options.reinstall {
            cli.add_arg("-r");
        }
        if options.allow_downgrade {
            cli.add_arg("-d");
        }
        cli.add_arg(package.as_str());

        let output = cli.output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if let Some(failure) = stdout
            .lines()
            .chain(stderr.lines())
            .find_map(|line| line.find("Failure").map(|index| &line[index..]))
        {
            return Err(InstallError::Rejected {
                package: package.to_owned(),
                reason: failure.trim().to_owned(),
            });
        }
        if !output.status.success() {
            return Err(TransportError::CommandFailed {
                command: cli.display(),
                status: output.status.to_string(),
                stderr: stderr.trim().to_owned(),
            }
            .into());
        }
        Ok(())
    }

    async fn execute_shell_command(&self, command: &str) -> Result<String, TransportError> {
        let mut cli = self.cli();
        cli.add_arg("shell").add_arg(command);
        let stdout = cli.read().await?;
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }

    async fn run_instrumentation(
        &self,
        request: &InstrumentationRequest,
        events: UnboundedSender<LifecycleEvent>,
    ) -> Result<(), TransportError> {
        let shell_command = Self::instrument_command(request);
        let mut cli = self.cli();
        cli.add_arg("shell").add_arg(shell_command);
        debug!(serial = %self.serial, "running `{}`", cli.display());

        let mut child = cli
            .to_command()
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|error| TransportError::Spawn {
                command: cli.display(),
                error,
            })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::InvalidOutput {
                command: cli.display(),
                message: "standard output was not captured".to_owned(),
            })?;

        let listening = forward_instrumentation_output(BufReader::new(stdout), &events)
            .await
            .map_err(|error| TransportError::Io {
                path: Utf8PathBuf::from("<instrumentation output>"),
                error,
            })?;
        if !listening {
            return Ok(());
        }

        let status = child.wait().await.map_err(|error| TransportError::Spawn {
            command: cli.display(),
            error,
        })?;
        if !status.success() {
            return Err(TransportError::CommandFailed {
                command: cli.display(),
                status: status.to_string(),
                stderr: String::new(),
            });
        }
        Ok(())
    }

    async fn capture_screenshot(&self) -> Result<RawImage, TransportError> {
        let mut cli = self.cli();
        cli.add_args(["exec-out", "screencap"]);
        let bytes = cli.read().await?;
        RawImage::from_screencap(&bytes).map_err(|error| TransportError::InvalidOutput {
            command: cli.display(),
            message: error.to_string(),
        })
    }

    async fn pull_files(
        &self,
        remote: &str,
        local: &Utf8Path,
    ) -> Result<PullOutcome, TransportError> {
        let mut probe = self.cli();
        probe.add_args(["shell", "ls", "-d", remote]);
        let output = probe.output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() || stdout.contains("No such file") {
            return Ok(PullOutcome::NotFound);
        }

        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|error| TransportError::Io {
                    path: parent.to_owned(),
                    error,
                })?;
        }
        let mut cli = self.cli();
        cli.add_args(["pull", remote, local.as_str()]);
        cli.read().await?;
        Ok(PullOutcome::Pulled)
    }

    async fn device_details(&self) -> Result<DeviceDetails, TransportError> {
        let output = self.execute_shell_command("getprop").await?;
        Ok(DeviceDetails::from_properties(
            &self.serial,
            &parse_getprop(&output),
        ))
    }

    async fn start_log_capture(&self) -> Result<(), TransportError> {
        let mut cli = self.cli();
        cli.add_args(["logcat", "-c"]);
        cli.read().await?;
        Ok(())
    }

    async fn collect_logs(&self) -> Result<DeviceLogs, TransportError> {
        let mut cli = self.cli();
        cli.add_args(["logcat", "-d", "-v", "threadtime"]);
        let output = cli.read().await?;
        Ok(logcat::segment_by_test(&String::from_utf8_lossy(&output)))
    }
}

/// Parses instrumentation output line by line, sending events as they complete.
///
/// Lines are decoded lossily: stack traces can carry bytes that aren't valid UTF-8, and they
/// must not cut the stream short. Returns false if the receiver went away before the output
/// ended.
async fn forward_instrumentation_output<R: AsyncBufRead + Unpin>(
    mut reader: R,
    events: &UnboundedSender<LifecycleEvent>,
) -> std::io::Result<bool> {
    let mut parser = InstrumentationParser::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.strip_suffix('\n').unwrap_or(&line);
        for event in parser.feed_line(line) {
            // The receiving side only goes away once it's stopped listening for this device.
            if events.send(event).is_err() {
                return Ok(false);
            }
        }
    }
    for event in parser.finish() {
        let _ = events.send(event);
    }
    Ok(true)
}
