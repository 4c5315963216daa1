// Copyright (c) The spoon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for spoon runs.
//!
//! Configuration is layered: the defaults embedded in the binary come first, then the project's
//! `.config/spoon.toml` (or a file passed in explicitly). Command-line overrides are applied on
//! top of the resulting [`RunSettings`].

mod settings;

pub use settings::*;

use crate::{errors::ConfigParseError, screenshots::GifSettings, transport::TestSize};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigBuilder, File, FileFormat, builder::DefaultState};
use itertools::Itertools;
use serde::Deserialize;
use std::{collections::BTreeSet, num::NonZeroUsize, time::Duration};
use tracing::warn;

/// Overall configuration for spoon.
///
/// This is the root data structure for spoon configuration. Most runs use
/// [`run_settings`](Self::run_settings) to combine it with the packages under test.
#[derive(Clone, Debug)]
pub struct SpoonConfig {
    workspace_root: Utf8PathBuf,
    inner: SpoonConfigImpl,
}

impl SpoonConfig {
    /// The default location of the config within the project: `.config/spoon.toml`.
    pub const CONFIG_PATH: &'static str = ".config/spoon.toml";

    /// Contains the default config as a TOML file.
    ///
    /// Repository-specific configuration is layered on top of the default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../../default-config.toml");

    /// Reads the spoon config from the given file, or if not specified from
    /// `.config/spoon.toml` in the workspace root.
    ///
    /// Unknown keys are reported as warnings.
    pub fn from_sources(
        workspace_root: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        let workspace_root = workspace_root.into();
        let (config_file, source) = match config_file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = workspace_root.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        let builder = Self::make_default_config().add_source(source);
        let (inner, unknown) = Self::build_and_deserialize_config(&builder)
            .map_err(|error| ConfigParseError::new(&config_file, error))?;
        if !unknown.is_empty() {
            warn!(
                "ignoring unknown configuration keys in `{config_file}`: {}",
                unknown.iter().join(", ")
            );
        }

        Ok(Self {
            workspace_root,
            inner,
        })
    }

    /// Returns the default spoon config.
    #[cfg(test)]
    pub(crate) fn default_config(workspace_root: impl Into<Utf8PathBuf>) -> Self {
        let (inner, unknown) = Self::build_and_deserialize_config(&Self::make_default_config())
            .expect("default config is always valid");
        assert!(
            unknown.is_empty(),
            "default config should not have unknown keys: {unknown:?}"
        );
        Self {
            workspace_root: workspace_root.into(),
            inner,
        }
    }

    /// Returns the workspace root that relative paths are resolved against.
    pub fn workspace_root(&self) -> &Utf8Path {
        &self.workspace_root
    }

    /// Returns the configured run title.
    pub fn title(&self) -> &str {
        &self.inner.title
    }

    /// Returns the output directory, resolved against the workspace root.
    pub fn output_dir(&self) -> Utf8PathBuf {
        self.workspace_root.join(&self.inner.output_dir)
    }

    /// Returns true if debug mode is enabled.
    pub fn debug(&self) -> bool {
        self.inner.debug
    }

    /// Returns the maximum time a device may go without reporting a test event.
    pub fn max_silence(&self) -> Duration {
        self.inner.max_silence
    }

    /// Returns the configured test size filter.
    pub fn test_size(&self) -> Option<TestSize> {
        self.inner.test_size
    }

    /// Returns the GIF settings.
    pub fn gif(&self) -> GifSettings {
        GifSettings {
            enabled: self.inner.gif.enabled,
            frame_delay: self.inner.gif.frame_delay,
        }
    }

    /// Returns the `adb` binary to use.
    ///
    /// In order of precedence: the configured path, `platform-tools/adb` inside the configured
    /// SDK, and finally plain `adb` looked up on `PATH`.
    pub fn adb_path(&self) -> Utf8PathBuf {
        match (&self.inner.adb.path, &self.inner.adb.sdk) {
            (Some(path), _) => self.workspace_root.join(path),
            (None, Some(sdk)) => self
                .workspace_root
                .join(sdk)
                .join("platform-tools")
                .join("adb"),
            (None, None) => Utf8PathBuf::from("adb"),
        }
    }

    /// Combines this configuration with the packages under test.
    pub fn run_settings(&self, artifacts: RunArtifacts) -> RunSettings {
        let inner = &self.inner;
        RunSettings {
            title: inner.title.clone(),
            output_dir: self.output_dir(),
            test_runner: artifacts
                .test_runner
                .unwrap_or_else(|| inner.instrumentation.test_runner.clone()),
            app_apk: artifacts.app_apk,
            test_apk: artifacts.test_apk,
            app_package: artifacts.app_package,
            instrumentation_package: artifacts.instrumentation_package,
            test_size: inner.test_size,
            allow_downgrade: inner.allow_downgrade,
            fail_if_no_device: inner.fail_if_no_device,
            max_silence: inner.max_silence,
            keep_work_dir: inner.keep_work_dir,
            debug: inner.debug,
            gif: self.gif(),
            device_concurrency: inner.device_concurrency,
        }
    }

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<(SpoonConfigImpl, BTreeSet<String>), config::ConfigError> {
        let config = builder.build_cloned()?;

        let mut ignored = BTreeSet::new();
        let mut cb = |path: serde_ignored::Path| {
            ignored.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
        let config = SpoonConfigImpl::deserialize(ignored_de)?;

        Ok((config, ignored))
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct SpoonConfigImpl {
    title: String,
    output_dir: Utf8PathBuf,
    debug: bool,
    allow_downgrade: bool,
    fail_if_no_device: bool,
    #[serde(with = "humantime_serde")]
    max_silence: Duration,
    keep_work_dir: bool,
    #[serde(default)]
    test_size: Option<TestSize>,
    #[serde(default)]
    device_concurrency: Option<NonZeroUsize>,
    gif: GifConfig,
    adb: AdbConfig,
    instrumentation: InstrumentationConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct GifConfig {
    enabled: bool,
    #[serde(with = "humantime_serde")]
    frame_delay: Duration,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct AdbConfig {
    #[serde(default)]
    path: Option<Utf8PathBuf>,
    #[serde(default)]
    sdk: Option<Utf8PathBuf>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct InstrumentationConfig {
    test_runner: String,
}
