// Copyright (c) The spoon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{ScreenshotGroups, animation};
use crate::{
    errors::{DisplayErrorChain, GifError, ScreenshotError},
    helpers::plural,
    model::{DeviceResultBuilder, TestIdentity},
};
use camino::{Utf8Path, Utf8PathBuf};
use std::{collections::BTreeMap, fs, time::Duration};
use tracing::{debug, warn};

/// Settings for animated GIF synthesis.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct GifSettings {
    /// Whether to synthesize GIFs at all.
    pub enabled: bool,

    /// How long each frame is displayed.
    pub frame_delay: Duration,
}

impl Default for GifSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            frame_delay: Duration::from_millis(1500),
        }
    }
}

/// Counts of what happened while associating a device's screenshots.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct AssociationStats {
    /// Screenshots attached to a test result.
    pub attached: usize,

    /// Groups that didn't match any test result and were dropped.
    pub orphaned_groups: usize,

    /// Animated GIFs written.
    pub gifs: usize,
}

/// Binds a device's screenshots to its test results and derives animated GIFs from them.
#[derive(Clone, Debug)]
pub struct ScreenshotAssociator {
    serial: String,
    image_dir: Utf8PathBuf,
    gif: GifSettings,
}

impl ScreenshotAssociator {
    /// Creates a new associator writing into `image_dir`.
    pub fn new(serial: impl Into<String>, image_dir: impl Into<Utf8PathBuf>, gif: GifSettings) -> Self {
        Self {
            serial: serial.into(),
            image_dir: image_dir.into(),
            gif,
        }
    }

    /// Returns the directory screenshots are copied into.
    pub fn image_dir(&self) -> &Utf8Path {
        &self.image_dir
    }

    /// Copies every group into the image directory and attaches it, in capture order, to the
    /// matching test result.
    ///
    /// Groups are matched by their path-safe identity, since that's what they were staged
    /// under. Groups without a matching test result are dropped. Copy and GIF failures are
    /// logged and skipped; they never fail the device. GIFs are encoded on the blocking pool.
    pub async fn associate(
        &self,
        groups: ScreenshotGroups,
        device: &mut DeviceResultBuilder,
    ) -> AssociationStats {
        let mut stats = AssociationStats::default();

        let mut by_path: BTreeMap<TestIdentity, TestIdentity> = BTreeMap::new();
        for test in device.identities() {
            by_path
                .entry(test.to_path_safe())
                .or_insert_with(|| test.clone());
        }

        for (staged, files) in groups {
            let staged = staged.to_path_safe();
            let result = match by_path.get(&staged) {
                Some(test) => device.test_mut(test),
                None => None,
            };
            let Some(result) = result else {
                warn!(
                    serial = %self.serial,
                    test = %staged,
                    "dropping {} {} for a test with no result",
                    files.len(),
                    plural::screenshots_str(files.len()),
                );
                stats.orphaned_groups += 1;
                continue;
            };
            let test = result.identity().clone();

            let mut copied = Vec::with_capacity(files.len());
            for file in &files {
                match self.copy_into_place(&staged, file) {
                    Ok(dest) => copied.push(dest),
                    Err(error) => {
                        warn!(serial = %self.serial, %test, "{}", DisplayErrorChain::new(&error));
                    }
                }
            }
            for dest in &copied {
                result.add_screenshot(dest.clone());
            }
            stats.attached += copied.len();

            if self.gif.enabled && copied.len() >= 2 {
                let gif_path = self.gif_path(&staged);
                match self.encode_gif(copied, gif_path.clone()).await {
                    Ok(()) => {
                        debug!(serial = %self.serial, %test, path = %gif_path, "wrote animated GIF");
                        result.set_animated_gif(gif_path);
                        stats.gifs += 1;
                    }
                    Err(error) => {
                        warn!(
                            serial = %self.serial,
                            %test,
                            "failed to create animated GIF: {}",
                            DisplayErrorChain::new(&error),
                        );
                    }
                }
            }
        }

        stats
    }

    async fn encode_gif(
        &self,
        frames: Vec<Utf8PathBuf>,
        gif_path: Utf8PathBuf,
    ) -> Result<(), GifError> {
        let frame_delay = self.gif.frame_delay;
        let path = gif_path.clone();
        tokio::task::spawn_blocking(move || {
            animation::write_animated_gif(&frames, &path, frame_delay)
        })
        .await
        .map_err(|error| GifError::Task {
            path: gif_path,
            error,
        })?
    }

    /// `test` must already be path-safe.
    fn method_dir(&self, test: &TestIdentity) -> Utf8PathBuf {
        self.image_dir
            .join(test.class_name())
            .join(test.method_name())
    }

    /// `test` must already be path-safe.
    fn gif_path(&self, test: &TestIdentity) -> Utf8PathBuf {
        self.image_dir
            .join(test.class_name())
            .join(format!("{}.gif", test.method_name()))
    }

    fn copy_into_place(
        &self,
        test: &TestIdentity,
        file: &Utf8Path,
    ) -> Result<Utf8PathBuf, ScreenshotError> {
        let dir = self.method_dir(test);
        fs::create_dir_all(&dir).map_err(|error| ScreenshotError::CreateDir {
            path: dir.clone(),
            error,
        })?;
        let dest = dir.join(file.file_name().unwrap_or("screenshot.png"));
        fs::copy(file, &dest).map_err(|error| ScreenshotError::Copy {
            from: file.to_owned(),
            to: dest.clone(),
            error,
        })?;
        Ok(dest)
    }
}
