// Copyright (c) The spoon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::DeviceResult;
use crate::{aggregator, errors::DuplicateDeviceResult};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::{BTreeMap, btree_map::Entry};

/// The sealed outcome of a run across every device.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunSummary {
    title: String,
    started_at: DateTime<Local>,
    ended_at: DateTime<Local>,
    results: BTreeMap<String, DeviceResult>,
    success: bool,
}

impl RunSummary {
    /// Returns the run title.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Returns the time the run started.
    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    /// Returns the time the run was sealed.
    pub fn ended_at(&self) -> DateTime<Local> {
        self.ended_at
    }

    /// Returns per-device results, keyed by sanitized device serial.
    pub fn results(&self) -> &BTreeMap<String, DeviceResult> {
        &self.results
    }

    /// Returns the overall verdict, as computed when the summary was sealed.
    pub fn success(&self) -> bool {
        self.success
    }
}

/// Accumulates per-device results into a [`RunSummary`].
#[derive(Debug)]
pub struct RunSummaryBuilder {
    title: String,
    started_at: DateTime<Local>,
    results: BTreeMap<String, DeviceResult>,
}

impl RunSummaryBuilder {
    /// Creates a new builder for a run that started at the given time.
    pub fn new(title: impl Into<String>, started_at: DateTime<Local>) -> Self {
        Self {
            title: title.into(),
            started_at,
            results: BTreeMap::new(),
        }
    }

    /// Returns true if a result was already added under `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.results.contains_key(key)
    }

    /// Adds a device result. Each key may only be written once.
    pub fn add_result(
        &mut self,
        key: impl Into<String>,
        result: DeviceResult,
    ) -> Result<(), DuplicateDeviceResult> {
        match self.results.entry(key.into()) {
            Entry::Vacant(entry) => {
                entry.insert(result);
                Ok(())
            }
            Entry::Occupied(entry) => Err(DuplicateDeviceResult::new(entry.key().clone())),
        }
    }

    /// Seals the summary, computing the overall verdict.
    pub fn build(self, ended_at: DateTime<Local>) -> RunSummary {
        let success = aggregator::compute_success_for(self.results.values());
        RunSummary {
            title: self.title,
            started_at: self.started_at,
            ended_at,
            results: self.results,
            success,
        }
    }
}
