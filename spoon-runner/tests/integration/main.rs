// Copyright (c) The spoon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Drives device runners and the fleet coordinator against scripted in-memory devices.

mod device;
mod fixtures;
mod fleet;
