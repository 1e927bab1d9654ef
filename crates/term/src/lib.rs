// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Snapshot Oracle and Snapshot Differential Runner: a deterministic VT
//! screen grid backed by `avt`, plus a scripted replay harness that
//! checks a sequence of frame hashes against expected checkpoints.

pub mod diff;
pub mod screen;

pub use diff::{run_scenario, Checkpoint, CheckpointResult, FieldDiff, Scenario, ScenarioResult, Step};
pub use screen::{ActiveScreen, CursorPosition, Screen, ScreenSnapshot};
