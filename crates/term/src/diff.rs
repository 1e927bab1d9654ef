// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Snapshot Differential Runner: deterministically replays a scripted
//! sequence of `{output, resize}` steps against a blank [`Screen`] and
//! compares checkpoint frame hashes against an expected value, optionally
//! field-diffing the full frame when one is supplied.
//!
//! This is a reusable library entry point rather than a test-only helper:
//! an operator tool calls [`run_scenario`] directly, not only `#[test]`
//! functions.

use crate::screen::{Screen, ScreenSnapshot};
use serde::{Deserialize, Serialize};

/// One step in a scripted replay: either raw bytes fed to the oracle, or a
/// resize of its extent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Step {
    Output(Vec<u8>),
    Resize { cols: u16, rows: u16 },
}

/// Expected outcome after a given step index (0-based, inclusive of that
/// step having been applied).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub after_step: usize,
    #[serde(rename = "directFrameHash")]
    pub direct_frame_hash: String,
    #[serde(rename = "directFrame")]
    pub direct_frame: Option<ScreenSnapshot>,
}

/// A scripted scenario: an initial extent, a sequence of steps, and the
/// checkpoints to verify against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub cols: u16,
    pub rows: u16,
    pub steps: Vec<Step>,
    pub checkpoints: Vec<Checkpoint>,
}

/// A single field difference between an actual and expected frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDiff {
    pub field: String,
    pub expected: String,
    pub actual: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointResult {
    pub after_step: usize,
    pub pass: bool,
    pub actual_frame_hash: String,
    pub diff: Option<Vec<FieldDiff>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub pass: bool,
    pub checkpoints: Vec<CheckpointResult>,
}

/// Replay `scenario.steps` from a blank `(cols, rows)` oracle, comparing
/// the oracle frame hash against each `checkpoints` entry whose
/// `after_step` matches the step just applied.
pub fn run_scenario(scenario: &Scenario) -> ScenarioResult {
    let mut screen = Screen::new(scenario.cols, scenario.rows);
    let mut results = Vec::new();

    for (index, step) in scenario.steps.iter().enumerate() {
        match step {
            Step::Output(bytes) => screen.feed(bytes),
            Step::Resize { cols, rows } => screen.resize(*cols, *rows),
        }

        for checkpoint in scenario.checkpoints.iter().filter(|c| c.after_step == index) {
            let actual = screen.snapshot();
            let pass = actual.frame_hash == checkpoint.direct_frame_hash;
            let diff = checkpoint
                .direct_frame
                .as_ref()
                .map(|expected| field_diff(expected, &actual));
            results.push(CheckpointResult {
                after_step: index,
                pass,
                actual_frame_hash: actual.frame_hash,
                diff,
            });
        }
    }

    let pass = results.iter().all(|r| r.pass);
    ScenarioResult { pass, checkpoints: results }
}

fn field_diff(expected: &ScreenSnapshot, actual: &ScreenSnapshot) -> Vec<FieldDiff> {
    let mut diffs = Vec::new();
    if expected.lines != actual.lines {
        diffs.push(FieldDiff {
            field: "lines".to_string(),
            expected: expected.lines.join("\\n"),
            actual: actual.lines.join("\\n"),
        });
    }
    if expected.cols != actual.cols || expected.rows != actual.rows {
        diffs.push(FieldDiff {
            field: "dimensions".to_string(),
            expected: format!("{}x{}", expected.cols, expected.rows),
            actual: format!("{}x{}", actual.cols, actual.rows),
        });
    }
    if expected.active_screen != actual.active_screen {
        diffs.push(FieldDiff {
            field: "activeScreen".to_string(),
            expected: format!("{:?}", expected.active_screen),
            actual: format!("{:?}", actual.active_screen),
        });
    }
    if expected.cursor != actual.cursor {
        diffs.push(FieldDiff {
            field: "cursor".to_string(),
            expected: format!("{:?}", expected.cursor),
            actual: format!("{:?}", actual.cursor),
        });
    }
    diffs
}

#[cfg(test)]
#[path = "diff_tests.rs"]
mod tests;
