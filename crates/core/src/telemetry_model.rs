// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};

/// Where a `TelemetryEvent` originated. Shared between `harness-core`
/// (so [`crate::model::TelemetrySummary`] can reference it without a
/// dependency on the ingest crate) and `harness-telemetry`, which owns the
/// parsing logic that produces these values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TelemetrySource {
    OtlpLog,
    OtlpMetric,
    OtlpTrace,
    History,
}

/// `running | needs-input | completed`, the status hint a telemetry or
/// notify record can carry toward the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatusHint {
    Running,
    NeedsInput,
    Completed,
}
