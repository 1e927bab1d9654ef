// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-agent status projection: derives a human-readable
//! `StatusModel` from runtime status plus telemetry, ignoring
//! out-of-order events whose `observedAt` precedes the model's current
//! `lastKnownWorkAt`.

use harness_core::model::{RuntimeStatus, StatusModel};
use harness_telemetry::TelemetryEvent;

/// Reduce one telemetry event into an updated `StatusModel`, or `None`
/// when the event is out of order and should be ignored. This never
/// produces an explicit "clear" — once a session has a `StatusModel` it
/// only ever replaces it with a newer one, never unsets it.
pub fn reduce(
    current: Option<&StatusModel>,
    runtime_status: RuntimeStatus,
    telemetry: &TelemetryEvent,
) -> Option<StatusModel> {
    if let Some(existing) = current {
        if let Some(last_at) = existing.last_known_work_at {
            if telemetry.observed_at < last_at {
                return None;
            }
        }
    }
    let active = matches!(runtime_status, RuntimeStatus::Running | RuntimeStatus::NeedsInput);
    let last_known_work = telemetry.summary.clone().or_else(|| telemetry.event_name.clone());
    Some(StatusModel {
        active,
        last_known_work,
        last_known_work_at: Some(telemetry.observed_at),
    })
}

#[cfg(test)]
#[path = "status_model_tests.rs"]
mod tests;
