// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pure session state-machine transition rules. Kept free of
//! any I/O or shared state so every rule is a plain function from
//! `(current status, trigger)` to `Option<next status>`, with no lock
//! or broadcast side effects in the decision table itself.

use harness_core::model::RuntimeStatus;
use harness_core::telemetry_model::{StatusHint, TelemetrySource};
pub use harness_telemetry::TURN_DURATION_METRIC;

/// A telemetry-derived signal being considered for a transition.
pub struct TelemetryTrigger<'a> {
    pub hint: StatusHint,
    pub source: TelemetrySource,
    pub event_name: Option<&'a str>,
    pub summary_present: bool,
}

/// `running -> needs-input` and `running|needs-input -> completed` and
/// `needs-input|completed -> running`,`None` when
/// the current status is terminal (`exited` never leaves) or when no rule
/// matches.
pub fn apply_telemetry(
    current: RuntimeStatus,
    trigger: &TelemetryTrigger,
    running_eligible_names: &[&str],
) -> Option<RuntimeStatus> {
    if current.is_terminal() {
        return None;
    }
    use RuntimeStatus::*;
    match (current, trigger.hint) {
        (Running, StatusHint::NeedsInput) if telemetry_source_eligible(trigger.source) => {
            Some(NeedsInput)
        }
        (Running | NeedsInput, StatusHint::Completed) if completion_eligible(trigger) => {
            Some(Completed)
        }
        (NeedsInput | Completed, StatusHint::Running)
            if telemetry_source_eligible(trigger.source) && running_name_eligible(trigger, running_eligible_names) =>
        {
            Some(Running)
        }
        _ => None,
    }
}

/// Only `otlp-log` and `otlp-metric` ever drive a status-hint transition;
/// `otlp-trace` and `history` never do regardless of event name.
fn telemetry_source_eligible(source: TelemetrySource) -> bool {
    matches!(source, TelemetrySource::OtlpLog | TelemetrySource::OtlpMetric)
}

fn running_name_eligible(trigger: &TelemetryTrigger, running_eligible_names: &[&str]) -> bool {
    trigger.event_name.is_some_and(|name| running_eligible_names.contains(&name))
}

/// Completion eligibility: metric `codex.turn.e2e_duration_ms`, or a log
/// record whose `summary` is present (a "completed-summary" log).
fn completion_eligible(trigger: &TelemetryTrigger) -> bool {
    match trigger.source {
        TelemetrySource::OtlpMetric => trigger.event_name == Some(TURN_DURATION_METRIC),
        TelemetrySource::OtlpLog => trigger.summary_present,
        TelemetrySource::OtlpTrace | TelemetrySource::History => false,
    }
}

/// NotifyTail `AttentionRequired`: `running|needs-input -> needs-input`.
pub fn apply_notify_attention(current: RuntimeStatus) -> Option<RuntimeStatus> {
    if current.is_terminal() {
        None
    } else {
        Some(RuntimeStatus::NeedsInput)
    }
}

/// NotifyTail `TurnCompleted`: `running|needs-input -> completed`.
pub fn apply_notify_turn_completed(current: RuntimeStatus) -> Option<RuntimeStatus> {
    use RuntimeStatus::*;
    matches!(current, Running | NeedsInput).then_some(Completed)
}

/// `session.respond` while `needs-input`: writes to the PTY and
/// transitions to `running`. Any other status rejects the command
/// upstream before this is even consulted.
pub fn apply_respond(current: RuntimeStatus) -> Option<RuntimeStatus> {
    (current == RuntimeStatus::NeedsInput).then_some(RuntimeStatus::Running)
}

/// PTY exit: terminal from any status.
pub fn apply_exit() -> RuntimeStatus {
    RuntimeStatus::Exited
}

#[cfg(test)]
#[path = "state_machine_tests.rs"]
mod tests;
