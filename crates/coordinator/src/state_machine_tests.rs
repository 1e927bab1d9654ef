// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use harness_core::model::RuntimeStatus;

const RUNNING_ELIGIBLE: &[&str] = &["codex.user_prompt"];

#[test]
fn running_to_needs_input_from_log_or_metric_only() {
    let trigger = TelemetryTrigger {
        hint: StatusHint::NeedsInput,
        source: TelemetrySource::OtlpLog,
        event_name: None,
        summary_present: false,
    };
    assert_eq!(apply_telemetry(RuntimeStatus::Running, &trigger, RUNNING_ELIGIBLE), Some(RuntimeStatus::NeedsInput));

    let trace_trigger = TelemetryTrigger { source: TelemetrySource::OtlpTrace, ..trigger };
    assert_eq!(apply_telemetry(RuntimeStatus::Running, &trace_trigger, RUNNING_ELIGIBLE), None);
}

#[test]
fn completion_via_turn_duration_metric() {
    let trigger = TelemetryTrigger {
        hint: StatusHint::Completed,
        source: TelemetrySource::OtlpMetric,
        event_name: Some(TURN_DURATION_METRIC),
        summary_present: false,
    };
    assert_eq!(apply_telemetry(RuntimeStatus::Running, &trigger, RUNNING_ELIGIBLE), Some(RuntimeStatus::Completed));
}

#[test]
fn unrelated_metric_does_not_complete() {
    let trigger = TelemetryTrigger {
        hint: StatusHint::Completed,
        source: TelemetrySource::OtlpMetric,
        event_name: Some("some.other.metric"),
        summary_present: false,
    };
    assert_eq!(apply_telemetry(RuntimeStatus::Running, &trigger, RUNNING_ELIGIBLE), None);
}

#[test]
fn trace_never_revives_to_running() {
    let trigger = TelemetryTrigger {
        hint: StatusHint::Running,
        source: TelemetrySource::OtlpTrace,
        event_name: Some("codex.user_prompt"),
        summary_present: false,
    };
    assert_eq!(apply_telemetry(RuntimeStatus::Completed, &trigger, RUNNING_ELIGIBLE), None);
}

#[test]
fn ineligible_event_name_does_not_revive_to_running() {
    let trigger = TelemetryTrigger {
        hint: StatusHint::Running,
        source: TelemetrySource::OtlpLog,
        event_name: Some("codex.some_other_event"),
        summary_present: false,
    };
    assert_eq!(apply_telemetry(RuntimeStatus::NeedsInput, &trigger, RUNNING_ELIGIBLE), None);
}

#[test]
fn eligible_event_name_revives_to_running() {
    let trigger = TelemetryTrigger {
        hint: StatusHint::Running,
        source: TelemetrySource::OtlpLog,
        event_name: Some("codex.user_prompt"),
        summary_present: false,
    };
    assert_eq!(apply_telemetry(RuntimeStatus::NeedsInput, &trigger, RUNNING_ELIGIBLE), Some(RuntimeStatus::Running));
    assert_eq!(apply_telemetry(RuntimeStatus::Completed, &trigger, RUNNING_ELIGIBLE), Some(RuntimeStatus::Running));
}

#[test]
fn exited_is_terminal_for_telemetry() {
    let trigger = TelemetryTrigger {
        hint: StatusHint::Running,
        source: TelemetrySource::OtlpLog,
        event_name: Some("codex.user_prompt"),
        summary_present: false,
    };
    assert_eq!(apply_telemetry(RuntimeStatus::Exited, &trigger, RUNNING_ELIGIBLE), None);
}

#[test]
fn notify_attention_and_turn_completed() {
    assert_eq!(apply_notify_attention(RuntimeStatus::Running), Some(RuntimeStatus::NeedsInput));
    assert_eq!(apply_notify_attention(RuntimeStatus::Exited), None);
    assert_eq!(apply_notify_turn_completed(RuntimeStatus::NeedsInput), Some(RuntimeStatus::Completed));
    assert_eq!(apply_notify_turn_completed(RuntimeStatus::Completed), None);
}

#[test]
fn respond_only_applies_from_needs_input() {
    assert_eq!(apply_respond(RuntimeStatus::NeedsInput), Some(RuntimeStatus::Running));
    assert_eq!(apply_respond(RuntimeStatus::Running), None);
}

#[test]
fn exit_is_always_terminal() {
    assert_eq!(apply_exit(), RuntimeStatus::Exited);
}
