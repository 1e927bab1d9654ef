// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Codex adapter. Reads `resumeSessionId` straight out of the persisted
//! `adapterState` and splices it into the next invocation's argv, since
//! Codex's own resume protocol takes the id as an explicit CLI argument
//! rather than requiring log discovery.

use chrono::{DateTime, Utc};
use harness_core::json::CanonicalJson;
use harness_telemetry::TelemetryEvent;

use crate::types::{CaptureSource, Confidence, SessionPromptRecord};

/// Subcommands that already select their own mode of operation; `resume`
/// is never prepended in front of one of these.
const RESERVED_SUBCOMMANDS: &[&str] =
    &["exec", "review", "login", "logout", "resume", "fork", "mcp", "completion", "apply"];

/// `codex.user_prompt` or bare `user_prompt`: the event names this adapter
/// recognizes as carrying prompt text, whether they arrive via telemetry
/// logs or history tailing.
const PROMPT_EVENT_NAMES: &[&str] = &["codex.user_prompt", "user_prompt"];

/// Prepend `["resume", resumeSessionId]` to `base_args` when `adapterState`
/// names a prior session and `base_args` doesn't already pick a reserved
/// subcommand.
pub fn compose_start_args(base_args: &[String], adapter_state: &CanonicalJson) -> Vec<String> {
    let Some(resume_id) = resume_session_id(adapter_state) else {
        return base_args.to_vec();
    };
    if base_args.first().is_some_and(|first| RESERVED_SUBCOMMANDS.contains(&first.as_str())) {
        return base_args.to_vec();
    }
    let mut args = vec!["resume".to_string(), resume_id];
    args.extend(base_args.iter().cloned());
    args
}

/// `adapterState.codex.resumeSessionId`, falling back to the legacy
/// `adapterState.codex.threadId` key.
fn resume_session_id(adapter_state: &CanonicalJson) -> Option<String> {
    let codex = adapter_state.as_map()?.get("codex")?.as_object()?;
    codex
        .get("resumeSessionId")
        .or_else(|| codex.get("threadId"))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Codex prompts arrive only via telemetry (logs or history), never via
/// notify — Codex has no `UserPromptSubmit`-style hook event.
pub fn extract_prompt_from_telemetry(event: &TelemetryEvent) -> Option<SessionPromptRecord> {
    let event_name = event.event_name.as_deref()?;
    if !PROMPT_EVENT_NAMES.contains(&event_name) {
        return None;
    }
    let text = event.summary.clone().or_else(|| prompt_text_from_payload(&event.payload));
    Some(build_record(text, event_name, event.observed_at, &event.payload))
}

fn prompt_text_from_payload(payload: &CanonicalJson) -> Option<String> {
    payload.as_map()?.get("text").and_then(|v| v.as_str()).map(str::to_string)
}

fn build_record(
    text: Option<String>,
    event_name: &str,
    observed_at: DateTime<Utc>,
    payload: &CanonicalJson,
) -> SessionPromptRecord {
    let confidence = if text.is_some() { Confidence::High } else { Confidence::Low };
    SessionPromptRecord::new(
        text,
        confidence,
        CaptureSource::Telemetry,
        event_name,
        observed_at,
        &payload.canonicalize(),
    )
}

#[cfg(test)]
#[path = "codex_tests.rs"]
mod tests;
