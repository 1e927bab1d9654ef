// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent Adapter Layer: per-agent-type plumbing that maps agent-specific
//! notify/telemetry shapes onto the uniform [`SessionPromptRecord`], and
//! composes PTY start args with resume semantics where the agent
//! supports it.

pub mod claude;
pub mod codex;
pub mod cursor;
pub mod types;

use chrono::{DateTime, Utc};
use harness_core::json::CanonicalJson;
use harness_core::model::AgentType;
use harness_telemetry::TelemetryEvent;

pub use types::{CaptureSource, Confidence, SessionPromptRecord};

/// `ComposeStartArgs(baseArgs, adapterState) -> args`. Only
/// Codex currently has resume semantics; every other agent type passes
/// `base_args` through unchanged.
pub fn compose_start_args(
    agent_type: AgentType,
    base_args: &[String],
    adapter_state: &CanonicalJson,
) -> Vec<String> {
    match agent_type {
        AgentType::Codex => codex::compose_start_args(base_args, adapter_state),
        AgentType::Claude | AgentType::Cursor | AgentType::Terminal | AgentType::Critique => {
            base_args.to_vec()
        }
    }
}

/// `ExtractPromptFromNotify(payload)`.
pub fn extract_prompt_from_notify(
    agent_type: AgentType,
    payload: &CanonicalJson,
    observed_at: DateTime<Utc>,
) -> Option<SessionPromptRecord> {
    match agent_type {
        AgentType::Claude => claude::extract_prompt_from_notify(payload, observed_at),
        AgentType::Cursor => cursor::extract_prompt_from_notify(payload, observed_at),
        AgentType::Codex | AgentType::Terminal | AgentType::Critique => None,
    }
}

/// `ExtractPromptFromTelemetry(event)`. Only Codex currently
/// surfaces prompts through telemetry/history rather than a notify hook.
pub fn extract_prompt_from_telemetry(
    agent_type: AgentType,
    event: &TelemetryEvent,
) -> Option<SessionPromptRecord> {
    match agent_type {
        AgentType::Codex => codex::extract_prompt_from_telemetry(event),
        AgentType::Claude | AgentType::Cursor | AgentType::Terminal | AgentType::Critique => None,
    }
}

/// Per-agent "running-eligible" telemetry event names: a
/// `needs-input|completed -> running` transition only fires when the
/// triggering event's name is in this set for the session's agent type.
/// Traces and history are never eligible regardless of name; this set
/// only governs the name check for otherwise-eligible sources.
pub fn running_eligible_event_names(agent_type: AgentType) -> &'static [&'static str] {
    match agent_type {
        AgentType::Codex => &["codex.user_prompt", "codex.api_request"],
        AgentType::Claude => &["UserPromptSubmit"],
        AgentType::Cursor => &["beforeSubmitPrompt"],
        AgentType::Terminal | AgentType::Critique => &[],
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
