// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cursor adapter: recognizes the `beforeSubmitPrompt` notify event,
//! mirroring the Claude adapter's hook-event shape since Cursor
//! publishes through the same kind of notify side channel.

use chrono::{DateTime, Utc};
use harness_core::json::CanonicalJson;

use crate::types::{CaptureSource, Confidence, SessionPromptRecord};

const HOOK_EVENT_NAME: &str = "beforeSubmitPrompt";

pub fn extract_prompt_from_notify(
    payload: &CanonicalJson,
    observed_at: DateTime<Utc>,
) -> Option<SessionPromptRecord> {
    let map = payload.as_map()?;
    let event_name = map
        .get("hook_event_name")
        .or_else(|| map.get("type"))
        .and_then(|v| v.as_str())?;
    if event_name != HOOK_EVENT_NAME {
        return None;
    }
    let text = map
        .get("prompt")
        .or_else(|| map.get("text"))
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let confidence = if text.is_some() { Confidence::High } else { Confidence::Low };
    Some(SessionPromptRecord::new(
        text,
        confidence,
        CaptureSource::Notify,
        HOOK_EVENT_NAME,
        observed_at,
        &payload.canonicalize(),
    ))
}

#[cfg(test)]
#[path = "cursor_tests.rs"]
mod tests;
