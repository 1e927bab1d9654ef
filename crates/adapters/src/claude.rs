// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Claude adapter. The Claude Code hook config wires `UserPromptSubmit`
//! to emit `{"event":"user_prompt_submit","data":<hook payload>}`; this
//! adapter consumes the notify-tail decoding of that same hook event.

use chrono::{DateTime, Utc};
use harness_core::json::CanonicalJson;

use crate::types::{CaptureSource, Confidence, SessionPromptRecord};

const HOOK_EVENT_NAME: &str = "UserPromptSubmit";

/// Recognize a Claude `UserPromptSubmit` notify payload and extract its
/// prompt text.
pub fn extract_prompt_from_notify(
    payload: &CanonicalJson,
    observed_at: DateTime<Utc>,
) -> Option<SessionPromptRecord> {
    let map = payload.as_map()?;
    let hook_event_name = map.get("hook_event_name").and_then(|v| v.as_str())?;
    if hook_event_name != HOOK_EVENT_NAME {
        return None;
    }
    let text = map.get("prompt").and_then(|v| v.as_str()).map(str::to_string);
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
#[path = "claude_tests.rs"]
mod tests;
