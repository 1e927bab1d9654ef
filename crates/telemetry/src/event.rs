// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use chrono::{DateTime, Utc};
use harness_core::json::CanonicalJson;
use harness_core::telemetry_model::{StatusHint, TelemetrySource};
use serde::{Deserialize, Serialize};

/// Uniform event produced by both OTLP ingest and history-file tailing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub source: TelemetrySource,
    pub observed_at: DateTime<Utc>,
    pub event_name: Option<String>,
    pub severity: Option<String>,
    pub summary: Option<String>,
    pub provider_thread_id: Option<String>,
    pub status_hint: Option<StatusHint>,
    pub payload: CanonicalJson,
}

/// The one OTLP metric name treated as eligible for a telemetry-driven
/// turn completion, regardless of what `derive_status_hint`'s generic
/// substring match would otherwise conclude from the name alone.
pub const TURN_DURATION_METRIC: &str = "codex.turn.e2e_duration_ms";

/// Key name variants scanned by the `providerThreadId` recovery rule:
/// `{thread,session,conversation}[-_]?id`, case-insensitive.
pub const THREAD_ID_KEYS: &[&str] = &[
    "threadid", "thread_id", "thread-id", "sessionid", "session_id", "session-id",
    "conversationid", "conversation_id", "conversation-id",
];

/// Recursively recover a provider thread id from a payload,:
/// max depth 4, first non-empty match wins.
pub fn recover_provider_thread_id(payload: &CanonicalJson) -> Option<String> {
    payload.find_string_key_ci(THREAD_ID_KEYS, 4)
}

/// Case-insensitive substring lookup over event name and summary, in the
/// documented priority order. Checked needs-input first, then completed,
/// then running; the first matching bucket wins.
pub fn derive_status_hint(event_name: Option<&str>, summary: Option<&str>) -> Option<StatusHint> {
    let haystack: String = [event_name, summary]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    if haystack.is_empty() {
        return None;
    }
    if haystack.contains("needs-input") || haystack.contains("approval denied") {
        return Some(StatusHint::NeedsInput);
    }
    if haystack.contains("turn-complete")
        || haystack.contains("response.completed")
        || haystack.contains("completed")
    {
        return Some(StatusHint::Completed);
    }
    if haystack.contains("user_prompt")
        || haystack.contains("api_request")
        || haystack.contains("response.created")
    {
        return Some(StatusHint::Running);
    }
    None
}

impl TelemetryEvent {
    /// `sha1(source|sessionId|providerThreadId|eventName|observedAt|canonical(payload))`,
    /// used to deduplicate re-ingested events.
    pub fn fingerprint(&self, session_id: &str) -> String {
        let source = match self.source {
            TelemetrySource::OtlpLog => "otlp-log",
            TelemetrySource::OtlpMetric => "otlp-metric",
            TelemetrySource::OtlpTrace => "otlp-trace",
            TelemetrySource::History => "history",
        };
        let thread_id = self.provider_thread_id.as_deref().unwrap_or("");
        let event_name = self.event_name.as_deref().unwrap_or("");
        let observed_at = self.observed_at.to_rfc3339();
        let canonical_payload = self.payload.canonicalize();
        harness_core::json::sha1_fingerprint(&[
            source,
            session_id,
            thread_id,
            event_name,
            &observed_at,
            &canonical_payload,
        ])
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
