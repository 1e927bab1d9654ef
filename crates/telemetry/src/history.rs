// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! History JSONL ingest. Each line is a free-form JSON record; event
//! name, summary and timestamp are recovered by scanning a small set of
//! conventional key names rather than assuming one fixed schema, since
//! `history` records are agent specific.

use chrono::{DateTime, Utc};
use harness_core::json::CanonicalJson;
use harness_core::telemetry_model::TelemetrySource;
use serde_json::Value;

use crate::event::{derive_status_hint, recover_provider_thread_id, TelemetryEvent};

const EVENT_NAME_KEYS: &[&str] = &["type", "event", "eventname", "event_name"];
const SUMMARY_KEYS: &[&str] = &["summary", "message", "text"];
const TIMESTAMP_KEYS: &[&str] = &["timestamp", "ts", "time"];

/// Parse one line of a history JSONL file into a [`TelemetryEvent`].
/// Malformed JSON is dropped (returns `None`) without a fatal error, the
/// same discipline the Notify Tail applies to its own malformed lines.
pub fn parse_history_line(line: &str, ingest_now: DateTime<Utc>) -> Option<TelemetryEvent> {
    let value: Value = serde_json::from_str(line).ok()?;
    if !value.is_object() {
        return None;
    }
    let record = CanonicalJson(value);
    let event_name = record.find_string_key_ci(EVENT_NAME_KEYS, 1);
    let summary = record.find_string_key_ci(SUMMARY_KEYS, 1);
    let observed_at = record
        .find_string_key_ci(TIMESTAMP_KEYS, 1)
        .and_then(|s| parse_timestamp(&s))
        .unwrap_or(ingest_now);

    let provider_thread_id = recover_provider_thread_id(&record);
    let status_hint = derive_status_hint(event_name.as_deref(), summary.as_deref());

    Some(TelemetryEvent {
        source: TelemetrySource::History,
        observed_at,
        event_name,
        severity: None,
        summary,
        provider_thread_id,
        status_hint,
        payload: record,
    })
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    raw.parse::<i64>().ok().and_then(|epoch_ms| DateTime::from_timestamp_millis(epoch_ms))
}

#[cfg(test)]
#[path = "history_tests.rs"]
mod tests;
