// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! OTLP JSON ingest. Parses `resourceLogs`/`resourceMetrics`/
//! `resourceSpans` payloads by walking `serde_json::Value` directly
//! rather than depending on `opentelemetry-proto`: the wire format here
//! is the OTLP **JSON** encoding, not protobuf, so a hand-walked reader
//! is the right tool for it.

use chrono::{DateTime, Utc};
use harness_core::json::CanonicalJson;
use harness_core::telemetry_model::{StatusHint, TelemetrySource};
use serde_json::Value;

use crate::event::{derive_status_hint, recover_provider_thread_id, TelemetryEvent, TURN_DURATION_METRIC};

/// Attribute key variants consulted for an explicit event name before
/// falling back to the record's own name/body.
const EVENT_NAME_KEYS: &[&str] = &["event.name", "event_name", "eventname"];

/// Parse a single OTLP JSON payload, dispatching on whichever of
/// `resourceLogs`/`resourceMetrics`/`resourceSpans` top-level keys are
/// present (a payload may legitimately carry more than one).
pub fn ingest_otlp_payload(payload: &Value, ingest_now: DateTime<Utc>) -> Vec<TelemetryEvent> {
    let mut events = Vec::new();
    if let Some(resource_logs) = payload.get("resourceLogs").and_then(Value::as_array) {
        events.extend(ingest_resource_logs(resource_logs, ingest_now));
    }
    if let Some(resource_metrics) = payload.get("resourceMetrics").and_then(Value::as_array) {
        events.extend(ingest_resource_metrics(resource_metrics, ingest_now));
    }
    if let Some(resource_spans) = payload.get("resourceSpans").and_then(Value::as_array) {
        events.extend(ingest_resource_spans(resource_spans, ingest_now));
    }
    events
}

fn ingest_resource_logs(resource_logs: &[Value], now: DateTime<Utc>) -> Vec<TelemetryEvent> {
    let mut events = Vec::new();
    for resource in resource_logs {
        let Some(scope_logs) = resource.get("scopeLogs").and_then(Value::as_array) else { continue };
        for scope in scope_logs {
            let Some(records) = scope.get("logRecords").and_then(Value::as_array) else { continue };
            for record in records {
                let time = record
                    .get("timeUnixNano")
                    .or_else(|| record.get("observedTimeUnixNano"))
                    .and_then(parse_uint_flex);
                let severity = record.get("severityText").and_then(Value::as_str).map(str::to_string);
                let body = record.get("body").and_then(any_value_to_string);
                let attrs = record.get("attributes").and_then(Value::as_array);
                let event_name = attrs
                    .and_then(|a| attr_lookup(a, EVENT_NAME_KEYS))
                    .or_else(|| body.clone().filter(|b| !b.contains(' ')));
                events.push(build_event(
                    TelemetrySource::OtlpLog,
                    time,
                    event_name,
                    severity,
                    body,
                    record.clone(),
                    now,
                ));
            }
        }
    }
    events
}

fn ingest_resource_metrics(resource_metrics: &[Value], now: DateTime<Utc>) -> Vec<TelemetryEvent> {
    let mut events = Vec::new();
    for resource in resource_metrics {
        let Some(scope_metrics) = resource.get("scopeMetrics").and_then(Value::as_array) else { continue };
        for scope in scope_metrics {
            let Some(metrics) = scope.get("metrics").and_then(Value::as_array) else { continue };
            for metric in metrics {
                let name = metric.get("name").and_then(Value::as_str).map(str::to_string);
                let data_points = ["gauge", "sum", "histogram", "summary"]
                    .iter()
                    .find_map(|kind| metric.get(kind).and_then(|v| v.get("dataPoints")))
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                if data_points.is_empty() {
                    events.push(build_event(
                        TelemetrySource::OtlpMetric,
                        None,
                        name,
                        None,
                        None,
                        metric.clone(),
                        now,
                    ));
                    continue;
                }
                for point in &data_points {
                    let time = point.get("timeUnixNano").and_then(parse_uint_flex);
                    events.push(build_event(
                        TelemetrySource::OtlpMetric,
                        time,
                        name.clone(),
                        None,
                        None,
                        point.clone(),
                        now,
                    ));
                }
            }
        }
    }
    events
}

fn ingest_resource_spans(resource_spans: &[Value], now: DateTime<Utc>) -> Vec<TelemetryEvent> {
    let mut events = Vec::new();
    for resource in resource_spans {
        let Some(scope_spans) = resource.get("scopeSpans").and_then(Value::as_array) else { continue };
        for scope in scope_spans {
            let Some(spans) = scope.get("spans").and_then(Value::as_array) else { continue };
            for span in spans {
                let name = span.get("name").and_then(Value::as_str).map(str::to_string);
                let time = span.get("startTimeUnixNano").and_then(parse_uint_flex);
                events.push(build_event(
                    TelemetrySource::OtlpTrace,
                    time,
                    name,
                    None,
                    None,
                    span.clone(),
                    now,
                ));
            }
        }
    }
    events
}

fn build_event(
    source: TelemetrySource,
    time_unix_nanos: Option<u64>,
    event_name: Option<String>,
    severity: Option<String>,
    summary: Option<String>,
    payload: Value,
    ingest_now: DateTime<Utc>,
) -> TelemetryEvent {
    let observed_at = time_unix_nanos.and_then(nanos_to_datetime).unwrap_or(ingest_now);
    let payload = CanonicalJson(payload);
    let provider_thread_id = recover_provider_thread_id(&payload);
    // The turn-duration metric's name carries none of the substrings
    // `derive_status_hint` looks for, so it is special-cased ahead of the
    // generic lookup: this is the one metric the completion transition
    // is driven by.
    let status_hint = if matches!(source, TelemetrySource::OtlpMetric) && event_name.as_deref() == Some(TURN_DURATION_METRIC) {
        Some(StatusHint::Completed)
    } else {
        derive_status_hint(event_name.as_deref(), summary.as_deref())
    };
    TelemetryEvent {
        source,
        observed_at,
        event_name,
        severity,
        summary,
        provider_thread_id,
        status_hint,
        payload,
    }
}

/// OTLP JSON encodes 64-bit integers (including `timeUnixNano`) as
/// strings to avoid precision loss in JS number parsing; accept either
/// representation.
fn parse_uint_flex(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

fn nanos_to_datetime(nanos: u64) -> Option<DateTime<Utc>> {
    let secs = (nanos / 1_000_000_000) as i64;
    let subsec_nanos = (nanos % 1_000_000_000) as u32;
    DateTime::from_timestamp(secs, subsec_nanos)
}

/// An OTLP `AnyValue` reduced to its string form for the event fields we
/// surface; numeric/bool values are stringified, arrays/objects ignored.
fn any_value_to_string(value: &Value) -> Option<String> {
    if let Some(s) = value.get("stringValue").and_then(Value::as_str) {
        return Some(s.to_string());
    }
    if let Some(n) = value.get("intValue") {
        return Some(n.to_string());
    }
    if let Some(n) = value.get("doubleValue") {
        return Some(n.to_string());
    }
    if let Some(b) = value.get("boolValue") {
        return Some(b.to_string());
    }
    None
}

fn attr_lookup(attrs: &[Value], names: &[&str]) -> Option<String> {
    for attr in attrs {
        let Some(key) = attr.get("key").and_then(Value::as_str) else { continue };
        if names.iter().any(|n| key.eq_ignore_ascii_case(n)) {
            if let Some(value) = attr.get("value") {
                if let Some(s) = any_value_to_string(value) {
                    return Some(s);
                }
            }
        }
    }
    None
}

#[cfg(test)]
#[path = "otlp_tests.rs"]
mod tests;
