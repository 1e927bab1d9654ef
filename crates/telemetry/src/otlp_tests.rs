use super::*;
use serde_json::json;

#[test]
fn resource_logs_produce_one_event_per_log_record() {
    let payload = json!({
        "resourceLogs": [{
            "scopeLogs": [{
                "logRecords": [{
                    "timeUnixNano": "1700000000000000000",
                    "severityText": "INFO",
                    "body": {"stringValue": "codex.user_prompt"},
                    "attributes": [
                        {"key": "event.name", "value": {"stringValue": "codex.user_prompt"}},
                        {"key": "session_id", "value": {"stringValue": "sess-42"}},
                    ],
                }],
            }],
        }],
    });

    let events = ingest_otlp_payload(&payload, Utc::now());
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.source, TelemetrySource::OtlpLog);
    assert_eq!(event.event_name.as_deref(), Some("codex.user_prompt"));
    assert_eq!(event.severity.as_deref(), Some("INFO"));
    assert_eq!(event.provider_thread_id.as_deref(), Some("sess-42"));
    assert_eq!(event.status_hint, Some(harness_core::telemetry_model::StatusHint::Running));
}

#[test]
fn resource_metrics_produce_one_event_per_data_point() {
    let payload = json!({
        "resourceMetrics": [{
            "scopeMetrics": [{
                "metrics": [{
                    "name": "codex.turn.e2e_duration_ms",
                    "gauge": {
                        "dataPoints": [
                            {"timeUnixNano": "1700000000000000000", "asDouble": 420.0},
                            {"timeUnixNano": "1700000001000000000", "asDouble": 410.0},
                        ],
                    },
                }],
            }],
        }],
    });

    let events = ingest_otlp_payload(&payload, Utc::now());
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.source == TelemetrySource::OtlpMetric));
    assert!(events.iter().all(|e| e.event_name.as_deref() == Some("codex.turn.e2e_duration_ms")));
}

#[test]
fn turn_completion_metric_carries_completed_hint() {
    let payload = json!({
        "resourceMetrics": [{
            "scopeMetrics": [{
                "metrics": [{
                    "name": "codex.turn.e2e_duration_ms",
                    "sum": { "dataPoints": [{"timeUnixNano": "1700000000000000000"}] },
                }],
            }],
        }],
    });
    let events = ingest_otlp_payload(&payload, Utc::now());
    assert_eq!(events[0].status_hint, Some(harness_core::telemetry_model::StatusHint::Completed));
}

#[test]
fn resource_spans_produce_one_event_per_span_without_reviving_running() {
    let payload = json!({
        "resourceSpans": [{
            "scopeSpans": [{
                "spans": [{"name": "handle_responses", "startTimeUnixNano": "1700000000000000000"}],
            }],
        }],
    });
    let events = ingest_otlp_payload(&payload, Utc::now());
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].source, TelemetrySource::OtlpTrace);
    // "handle_responses" matches none of the running-eligible substrings.
    assert_eq!(events[0].status_hint, None);
}

#[test]
fn missing_timestamp_falls_back_to_ingest_time() {
    let now = Utc::now();
    let payload = json!({
        "resourceLogs": [{
            "scopeLogs": [{ "logRecords": [{ "body": {"stringValue": "no-timestamp"} }] }],
        }],
    });
    let events = ingest_otlp_payload(&payload, now);
    assert_eq!(events[0].observed_at, now);
}

#[test]
fn payload_with_no_recognized_keys_yields_no_events() {
    let payload = json!({"unrelated": true});
    assert!(ingest_otlp_payload(&payload, Utc::now()).is_empty());
}
