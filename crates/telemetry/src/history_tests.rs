use super::*;
use chrono::TimeZone;

#[test]
fn parses_type_summary_and_rfc3339_timestamp() {
    let line = r#"{"type":"agent-turn-complete","summary":"done","timestamp":"2026-01-01T00:00:00Z"}"#;
    let event = parse_history_line(line, Utc::now()).expect("valid record");
    assert_eq!(event.event_name.as_deref(), Some("agent-turn-complete"));
    assert_eq!(event.summary.as_deref(), Some("done"));
    assert_eq!(event.observed_at, Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
    assert_eq!(event.source, TelemetrySource::History);
}

#[test]
fn falls_back_to_alternate_key_names() {
    let line = r#"{"event":"api_request","message":"calling model","ts":"2026-02-03T04:05:06Z"}"#;
    let event = parse_history_line(line, Utc::now()).expect("valid record");
    assert_eq!(event.event_name.as_deref(), Some("api_request"));
    assert_eq!(event.summary.as_deref(), Some("calling model"));
    assert_eq!(event.status_hint, Some(harness_core::telemetry_model::StatusHint::Running));
}

#[test]
fn epoch_millis_timestamp_is_parsed() {
    let line = r#"{"type":"note","time":"1700000000000"}"#;
    let event = parse_history_line(line, Utc::now()).expect("valid record");
    assert_eq!(event.observed_at.timestamp_millis(), 1_700_000_000_000);
}

#[test]
fn missing_timestamp_falls_back_to_ingest_time() {
    let now = Utc::now();
    let line = r#"{"type":"note"}"#;
    let event = parse_history_line(line, now).expect("valid record");
    assert_eq!(event.observed_at, now);
}

#[test]
fn malformed_json_is_dropped() {
    assert!(parse_history_line("not json at all", Utc::now()).is_none());
}

#[test]
fn non_object_json_is_dropped() {
    assert!(parse_history_line("[1, 2, 3]", Utc::now()).is_none());
    assert!(parse_history_line("\"just a string\"", Utc::now()).is_none());
}

#[test]
fn provider_thread_id_is_recovered_from_history_record() {
    let line = r#"{"type":"note","session_id":"sess-7"}"#;
    let event = parse_history_line(line, Utc::now()).expect("valid record");
    assert_eq!(event.provider_thread_id.as_deref(), Some("sess-7"));
}
