#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use super::*;
use std::io::Write as _;

fn write_lines(path: &std::path::Path, lines: &[&str]) {
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path).expect("open");
    for line in lines {
        writeln!(file, "{line}").expect("write");
    }
}

#[test]
fn otlp_kind_parses_one_payload_per_line() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("otlp.jsonl");
    write_lines(
        &path,
        &[r#"{"resourceMetrics":[{"scopeMetrics":[{"metrics":[{"name":"codex.turn.e2e_duration_ms","sum":{"dataPoints":[{"asInt":"1200"}]}}]}]}]}"#],
    );

    let mut tail = TelemetryTail::new(path, TelemetryTailKind::Otlp);
    let events = tail.read_new_events().expect("read");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_name.as_deref(), Some("codex.turn.e2e_duration_ms"));
}

#[test]
fn history_kind_parses_one_record_per_line() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("history.jsonl");
    write_lines(&path, &[r#"{"type":"codex.user_prompt","timestamp":"2026-01-01T00:00:00Z"}"#]);

    let mut tail = TelemetryTail::new(path, TelemetryTailKind::History);
    let events = tail.read_new_events().expect("read");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_name.as_deref(), Some("codex.user_prompt"));
}

#[test]
fn malformed_line_is_dropped_without_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("otlp.jsonl");
    write_lines(&path, &["not json", ""]);

    let mut tail = TelemetryTail::new(path, TelemetryTailKind::Otlp);
    let events = tail.read_new_events().expect("read");
    assert!(events.is_empty());
}

#[test]
fn offset_advances_so_a_second_read_only_sees_new_lines() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("history.jsonl");
    write_lines(&path, &[r#"{"type":"a"}"#]);

    let mut tail = TelemetryTail::new(path.clone(), TelemetryTailKind::History);
    let first = tail.read_new_events().expect("read");
    assert_eq!(first.len(), 1);

    let second = tail.read_new_events().expect("read");
    assert!(second.is_empty());

    write_lines(&path, &[r#"{"type":"b"}"#]);
    let third = tail.read_new_events().expect("read");
    assert_eq!(third.len(), 1);
    assert_eq!(third[0].event_name.as_deref(), Some("b"));
}

#[test]
fn file_shrinking_resets_offset_to_zero() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("history.jsonl");
    write_lines(&path, &[r#"{"type":"a"}"#, r#"{"type":"b"}"#]);

    let mut tail = TelemetryTail::new(path.clone(), TelemetryTailKind::History);
    let first = tail.read_new_events().expect("read");
    assert_eq!(first.len(), 2);

    std::fs::write(&path, b"").expect("truncate");
    write_lines(&path, &[r#"{"type":"c"}"#]);
    let after_rotation = tail.read_new_events().expect("read");
    assert_eq!(after_rotation.len(), 1);
    assert_eq!(after_rotation[0].event_name.as_deref(), Some("c"));
}
