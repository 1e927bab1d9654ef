// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Notify Tail: tails an append-only JSONL file written by an agent's
//! notify hook. Tracks a byte offset, detects truncation/rotation by a
//! shrinking file size, and falls back to polling when filesystem
//! notifications are unavailable, decoding each complete line into a
//! typed [`NotifyEvent`].

use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::PathBuf;
use std::time::Duration;

use harness_core::json::CanonicalJson;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Notify-tail polling interval default
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Decoded record from one complete JSONL line: `{ts, payload}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyRecord {
    pub ts: String,
    pub payload: CanonicalJson,
}

/// Classification of a decoded notify line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyEvent {
    TurnCompleted,
    AttentionRequired { reason: &'static str },
    Generic(CanonicalJson),
}

/// Classify a decoded record's `payload.type` field
fn classify(record: &NotifyRecord) -> NotifyEvent {
    let payload_type = record
        .payload
        .as_map()
        .and_then(|m| m.get("type"))
        .and_then(Value::as_str)
        .unwrap_or("");

    if payload_type == "agent-turn-complete" {
        NotifyEvent::TurnCompleted
    } else if payload_type.contains("approval") {
        NotifyEvent::AttentionRequired { reason: "approval" }
    } else if payload_type.contains("input") {
        NotifyEvent::AttentionRequired { reason: "user-input" }
    } else {
        NotifyEvent::Generic(record.payload.clone())
    }
}

/// Tails a notify JSONL file for one session, owned by the session
/// coordinator as an explicit component with one instance per session
/// rather than a single process-global notify path.
pub struct NotifyTail {
    path: PathBuf,
    offset: u64,
    poll_interval: Duration,
}

impl NotifyTail {
    pub fn new(path: PathBuf) -> Self {
        Self { path, offset: 0, poll_interval: DEFAULT_POLL_INTERVAL }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read and classify every complete line appended since the last
    /// read. Resets to offset 0 when the file has shrunk (rotation).
    /// Malformed lines are dropped without surfacing an error.
    pub fn read_new_events(&mut self) -> std::io::Result<Vec<NotifyEvent>> {
        let file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e),
        };

        if let Ok(meta) = file.metadata() {
            if meta.len() < self.offset {
                self.offset = 0;
            }
        }

        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(self.offset))?;

        let mut events = Vec::new();
        let mut line = String::new();
        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line)?;
            if bytes_read == 0 {
                break;
            }
            if !line.ends_with('\n') {
                // The writer hasn't finished this line yet: leave the
                // offset before it so the next poll re-reads it in full
                // once the terminating LF lands, instead of treating the
                // partial bytes as a (malformed) complete record.
                break;
            }
            self.offset += bytes_read as u64;
            let trimmed = line.trim_end();
            if trimmed.is_empty() {
                continue;
            }
            let Ok(record) = serde_json::from_str::<NotifyRecord>(trimmed) else { continue };
            events.push(classify(&record));
        }

        Ok(events)
    }

    /// Run until `shutdown` is cancelled or the channel closes, sending
    /// batches of newly classified events. Uses `notify` for filesystem
    /// wake-ups with a poll-interval fallback, exactly as `LogWatcher`
    /// does.
    pub async fn run(mut self, event_tx: mpsc::Sender<Vec<NotifyEvent>>, shutdown: CancellationToken) {
        let (wake_tx, mut wake_rx) = mpsc::channel::<()>(1);
        let _watcher = self.setup_notify_watcher(wake_tx);

        let mut poll_interval = tokio::time::interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = wake_rx.recv() => {}
                _ = poll_interval.tick() => {}
            }

            match self.read_new_events() {
                Ok(events) if !events.is_empty() => {
                    if event_tx.send(events).await.is_err() {
                        break;
                    }
                }
                _ => {}
            }
        }
    }

    fn setup_notify_watcher(&self, wake_tx: mpsc::Sender<()>) -> Option<notify::RecommendedWatcher> {
        use notify::{RecursiveMode, Watcher};

        let mut watcher = notify::recommended_watcher(move |_: notify::Result<notify::Event>| {
            let _ = wake_tx.try_send(());
        })
        .ok()?;

        let watch_path = self.path.parent().unwrap_or(self.path.as_ref());
        watcher.watch(watch_path, RecursiveMode::NonRecursive).ok()?;
        Some(watcher)
    }
}

#[cfg(test)]
#[path = "notify_tests.rs"]
mod tests;
