// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File tailing shared by OTLP and history ingestion. Both arrive as an
//! append-only side-channel file exactly like the notify hook, so this
//! reuses `notify::NotifyTail`'s offset-tracking/shrink-detection shell
//! and only varies the per-line parse: one OTLP JSON payload per line, or
//! one history record per line.

use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::event::TelemetryEvent;
use crate::history::parse_history_line;
use crate::otlp::ingest_otlp_payload;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Which per-line parser a [`TelemetryTail`] applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryTailKind {
    /// Each line is one OTLP JSON payload (resourceLogs/Metrics/Spans).
    Otlp,
    /// Each line is one free-form history record.
    History,
}

/// Tails an OTLP-log or history JSONL file for one session, owned by the
/// Session Coordinator (one instance per session per kind, same as
/// [`crate::notify::NotifyTail`]).
pub struct TelemetryTail {
    path: PathBuf,
    kind: TelemetryTailKind,
    offset: u64,
    poll_interval: Duration,
}

impl TelemetryTail {
    pub fn new(path: PathBuf, kind: TelemetryTailKind) -> Self {
        Self { path, kind, offset: 0, poll_interval: DEFAULT_POLL_INTERVAL }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read and parse every complete line appended since the last read.
    /// Resets to offset 0 when the file has shrunk (rotation). Malformed
    /// lines are dropped without surfacing an error, the same discipline
    /// the Notify Tail applies to its own malformed lines.
    pub fn read_new_events(&mut self) -> std::io::Result<Vec<TelemetryEvent>> {
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
            self.offset += bytes_read as u64;
            let trimmed = line.trim_end();
            if trimmed.is_empty() {
                continue;
            }
            match self.kind {
                TelemetryTailKind::Otlp => {
                    let Ok(payload) = serde_json::from_str::<serde_json::Value>(trimmed) else { continue };
                    events.extend(ingest_otlp_payload(&payload, Utc::now()));
                }
                TelemetryTailKind::History => {
                    if let Some(event) = parse_history_line(trimmed, Utc::now()) {
                        events.push(event);
                    }
                }
            }
        }

        Ok(events)
    }

    /// Run until `shutdown` is cancelled or the channel closes, sending
    /// batches of newly parsed events.
    pub async fn run(mut self, event_tx: mpsc::Sender<Vec<TelemetryEvent>>, shutdown: CancellationToken) {
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
#[path = "tail_tests.rs"]
mod tests;
