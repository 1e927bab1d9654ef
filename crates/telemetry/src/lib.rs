// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Telemetry Ingest and Notify Tail: normalizes OTLP JSON and history
//! JSONL into a uniform [`TelemetryEvent`] stream, and tails an agent's
//! notify hook file for turn-completion and attention-required signals.

pub mod event;
pub mod history;
pub mod notify;
pub mod otlp;
pub mod tail;

pub use event::{recover_provider_thread_id, TelemetryEvent, THREAD_ID_KEYS, TURN_DURATION_METRIC};
pub use history::parse_history_line;
pub use notify::{NotifyEvent, NotifyRecord, NotifyTail, DEFAULT_POLL_INTERVAL};
pub use otlp::ingest_otlp_payload;
pub use tail::{TelemetryTail, TelemetryTailKind};
