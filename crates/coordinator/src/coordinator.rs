// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Session Coordinator: owns live session records
//! and controllers, reconciles signals from the Session Broker, Telemetry
//! Ingest, and Notify Tail, and publishes every resulting observed event
//! onto the shared [`EventBus`].
//!
//! One [`tokio::sync::Mutex`] guards each session's [`SessionEntry`]
//! rather than a single lock over the whole map, so concurrent commands
//! against different sessions never contend; the per-session mutex is
//! what gives the "state transitions for a single session are
//! linearizable" guarantee — every handler below holds it for the whole
//! read-modify-publish sequence, dropping it only once the event to
//! publish has been decided.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use harness_core::ids::{ControllerId, SessionId};
use harness_core::model::{
    AgentType, AttentionReason, Controller, ControllerType, ExitRecord, LiveSession, RuntimeStatus, Signal,
};
use harness_core::{EventBus, ErrorCode, HarnessError};
use harness_broker::{BrokerEvent, SessionBroker, DEFAULT_MAX_BACKLOG_BYTES};
use harness_core::envelope::ObservedEvent;
use harness_telemetry::{NotifyEvent, NotifyTail, TelemetryEvent, TelemetryTail, TelemetryTailKind};
use harness_term::{Screen, ScreenSnapshot};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::controller::{self, ClaimAction};
use crate::state_machine::{self, TelemetryTrigger};
use crate::status_model;

/// Everything the Coordinator tracks for one session beyond the wire
/// model: the broker it drives output/exit through, the agent type (for
/// adapter dispatch), and the notify-tail shutdown handle, if any.
struct SessionEntry {
    live: LiveSession,
    agent_type: AgentType,
    broker: Arc<SessionBroker>,
    notify_shutdown: Option<CancellationToken>,
    /// Snapshot Oracle driven off the same output
    /// chunks published as `session-output`, so `session.snapshot` always
    /// reflects exactly what attachments have already seen.
    screen: Screen,
    /// Shutdown handles for the session's OTLP-log and history tails,
    /// cancelled alongside the notify tail on exit.
    telemetry_shutdown: Vec<CancellationToken>,
    /// Fingerprints of telemetry events already reconciled: re-ingested
    /// events are deduplicated by fingerprint.
    seen_telemetry: std::collections::HashSet<String>,
}

/// Parameters for starting a new PTY-backed session.
pub struct StartSessionArgs<'a> {
    pub session_id: SessionId,
    pub agent_type: AgentType,
    pub command: &'a str,
    pub args: &'a [String],
    pub env: &'a BTreeMap<String, String>,
    pub cwd: Option<&'a str>,
    pub cols: u16,
    pub rows: u16,
    pub notify_path: Option<PathBuf>,
    pub otlp_path: Option<PathBuf>,
    pub history_path: Option<PathBuf>,
}

pub struct Coordinator {
    sessions: Mutex<HashMap<SessionId, Arc<Mutex<SessionEntry>>>>,
    bus: Arc<EventBus>,
}

impl Coordinator {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { sessions: Mutex::new(HashMap::new()), bus }
    }

    /// `pty.start`: spawn the child process, wrap it in a
    /// [`SessionBroker`], and register a live session record. PTY spawn
    /// failure fails synchronously — no session record is
    /// created in that case. A subsequent in-child `exec` failure
    /// surfaces later through the ordinary exit path (exit code 127), not
    /// through this error.
    pub async fn start_session(self: &Arc<Self>, args: StartSessionArgs<'_>) -> Result<SessionId, HarnessError> {
        let (pty_handle, events) = harness_pty::start(args.command, args.args, args.env, args.cwd, args.cols, args.rows)
            .map_err(|e| HarnessError::transient(format!("pty spawn failed: {e}")))?;
        let pid = pty_handle.process_id().map(|p| p as i32);
        let broker = Arc::new(SessionBroker::new(pty_handle, DEFAULT_MAX_BACKLOG_BYTES));

        let now = Utc::now();
        let entry = SessionEntry {
            live: LiveSession::new(args.session_id, pid, now),
            agent_type: args.agent_type,
            broker: Arc::clone(&broker),
            notify_shutdown: None,
            screen: Screen::new(args.cols, args.rows),
            telemetry_shutdown: Vec::new(),
            seen_telemetry: std::collections::HashSet::new(),
        };
        let entry = Arc::new(Mutex::new(entry));

        {
            let mut sessions = self.sessions.lock().await;
            sessions.insert(args.session_id, Arc::clone(&entry));
        }

        // B -> F: run the broker's backend-event loop, and separately
        // attach as an ordinary subscriber to learn about every output
        // chunk and the terminal exit record.
        let broker_for_run = Arc::clone(&broker);
        tokio::spawn(async move { broker_for_run.run(events).await });

        let (_attachment_id, mut rx) = broker.attach(0);
        let this = Arc::clone(self);
        let session_id = args.session_id;
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    BrokerEvent::Data { chunk, .. } => this.handle_output(session_id, chunk).await,
                    BrokerEvent::Exit(exit) => {
                        this.handle_exit(session_id, exit).await;
                        break;
                    }
                }
            }
        });

        if let Some(path) = args.notify_path {
            let shutdown = CancellationToken::new();
            let (tx, mut rx) = tokio::sync::mpsc::channel(16);
            let tail = NotifyTail::new(path);
            let child_shutdown = shutdown.clone();
            tokio::spawn(async move { tail.run(tx, child_shutdown).await });
            let this = Arc::clone(self);
            tokio::spawn(async move {
                while let Some(batch) = rx.recv().await {
                    for event in batch {
                        this.handle_notify(session_id, event).await;
                    }
                }
            });
            entry.lock().await.notify_shutdown = Some(shutdown);
        }

        if let Some(path) = args.otlp_path {
            self.spawn_telemetry_tail(&entry, session_id, path, TelemetryTailKind::Otlp).await;
        }
        if let Some(path) = args.history_path {
            self.spawn_telemetry_tail(&entry, session_id, path, TelemetryTailKind::History).await;
        }

        Ok(args.session_id)
    }

    /// Spawns one OTLP-log or history tail for a
    /// session, forwarding parsed events into [`Self::handle_telemetry`].
    async fn spawn_telemetry_tail(
        self: &Arc<Self>,
        entry: &Arc<Mutex<SessionEntry>>,
        session_id: SessionId,
        path: PathBuf,
        kind: TelemetryTailKind,
    ) {
        let shutdown = CancellationToken::new();
        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        let tail = TelemetryTail::new(path, kind);
        let child_shutdown = shutdown.clone();
        tokio::spawn(async move { tail.run(tx, child_shutdown).await });
        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(batch) = rx.recv().await {
                for event in batch {
                    this.handle_telemetry(session_id, event).await;
                }
            }
        });
        entry.lock().await.telemetry_shutdown.push(shutdown);
    }

    async fn entry(&self, session_id: SessionId) -> Result<Arc<Mutex<SessionEntry>>, HarnessError> {
        self.sessions
            .lock()
            .await
            .get(&session_id)
            .cloned()
            .ok_or_else(|| HarnessError::not_found("session"))
    }

    async fn handle_output(&self, session_id: SessionId, chunk: Bytes) {
        if let Ok(entry) = self.entry(session_id).await {
            entry.lock().await.screen.feed(&chunk);
        }
        use base64::Engine as _;
        let chunk_base64 = base64::engine::general_purpose::STANDARD.encode(&chunk);
        self.bus.publish(ObservedEvent::SessionOutput { session_id, chunk_base64 });
    }

    /// PTY exit: terminal for any status. Always publishes both
    /// `session-status{exited}` and `session-event{session-exit}`.
    pub async fn handle_exit(&self, session_id: SessionId, exit: ExitRecord) {
        let Ok(entry) = self.entry(session_id).await else {
            debug!(%session_id, "exit observed for a session already removed");
            return;
        };
        let mut guard = entry.lock().await;
        if guard.live.runtime_status.is_terminal() {
            return;
        }
        guard.live.runtime_status = state_machine::apply_exit();
        guard.live.attention_reason = None;
        guard.live.live = false;
        guard.live.exit_record = Some(exit);
        guard.live.last_event_at = Utc::now();
        if let Some(shutdown) = guard.notify_shutdown.take() {
            shutdown.cancel();
        }
        for shutdown in guard.telemetry_shutdown.drain(..) {
            shutdown.cancel();
        }
        drop(guard);

        self.bus.publish(ObservedEvent::SessionStatus {
            session_id,
            status: RuntimeStatus::Exited,
            attention_reason: None,
        });
        self.bus.publish(ObservedEvent::SessionEvent {
            session_id,
            kind: "session-exit".to_string(),
            exit_record: Some(exit),
        });
    }

    /// Telemetry event ingested for this session.
    pub async fn handle_telemetry(&self, session_id: SessionId, event: TelemetryEvent) {
        let Ok(entry) = self.entry(session_id).await else { return };
        let mut guard = entry.lock().await;
        if guard.live.runtime_status.is_terminal() {
            return;
        }

        let fingerprint = event.fingerprint(&session_id.to_string());
        if !guard.seen_telemetry.insert(fingerprint) {
            return;
        }

        let agent_type = guard.agent_type;
        let running_eligible = harness_adapters::running_eligible_event_names(agent_type);

        let next_status = event.status_hint.map(|hint| {
            state_machine::apply_telemetry(
                guard.live.runtime_status,
                &TelemetryTrigger {
                    hint,
                    source: event.source,
                    event_name: event.event_name.as_deref(),
                    summary_present: event.summary.is_some(),
                },
                running_eligible,
            )
        });

        let prior_status = guard.live.runtime_status;
        if let Some(Some(new_status)) = next_status {
            guard.live.runtime_status = new_status;
            if new_status == RuntimeStatus::NeedsInput {
                guard.live.attention_reason = Some(AttentionReason::Telemetry);
            } else {
                guard.live.attention_reason = None;
            }
        }

        let new_model = status_model::reduce(guard.live.status_model.as_ref(), guard.live.runtime_status, &event);
        if let Some(model) = new_model {
            guard.live.status_model = Some(model);
        }
        guard.live.telemetry = Some(harness_core::model::TelemetrySummary {
            last_source: event.source,
            last_event_name: event.event_name.clone(),
            last_observed_at: event.observed_at,
        });
        guard.live.last_event_at = Utc::now();
        let final_status = guard.live.runtime_status;
        let attention_reason = guard.live.attention_reason;
        let is_key = event.status_hint.is_some();
        drop(guard);

        if final_status != prior_status {
            self.bus.publish(ObservedEvent::SessionStatus { session_id, status: final_status, attention_reason });
        }
        if is_key {
            let summary = event
                .summary
                .clone()
                .or_else(|| event.event_name.clone())
                .unwrap_or_else(|| "telemetry".to_string());
            self.bus.publish(ObservedEvent::SessionKeyEvent { session_id, summary });
        }
    }

    /// Notify-tail event ingested for this session.
    pub async fn handle_notify(&self, session_id: SessionId, event: NotifyEvent) {
        let Ok(entry) = self.entry(session_id).await else { return };
        let mut guard = entry.lock().await;
        if guard.live.runtime_status.is_terminal() {
            return;
        }

        let prior_status = guard.live.runtime_status;
        let (next_status, attention_reason) = match &event {
            NotifyEvent::AttentionRequired { reason } => {
                let next = state_machine::apply_notify_attention(guard.live.runtime_status);
                let reason = if *reason == "approval" { AttentionReason::Approval } else { AttentionReason::UserInput };
                (next, next.is_some().then_some(reason))
            }
            NotifyEvent::TurnCompleted => (state_machine::apply_notify_turn_completed(guard.live.runtime_status), None),
            NotifyEvent::Generic(_) => (None, None),
        };

        if let Some(status) = next_status {
            guard.live.runtime_status = status;
            guard.live.attention_reason = if status == RuntimeStatus::NeedsInput { attention_reason } else { None };
        }
        guard.live.last_event_at = Utc::now();
        let final_status = guard.live.runtime_status;
        let final_attention = guard.live.attention_reason;
        drop(guard);

        if final_status != prior_status {
            self.bus
                .publish(ObservedEvent::SessionStatus { session_id, status: final_status, attention_reason: final_attention });
        }
    }

    /// `session.respond`: rejects when the caller is not the current
    /// controller (the one controller-checked command), writes
    /// the payload to the PTY, and transitions `needs-input -> running`.
    pub async fn respond(
        &self,
        session_id: SessionId,
        caller: Option<&ControllerId>,
        text: &str,
    ) -> Result<(), HarnessError> {
        let entry = self.entry(session_id).await?;
        let mut guard = entry.lock().await;
        if let Some(controller) = &guard.live.controller {
            if let Some(caller) = caller {
                if &controller.controller_id != caller {
                    return Err(HarnessError::new(
                        ErrorCode::Conflict,
                        format!("caller is not the controller (held by {})", controller.controller_id),
                    ));
                }
            }
        }
        let Some(next) = state_machine::apply_respond(guard.live.runtime_status) else {
            return Err(HarnessError::new(ErrorCode::Conflict, "session is not awaiting input"));
        };
        guard.broker.write(Bytes::copy_from_slice(text.as_bytes()));
        guard.live.runtime_status = next;
        guard.live.attention_reason = None;
        guard.live.last_event_at = Utc::now();
        drop(guard);

        self.bus
            .publish(ObservedEvent::SessionStatus { session_id, status: RuntimeStatus::Running, attention_reason: None });
        Ok(())
    }

    /// `session.claim`.
    pub async fn claim(
        &self,
        session_id: SessionId,
        controller_id: ControllerId,
        controller_type: ControllerType,
        label: Option<String>,
        takeover: bool,
    ) -> Result<ClaimAction, HarnessError> {
        let entry = self.entry(session_id).await?;
        let mut guard = entry.lock().await;
        let new_controller = Controller {
            controller_id,
            controller_type,
            controller_label: label,
            claimed_at: Utc::now(),
        };
        let action = controller::claim(&mut guard.live.controller, new_controller, takeover)?;
        let controller_snapshot = guard.live.controller.clone();
        drop(guard);

        let action_str = match action {
            ClaimAction::Claimed => "claimed",
            ClaimAction::TakenOver => "taken-over",
        };
        self.bus.publish(ObservedEvent::SessionControl {
            session_id,
            action: action_str.to_string(),
            controller: controller_snapshot,
        });
        Ok(action)
    }

    /// `session.release`: idempotent, emits nothing when already unowned.
    pub async fn release(&self, session_id: SessionId, _reason: Option<String>) -> Result<(), HarnessError> {
        let entry = self.entry(session_id).await?;
        let mut guard = entry.lock().await;
        let released = controller::release(&mut guard.live.controller);
        drop(guard);

        if released {
            self.bus
                .publish(ObservedEvent::SessionControl { session_id, action: "released".to_string(), controller: None });
        }
        Ok(())
    }

    /// `session.interrupt`: advisory, not controller-gated — holding a
    /// controller never blocks `pty.input`.
    pub async fn interrupt(&self, session_id: SessionId) -> Result<(), HarnessError> {
        let entry = self.entry(session_id).await?;
        let guard = entry.lock().await;
        guard.broker.signal(Signal::Interrupt);
        Ok(())
    }

    pub async fn write_input(&self, session_id: SessionId, data: Bytes) -> Result<(), HarnessError> {
        let entry = self.entry(session_id).await?;
        let guard = entry.lock().await;
        guard.broker.write(data);
        Ok(())
    }

    pub async fn resize(&self, session_id: SessionId, cols: u16, rows: u16) -> Result<(), HarnessError> {
        let entry = self.entry(session_id).await?;
        let mut guard = entry.lock().await;
        guard.broker.resize(cols, rows);
        guard.screen.resize(cols, rows);
        Ok(())
    }

    /// `session.snapshot`: a point-in-time capture of
    /// the session's terminal grid as maintained by the Snapshot Oracle.
    pub async fn snapshot(&self, session_id: SessionId) -> Result<ScreenSnapshot, HarnessError> {
        let entry = self.entry(session_id).await?;
        Ok(entry.lock().await.screen.snapshot())
    }

    pub async fn signal(&self, session_id: SessionId, signal: Signal) -> Result<(), HarnessError> {
        let entry = self.entry(session_id).await?;
        let guard = entry.lock().await;
        guard.broker.signal(signal);
        Ok(())
    }

    /// `session.remove`: destroys the live session record. Closes the
    /// broker's PTY handle first so a still-running child doesn't keep
    /// writing into a backlog nobody observes anymore.
    pub async fn remove_session(&self, session_id: SessionId) -> Result<(), HarnessError> {
        let mut sessions = self.sessions.lock().await;
        let Some(entry) = sessions.remove(&session_id) else {
            return Err(HarnessError::not_found("session"));
        };
        let guard = entry.lock().await;
        guard.broker.close();
        if let Some(shutdown) = &guard.notify_shutdown {
            shutdown.cancel();
        }
        for shutdown in &guard.telemetry_shutdown {
            shutdown.cancel();
        }
        Ok(())
    }

    pub async fn session_status(&self, session_id: SessionId) -> Result<LiveSession, HarnessError> {
        let entry = self.entry(session_id).await?;
        Ok(entry.lock().await.live.clone())
    }

    pub async fn list_sessions(&self) -> Vec<LiveSession> {
        let sessions = self.sessions.lock().await;
        let mut out = Vec::with_capacity(sessions.len());
        for entry in sessions.values() {
            out.push(entry.lock().await.live.clone());
        }
        out
    }

    pub async fn attention_list(&self) -> Vec<LiveSession> {
        self.list_sessions()
            .await
            .into_iter()
            .filter(|s| s.runtime_status == RuntimeStatus::NeedsInput)
            .collect()
    }

    /// Attach an observer to the live PTY attachment/replay path for a
    /// session (the broker handle).
    pub async fn attach_output(
        &self,
        session_id: SessionId,
        since_cursor: u64,
    ) -> Result<(harness_core::ids::AttachmentId, tokio::sync::mpsc::UnboundedReceiver<BrokerEvent>), HarnessError> {
        let entry = self.entry(session_id).await?;
        let guard = entry.lock().await;
        Ok(guard.broker.attach(since_cursor))
    }

    pub async fn detach_output(&self, session_id: SessionId, attachment_id: harness_core::ids::AttachmentId) {
        if let Ok(entry) = self.entry(session_id).await {
            entry.lock().await.broker.detach(attachment_id);
        }
    }

    /// Records a fresh process-usage sample against a live session
    /// (the background refresher). A session that has since
    /// exited or been removed is simply not updated; the refresher
    /// always re-derives its sample set from `list_sessions` on its
    /// next tick, so a stale write here is never observed.
    pub async fn update_usage(&self, session_id: SessionId, usage: harness_core::model::ProcessUsage) {
        if let Ok(entry) = self.entry(session_id).await {
            entry.lock().await.live.process_usage = Some(usage);
        }
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
