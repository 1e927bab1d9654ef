// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::ids::{ConversationId, ControllerId, DirectoryId, RepositoryId, SessionId, TaskId};
use crate::json::CanonicalJson;
use crate::scope::Scope;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentType {
    Codex,
    Claude,
    Cursor,
    Terminal,
    Critique,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Draft,
    Ready,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuntimeStatus {
    Running,
    NeedsInput,
    Completed,
    Exited,
}

impl RuntimeStatus {
    /// `exited` is terminal: once observed, no later `session-status` event
    /// for that session may report any other status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Exited)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerType {
    Human,
    Agent,
    Automation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Interrupt,
    Eof,
    Terminate,
}

/// Reason a session entered `needs-input`, set on entry and cleared on any
/// transition out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttentionReason {
    Approval,
    UserInput,
    Telemetry,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directory {
    pub directory_id: DirectoryId,
    pub scope: Scope,
    pub path: String,
    pub archived_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub repository_id: RepositoryId,
    pub scope: Scope,
    pub name: String,
    pub normalized_remote_url: String,
    pub default_branch: String,
    pub metadata: CanonicalJson,
    pub created_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
}

impl Repository {
    /// `metadata.homePriority`: a non-negative integer defining stable
    /// display order; absent means unordered tail.
    pub fn home_priority(&self) -> Option<u64> {
        self.metadata
            .as_map()?
            .get("homePriority")
            .and_then(|v| v.as_u64())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: ConversationId,
    pub directory_id: DirectoryId,
    pub scope: Scope,
    pub title: String,
    pub agent_type: AgentType,
    pub adapter_state: CanonicalJson,
    pub archived_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// `conversationId` is also the `sessionId` of any running PTY for this
    /// conversation (1:1).
    pub fn session_id(&self) -> SessionId {
        self.conversation_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub scope: Scope,
    pub repository_id: Option<RepositoryId>,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub order_index: i64,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Status transitions: `draft<->ready`, `draft|ready->in-progress->completed`;
    /// `completed` is terminal.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self.status, next),
            (Draft, Ready) | (Ready, Draft) | (Draft, InProgress) | (Ready, InProgress) | (InProgress, Completed)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Controller {
    pub controller_id: ControllerId,
    pub controller_type: ControllerType,
    pub controller_label: Option<String>,
    pub claimed_at: DateTime<Utc>,
}

/// `{code|null, signal|null}`: when both are absent the synthesized exit
/// carries `code=null, signal=null`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExitRecord {
    pub code: Option<i32>,
    pub signal: Option<&'static str>,
}

/// Per-agent-type reducer output: human-readable active/inactive plus the
/// last known unit of work observed. Out-of-order telemetry (`observedAt`
/// older than `last_known_work_at`) is ignored by the reducer that produces
/// this, not by callers of the type itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusModel {
    pub active: bool,
    pub last_known_work: Option<String>,
    pub last_known_work_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetrySummary {
    pub last_source: crate::telemetry_model::TelemetrySource,
    pub last_event_name: Option<String>,
    pub last_observed_at: DateTime<Utc>,
}

/// A background process-usage sample (the ≈250ms refresher).
/// Integer units so the value can still derive `Eq`, which an `f64`
/// percentage could not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessUsage {
    pub cpu_millipercent: u32,
    pub mem_kb: u64,
}

/// Runtime-only record owned by the Session Coordinator; created on
/// `pty.start`, destroyed on `session.remove`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveSession {
    pub session_id: SessionId,
    pub pid: Option<i32>,
    pub runtime_status: RuntimeStatus,
    pub attention_reason: Option<AttentionReason>,
    pub live: bool,
    pub controller: Option<Controller>,
    pub status_model: Option<StatusModel>,
    pub telemetry: Option<TelemetrySummary>,
    pub process_usage: Option<ProcessUsage>,
    pub last_event_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub exit_record: Option<ExitRecord>,
}

impl LiveSession {
    pub fn new(session_id: SessionId, pid: Option<i32>, now: DateTime<Utc>) -> Self {
        Self {
            session_id,
            pid,
            runtime_status: RuntimeStatus::Running,
            attention_reason: None,
            live: true,
            controller: None,
            status_model: None,
            telemetry: None,
            process_usage: None,
            last_event_at: now,
            started_at: now,
            exit_record: None,
        }
    }
}

#[cfg(test)]
#[path = "model_tests.rs"]
mod tests;
