// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::ids::{ConversationId, ControllerId, DirectoryId, RepositoryId, SessionId, SubscriptionId, TaskId};
use crate::json::CanonicalJson;
use crate::model::{AgentType, ControllerType, Signal, TaskStatus};
use serde::{Deserialize, Serialize};

/// One JSON object per `\n`-terminated frame, sent by a client. Every
/// variant is a tagged struct rather than a `serde_json::Value` so that
/// malformed shapes fail to parse instead of flowing into logic untyped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientEnvelope {
    Auth {
        token: String,
    },
    Command {
        #[serde(rename = "commandId")]
        command_id: String,
        command: Command,
    },
    #[serde(rename = "pty.input")]
    PtyInput {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(rename = "dataBase64")]
        data_base64: String,
    },
    #[serde(rename = "pty.resize")]
    PtyResize {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        cols: u16,
        rows: u16,
    },
    #[serde(rename = "pty.signal")]
    PtySignal {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        signal: Signal,
    },
}

/// The inner payload of a `command` envelope, dispatched by the `type`
/// field. Listed command set mirrors the wire protocol's non-exhaustive
/// enumeration; new types are added here as the adapter/store surface
/// grows, never represented as a bare string + `Value` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Command {
    #[serde(rename = "directory.upsert")]
    DirectoryUpsert { path: String },
    #[serde(rename = "directory.list")]
    DirectoryList {
        #[serde(default, rename = "includeArchived")]
        include_archived: bool,
        limit: Option<u32>,
    },
    #[serde(rename = "directory.archive")]
    DirectoryArchive {
        #[serde(rename = "directoryId")]
        directory_id: DirectoryId,
    },

    #[serde(rename = "repository.upsert")]
    RepositoryUpsert {
        name: String,
        #[serde(rename = "remoteUrl")]
        remote_url: String,
        #[serde(rename = "defaultBranch")]
        default_branch: String,
        #[serde(default)]
        metadata: CanonicalJson,
    },
    #[serde(rename = "repository.update")]
    RepositoryUpdate {
        #[serde(rename = "repositoryId")]
        repository_id: RepositoryId,
        name: Option<String>,
        #[serde(rename = "defaultBranch")]
        default_branch: Option<String>,
        metadata: Option<CanonicalJson>,
    },
    #[serde(rename = "repository.list")]
    RepositoryList {
        #[serde(default, rename = "includeArchived")]
        include_archived: bool,
        limit: Option<u32>,
    },
    #[serde(rename = "repository.archive")]
    RepositoryArchive {
        #[serde(rename = "repositoryId")]
        repository_id: RepositoryId,
    },

    #[serde(rename = "conversation.create")]
    ConversationCreate {
        #[serde(rename = "directoryId")]
        directory_id: DirectoryId,
        title: String,
        #[serde(rename = "agentType")]
        agent_type: AgentType,
        #[serde(default, rename = "adapterState")]
        adapter_state: CanonicalJson,
    },
    #[serde(rename = "conversation.list")]
    ConversationList {
        #[serde(rename = "directoryId")]
        directory_id: Option<DirectoryId>,
        #[serde(default, rename = "includeArchived")]
        include_archived: bool,
        limit: Option<u32>,
    },
    #[serde(rename = "conversation.update")]
    ConversationUpdate {
        #[serde(rename = "conversationId")]
        conversation_id: ConversationId,
        title: Option<String>,
        #[serde(rename = "adapterState")]
        adapter_state: Option<CanonicalJson>,
    },
    #[serde(rename = "conversation.archive")]
    ConversationArchive {
        #[serde(rename = "conversationId")]
        conversation_id: ConversationId,
    },
    #[serde(rename = "conversation.delete")]
    ConversationDelete {
        #[serde(rename = "conversationId")]
        conversation_id: ConversationId,
    },

    #[serde(rename = "task.create")]
    TaskCreate {
        #[serde(rename = "repositoryId")]
        repository_id: Option<RepositoryId>,
        title: String,
        #[serde(default)]
        description: String,
        #[serde(rename = "orderIndex")]
        order_index: Option<i64>,
    },
    #[serde(rename = "task.update")]
    TaskUpdate {
        #[serde(rename = "taskId")]
        task_id: TaskId,
        title: Option<String>,
        description: Option<String>,
    },
    #[serde(rename = "task.ready")]
    TaskReady {
        #[serde(rename = "taskId")]
        task_id: TaskId,
    },
    #[serde(rename = "task.draft")]
    TaskDraft {
        #[serde(rename = "taskId")]
        task_id: TaskId,
    },
    #[serde(rename = "task.complete")]
    TaskComplete {
        #[serde(rename = "taskId")]
        task_id: TaskId,
    },
    #[serde(rename = "task.reorder")]
    TaskReorder {
        #[serde(rename = "orderedTaskIds")]
        ordered_task_ids: Vec<TaskId>,
    },
    #[serde(rename = "task.delete")]
    TaskDelete {
        #[serde(rename = "taskId")]
        task_id: TaskId,
    },
    #[serde(rename = "task.list")]
    TaskList {
        #[serde(rename = "repositoryId")]
        repository_id: Option<RepositoryId>,
        status: Option<TaskStatus>,
    },

    #[serde(rename = "stream.subscribe")]
    StreamSubscribe {
        #[serde(default)]
        filters: CanonicalJson,
        #[serde(default, rename = "includeOutput")]
        include_output: bool,
        #[serde(rename = "afterCursor")]
        after_cursor: Option<u64>,
    },
    #[serde(rename = "stream.unsubscribe")]
    StreamUnsubscribe {
        #[serde(rename = "subscriptionId")]
        subscription_id: SubscriptionId,
    },

    #[serde(rename = "session.list")]
    SessionList {},
    #[serde(rename = "session.status")]
    SessionStatus {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },
    #[serde(rename = "session.snapshot")]
    SessionSnapshot {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },
    #[serde(rename = "session.respond")]
    SessionRespond {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        text: String,
    },
    #[serde(rename = "session.claim")]
    SessionClaim {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(rename = "controllerId")]
        controller_id: ControllerId,
        #[serde(rename = "controllerType")]
        controller_type: ControllerType,
        label: Option<String>,
        reason: Option<String>,
        #[serde(default)]
        takeover: bool,
    },
    #[serde(rename = "session.release")]
    SessionRelease {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        reason: Option<String>,
    },
    #[serde(rename = "session.interrupt")]
    SessionInterrupt {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },
    #[serde(rename = "session.remove")]
    SessionRemove {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },

    #[serde(rename = "attention.list")]
    AttentionList {},

    #[serde(rename = "pty.start")]
    PtyStart {
        #[serde(rename = "conversationId")]
        conversation_id: ConversationId,
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: std::collections::BTreeMap<String, String>,
        cwd: Option<String>,
        cols: u16,
        rows: u16,
    },
    #[serde(rename = "pty.attach")]
    PtyAttach {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(default, rename = "sinceCursor")]
        since_cursor: u64,
        #[serde(default, rename = "includeOutput")]
        include_output: bool,
    },
    #[serde(rename = "pty.detach")]
    PtyDetach {
        #[serde(rename = "attachmentId")]
        attachment_id: crate::ids::AttachmentId,
    },
    #[serde(rename = "pty.subscribe-events")]
    PtySubscribeEvents {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },
    #[serde(rename = "pty.unsubscribe-events")]
    PtyUnsubscribeEvents {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },
    #[serde(rename = "pty.close")]
    PtyClose {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },
}

/// One JSON object per `\n`-terminated frame, sent by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEnvelope {
    #[serde(rename = "auth.ok")]
    AuthOk {},
    #[serde(rename = "auth.error")]
    AuthError { error: String },
    #[serde(rename = "command.accepted")]
    CommandAccepted {
        #[serde(rename = "commandId")]
        command_id: String,
    },
    #[serde(rename = "command.completed")]
    CommandCompleted {
        #[serde(rename = "commandId")]
        command_id: String,
        result: CanonicalJson,
    },
    #[serde(rename = "command.failed")]
    CommandFailed {
        #[serde(rename = "commandId")]
        command_id: String,
        error: String,
    },
    #[serde(rename = "stream.event")]
    StreamEvent {
        #[serde(rename = "subscriptionId")]
        subscription_id: SubscriptionId,
        cursor: u64,
        event: ObservedEvent,
    },
}

/// Observed event kinds enumerated in the external interfaces: directory
/// and conversation mutations plus the `session-*` family. Each carries the
/// process-wide cursor it was published with via the enclosing
/// [`ServerEnvelope::StreamEvent`], not inline, so a single definition of
/// "what cursor means" lives at the envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ObservedEvent {
    #[serde(rename = "directory-upserted")]
    DirectoryUpserted { directory: crate::model::Directory },
    #[serde(rename = "directory-archived")]
    DirectoryArchived {
        #[serde(rename = "directoryId")]
        directory_id: DirectoryId,
    },
    #[serde(rename = "conversation-created")]
    ConversationCreated { conversation: crate::model::Conversation },
    #[serde(rename = "conversation-updated")]
    ConversationUpdated { conversation: crate::model::Conversation },
    #[serde(rename = "conversation-archived")]
    ConversationArchived {
        #[serde(rename = "conversationId")]
        conversation_id: ConversationId,
    },
    #[serde(rename = "conversation-deleted")]
    ConversationDeleted {
        #[serde(rename = "conversationId")]
        conversation_id: ConversationId,
    },
    #[serde(rename = "session-status")]
    SessionStatus {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        status: crate::model::RuntimeStatus,
        #[serde(rename = "attentionReason")]
        attention_reason: Option<crate::model::AttentionReason>,
    },
    #[serde(rename = "session-event")]
    SessionEvent {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        kind: String,
        #[serde(rename = "exitRecord")]
        exit_record: Option<crate::model::ExitRecord>,
    },
    #[serde(rename = "session-key-event")]
    SessionKeyEvent {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        summary: String,
    },
    #[serde(rename = "session-control")]
    SessionControl {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        action: String,
        controller: Option<crate::model::Controller>,
    },
    #[serde(rename = "session-output")]
    SessionOutput {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(rename = "chunkBase64")]
        chunk_base64: String,
    },
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
