// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command router: dispatches a parsed [`Command`] against
//! the Workspace Store and Session Coordinator and returns the JSON
//! result a `command.completed` envelope carries. `stream.subscribe` /
//! `stream.unsubscribe` and `pty.attach` / `pty.detach` are handled in
//! [`crate::connection`] instead, since they need the connection's own
//! outbound channel and per-connection bookkeeping; everything else lives
//! here so it is testable without a socket.

use std::sync::Arc;

use harness_core::envelope::Command;
use harness_core::ids::ConversationId;
use harness_core::json::CanonicalJson;
use harness_core::model::Signal;
use harness_core::scope::Scope;
use harness_core::{EventBus, HarnessError};
use harness_coordinator::{Coordinator, StartSessionArgs};
use harness_store::WorkspaceStore;
use serde_json::json;

use crate::config::ServerConfig;

/// Everything a command handler needs beyond the command payload itself.
/// `bus` is only read directly by [`crate::connection`] (for
/// `stream.subscribe` / `pty.subscribe-events`); `router::dispatch` never
/// touches it, since every event it cares about is published by the
/// coordinator or the store it already holds.
pub struct Context {
    pub store: Arc<WorkspaceStore>,
    pub coordinator: Arc<Coordinator>,
    pub config: Arc<ServerConfig>,
    pub bus: Arc<EventBus>,
}

impl Context {
    fn scope(&self) -> Scope {
        self.config.scope.clone()
    }
}

/// Dispatch one command, returning the `result` payload of
/// `command.completed` or the error of `command.failed`.
pub async fn dispatch(ctx: &Context, command: Command) -> Result<CanonicalJson, HarnessError> {
    let scope = ctx.scope();
    match command {
        Command::DirectoryUpsert { path } => {
            let directory = ctx.store.upsert_directory(scope, normalize_path(&path)).await?;
            Ok(to_json(&directory))
        }
        Command::DirectoryList { include_archived, limit } => {
            let directories = ctx.store.list_directories(scope, include_archived, limit).await?;
            Ok(to_json(&directories))
        }
        Command::DirectoryArchive { directory_id } => {
            ctx.store.archive_directory(scope, directory_id).await?;
            Ok(CanonicalJson(json!({})))
        }

        Command::RepositoryUpsert { name, remote_url, default_branch, metadata } => {
            let repository = ctx.store.upsert_repository(scope, name, remote_url, default_branch, metadata).await?;
            Ok(to_json(&repository))
        }
        Command::RepositoryUpdate { repository_id, name, default_branch, metadata } => {
            let repository = ctx.store.update_repository(scope, repository_id, name, default_branch, metadata).await?;
            Ok(to_json(&repository))
        }
        Command::RepositoryList { include_archived, limit } => {
            let mut repositories = ctx.store.list_repositories(scope, include_archived, limit).await?;
            // `metadata.homePriority` defines stable display order; absent
            // means unordered tail.
            repositories.sort_by_key(|r| (r.home_priority().is_none(), r.home_priority().unwrap_or(0)));
            Ok(to_json(&repositories))
        }
        Command::RepositoryArchive { repository_id } => {
            ctx.store.archive_repository(scope, repository_id).await?;
            Ok(CanonicalJson(json!({})))
        }

        Command::ConversationCreate { directory_id, title, agent_type, adapter_state } => {
            let conversation = ctx.store.create_conversation(scope, directory_id, title, agent_type, adapter_state).await?;
            Ok(to_json(&conversation))
        }
        Command::ConversationList { directory_id, include_archived, limit } => {
            let conversations = ctx.store.list_conversations(scope, directory_id, include_archived, limit).await?;
            Ok(to_json(&conversations))
        }
        Command::ConversationUpdate { conversation_id, title, adapter_state } => {
            let conversation = ctx.store.update_conversation(scope, conversation_id, title, adapter_state).await?;
            Ok(to_json(&conversation))
        }
        Command::ConversationArchive { conversation_id } => {
            ctx.store.archive_conversation(scope, conversation_id).await?;
            Ok(CanonicalJson(json!({})))
        }
        Command::ConversationDelete { conversation_id } => {
            ctx.store.delete_conversation(scope, conversation_id).await?;
            Ok(CanonicalJson(json!({})))
        }

        Command::TaskCreate { repository_id, title, description, order_index } => {
            let task = ctx.store.create_task(scope, repository_id, title, description, order_index).await?;
            Ok(to_json(&task))
        }
        Command::TaskUpdate { task_id, title, description } => {
            let task = ctx.store.update_task(scope, task_id, title, description).await?;
            Ok(to_json(&task))
        }
        Command::TaskReady { task_id } => {
            let task = ctx.store.transition_task(scope, task_id, harness_core::model::TaskStatus::Ready).await?;
            Ok(to_json(&task))
        }
        Command::TaskDraft { task_id } => {
            let task = ctx.store.transition_task(scope, task_id, harness_core::model::TaskStatus::Draft).await?;
            Ok(to_json(&task))
        }
        Command::TaskComplete { task_id } => {
            let task = ctx.store.transition_task(scope, task_id, harness_core::model::TaskStatus::Completed).await?;
            Ok(to_json(&task))
        }
        Command::TaskReorder { ordered_task_ids } => {
            ctx.store.reorder_tasks(scope, ordered_task_ids).await?;
            Ok(CanonicalJson(json!({})))
        }
        Command::TaskDelete { task_id } => {
            ctx.store.delete_task(scope, task_id).await?;
            Ok(CanonicalJson(json!({})))
        }
        Command::TaskList { repository_id, status } => {
            let tasks = ctx.store.list_tasks(scope, repository_id, status).await?;
            Ok(to_json(&tasks))
        }

        Command::SessionList {} => Ok(to_json(&ctx.coordinator.list_sessions().await)),
        Command::SessionStatus { session_id } => Ok(to_json(&ctx.coordinator.session_status(session_id).await?)),
        Command::SessionSnapshot { session_id } => Ok(to_json(&ctx.coordinator.snapshot(session_id).await?)),
        Command::SessionRespond { session_id, text } => {
            // The wire shape carries no callerId for this command, so no
            // controller is asserted here; `Coordinator::respond` still
            // enforces the caller check whenever a caller is
            // given, but over this transport it never is.
            ctx.coordinator.respond(session_id, None, &text).await?;
            Ok(CanonicalJson(json!({})))
        }
        Command::SessionClaim { session_id, controller_id, controller_type, label, reason: _, takeover } => {
            let action = ctx.coordinator.claim(session_id, controller_id, controller_type, label, takeover).await?;
            let action_str = match action {
                harness_coordinator::ClaimAction::Claimed => "claimed",
                harness_coordinator::ClaimAction::TakenOver => "taken-over",
            };
            Ok(CanonicalJson(json!({ "action": action_str })))
        }
        Command::SessionRelease { session_id, reason } => {
            ctx.coordinator.release(session_id, reason).await?;
            Ok(CanonicalJson(json!({})))
        }
        Command::SessionInterrupt { session_id } => {
            ctx.coordinator.interrupt(session_id).await?;
            Ok(CanonicalJson(json!({})))
        }
        Command::SessionRemove { session_id } => {
            ctx.coordinator.remove_session(session_id).await?;
            Ok(CanonicalJson(json!({})))
        }

        Command::AttentionList {} => Ok(to_json(&ctx.coordinator.attention_list().await)),

        Command::PtyStart { conversation_id, command: cmd, args, env, cwd, cols, rows } => {
            start_pty(ctx, conversation_id, cmd, args, env, cwd, cols, rows).await
        }
        Command::PtyClose { session_id } => {
            ctx.coordinator.signal(session_id, Signal::Terminate).await?;
            Ok(CanonicalJson(json!({})))
        }

        // Handled in `crate::connection` because they need the
        // connection's outbound channel.
        Command::StreamSubscribe { .. }
        | Command::StreamUnsubscribe { .. }
        | Command::PtyAttach { .. }
        | Command::PtyDetach { .. }
        | Command::PtySubscribeEvents { .. }
        | Command::PtyUnsubscribeEvents { .. } => Err(HarnessError::invalid(
            "this command type is dispatched by the connection, not the router",
        )),
    }
}

#[allow(clippy::too_many_arguments)]
async fn start_pty(
    ctx: &Context,
    conversation_id: ConversationId,
    command: String,
    args: Vec<String>,
    env: std::collections::BTreeMap<String, String>,
    cwd: Option<String>,
    cols: u16,
    rows: u16,
) -> Result<CanonicalJson, HarnessError> {
    let scope = ctx.scope();
    let conversation = ctx.store.get_conversation(scope, conversation_id).await?;
    let session_id = conversation.session_id();
    let full_args = harness_adapters::compose_start_args(conversation.agent_type, &args, &conversation.adapter_state);

    let notify_path = ctx.config.notify_path_for(session_id);
    let otlp_path = ctx.config.otlp_path_for(session_id);
    let history_path = ctx.config.history_path_for(session_id);

    ctx.coordinator
        .start_session(StartSessionArgs {
            session_id,
            agent_type: conversation.agent_type,
            command: &command,
            args: &full_args,
            env: &env,
            cwd: cwd.as_deref(),
            cols,
            rows,
            notify_path: Some(notify_path),
            otlp_path: Some(otlp_path),
            history_path: Some(history_path),
        })
        .await?;

    Ok(CanonicalJson(json!({ "sessionId": session_id })))
}

/// Paths are normalized (absolute, tilde-expanded) at ingestion.
fn normalize_path(path: &str) -> String {
    let expanded = if let Some(rest) = path.strip_prefix("~/") {
        match std::env::var("HOME") {
            Ok(home) => format!("{home}/{rest}"),
            Err(_) => path.to_string(),
        }
    } else if path == "~" {
        std::env::var("HOME").unwrap_or_else(|_| path.to_string())
    } else {
        path.to_string()
    };

    if std::path::Path::new(&expanded).is_absolute() {
        expanded
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(&expanded).to_string_lossy().into_owned(),
            Err(_) => expanded,
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> CanonicalJson {
    CanonicalJson(serde_json::to_value(value).unwrap_or(serde_json::Value::Null))
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;
