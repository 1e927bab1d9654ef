// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace Store: persisted directories, repositories, conversations,
//! and tasks, scope-uniqueness invariants, and transactional mutation
//! with publish-after-commit discipline.
//!
//! Every mutation runs inside one `rusqlite` transaction on a blocking
//! thread (`tokio::task::spawn_blocking`); the corresponding
//! [`ObservedEvent`] is only published onto the [`EventBus`] once that
//! transaction has committed, so no subscriber ever observes a mutation
//! that later rolls back.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use harness_core::envelope::ObservedEvent;
use harness_core::ids::{ConversationId, DirectoryId, RepositoryId, TaskId};
use harness_core::json::CanonicalJson;
use harness_core::model::{AgentType, Conversation, Directory, Repository, Task, TaskStatus};
use harness_core::scope::Scope;
use harness_core::{EventBus, ErrorCode, HarnessError};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::info;

use crate::normalize::normalize_remote_url;
use crate::{legacy, migrations};

pub struct WorkspaceStore {
    conn: Arc<StdMutex<Connection>>,
    bus: Arc<EventBus>,
}

impl WorkspaceStore {
    /// Open the workspace-scoped store file, migrating a legacy-layout
    /// file into place first if one exists and applying schema migrations.
    pub async fn open(path: PathBuf, legacy_path: Option<PathBuf>, bus: Arc<EventBus>) -> Result<Self, HarnessError> {
        if let Some(legacy_path) = legacy_path {
            legacy::migrate_if_needed(&legacy_path, &path)
                .map_err(|e| HarnessError::transient(format!("legacy store migration failed: {e}")))?;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| HarnessError::fatal(format!("failed to create store directory: {e}")))?;
        }

        let conn = tokio::task::spawn_blocking(move || -> rusqlite::Result<Connection> {
            let mut conn = Connection::open(&path)?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            migrations::apply(&mut conn)?;
            Ok(conn)
        })
        .await
        .map_err(|e| HarnessError::fatal(format!("store open task panicked: {e}")))?
        .map_err(|e| HarnessError::fatal(format!("store open failed: {e}")))?;

        info!("workspace store opened");
        Ok(Self { conn: Arc::new(StdMutex::new(conn)), bus })
    }

    /// In-memory store, used by tests that don't need a file on disk.
    pub async fn open_in_memory(bus: Arc<EventBus>) -> Result<Self, HarnessError> {
        let conn = tokio::task::spawn_blocking(|| -> rusqlite::Result<Connection> {
            let mut conn = Connection::open_in_memory()?;
            migrations::apply(&mut conn)?;
            Ok(conn)
        })
        .await
        .map_err(|e| HarnessError::fatal(format!("store open task panicked: {e}")))?
        .map_err(|e| HarnessError::fatal(format!("store open failed: {e}")))?;
        Ok(Self { conn: Arc::new(StdMutex::new(conn)), bus })
    }

    #[cfg(test)]
    pub fn bus_for_test(&self) -> &EventBus {
        &self.bus
    }

    async fn run<T, F>(&self, f: F) -> Result<T, HarnessError>
    where
        F: FnOnce(&mut Connection) -> Result<T, HarnessError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(|e| e.into_inner());
            f(&mut guard)
        })
        .await
        .map_err(|e| HarnessError::fatal(format!("store task panicked: {e}")))?
    }

    // ---- directories ----------------------------------------------------

    pub async fn upsert_directory(&self, scope: Scope, path: String) -> Result<Directory, HarnessError> {
        let directory = self
            .run(move |conn| {
                let tx = conn.transaction().map_err(sql_err)?;
                let directory = upsert_directory_tx(&tx, &scope, &path)?;
                tx.commit().map_err(sql_err)?;
                Ok(directory)
            })
            .await?;
        self.bus.publish(ObservedEvent::DirectoryUpserted { directory: directory.clone() });
        Ok(directory)
    }

    pub async fn archive_directory(&self, scope: Scope, directory_id: DirectoryId) -> Result<(), HarnessError> {
        self.run(move |conn| {
            let tx = conn.transaction().map_err(sql_err)?;
            let updated = tx
                .execute(
                    "UPDATE directories SET archived_at = ?1 \
                     WHERE directory_id = ?2 AND tenant_id = ?3 AND user_id = ?4 AND workspace_id = ?5 AND archived_at IS NULL",
                    params![Utc::now().to_rfc3339(), directory_id.to_string(), scope.tenant_id, scope.user_id, scope.workspace_id],
                )
                .map_err(sql_err)?;
            if updated == 0 {
                return Err(HarnessError::not_found("directory"));
            }
            tx.commit().map_err(sql_err)?;
            Ok(())
        })
        .await?;
        self.bus.publish(ObservedEvent::DirectoryArchived { directory_id });
        Ok(())
    }

    pub async fn list_directories(
        &self,
        scope: Scope,
        include_archived: bool,
        limit: Option<u32>,
    ) -> Result<Vec<Directory>, HarnessError> {
        self.run(move |conn| {
            let sql = if include_archived {
                "SELECT directory_id, tenant_id, user_id, workspace_id, path, archived_at FROM directories \
                 WHERE tenant_id = ?1 AND user_id = ?2 AND workspace_id = ?3 ORDER BY path LIMIT ?4"
            } else {
                "SELECT directory_id, tenant_id, user_id, workspace_id, path, archived_at FROM directories \
                 WHERE tenant_id = ?1 AND user_id = ?2 AND workspace_id = ?3 AND archived_at IS NULL ORDER BY path LIMIT ?4"
            };
            let mut stmt = conn.prepare(sql).map_err(sql_err)?;
            let rows = stmt
                .query_map(
                    params![scope.tenant_id, scope.user_id, scope.workspace_id, limit.unwrap_or(u32::MAX)],
                    row_to_directory,
                )
                .map_err(sql_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(sql_err)
        })
        .await
    }

    // ---- repositories -----------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub async fn upsert_repository(
        &self,
        scope: Scope,
        name: String,
        remote_url: String,
        default_branch: String,
        metadata: CanonicalJson,
    ) -> Result<Repository, HarnessError> {
        let now = Utc::now();
        let repository = self
            .run(move |conn| {
                let tx = conn.transaction().map_err(sql_err)?;
                let repository = upsert_repository_tx(&tx, &scope, &name, &remote_url, &default_branch, &metadata, now)?;
                tx.commit().map_err(sql_err)?;
                Ok(repository)
            })
            .await?;
        // Repository mutations are not part of the observed-event wire
        // enumeration (only directory-*/conversation-*/session-* are);
        // callers read the result of this call directly instead.
        Ok(repository)
    }

    pub async fn update_repository(
        &self,
        scope: Scope,
        repository_id: RepositoryId,
        name: Option<String>,
        default_branch: Option<String>,
        metadata: Option<CanonicalJson>,
    ) -> Result<Repository, HarnessError> {
        self.run(move |conn| {
            let tx = conn.transaction().map_err(sql_err)?;
            let mut repository = load_repository_tx(&tx, &scope, repository_id)?;
            if let Some(name) = name {
                repository.name = name;
            }
            if let Some(default_branch) = default_branch {
                repository.default_branch = default_branch;
            }
            if let Some(metadata) = metadata {
                repository.metadata = metadata;
            }
            tx.execute(
                "UPDATE repositories SET name = ?1, default_branch = ?2, metadata = ?3 WHERE repository_id = ?4",
                params![repository.name, repository.default_branch, repository.metadata.canonicalize(), repository_id.to_string()],
            )
            .map_err(sql_err)?;
            tx.commit().map_err(sql_err)?;
            Ok(repository)
        })
        .await
    }

    pub async fn list_repositories(
        &self,
        scope: Scope,
        include_archived: bool,
        limit: Option<u32>,
    ) -> Result<Vec<Repository>, HarnessError> {
        self.run(move |conn| {
            let sql = if include_archived {
                "SELECT repository_id, tenant_id, user_id, workspace_id, name, normalized_remote_url, default_branch, metadata, created_at, archived_at \
                 FROM repositories WHERE tenant_id = ?1 AND user_id = ?2 AND workspace_id = ?3 ORDER BY name LIMIT ?4"
            } else {
                "SELECT repository_id, tenant_id, user_id, workspace_id, name, normalized_remote_url, default_branch, metadata, created_at, archived_at \
                 FROM repositories WHERE tenant_id = ?1 AND user_id = ?2 AND workspace_id = ?3 AND archived_at IS NULL ORDER BY name LIMIT ?4"
            };
            let mut stmt = conn.prepare(sql).map_err(sql_err)?;
            let rows = stmt
                .query_map(
                    params![scope.tenant_id, scope.user_id, scope.workspace_id, limit.unwrap_or(u32::MAX)],
                    row_to_repository,
                )
                .map_err(sql_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(sql_err)
        })
        .await
    }

    pub async fn archive_repository(&self, scope: Scope, repository_id: RepositoryId) -> Result<(), HarnessError> {
        self.run(move |conn| {
            let tx = conn.transaction().map_err(sql_err)?;
            let updated = tx
                .execute(
                    "UPDATE repositories SET archived_at = ?1 \
                     WHERE repository_id = ?2 AND tenant_id = ?3 AND user_id = ?4 AND workspace_id = ?5 AND archived_at IS NULL",
                    params![Utc::now().to_rfc3339(), repository_id.to_string(), scope.tenant_id, scope.user_id, scope.workspace_id],
                )
                .map_err(sql_err)?;
            if updated == 0 {
                return Err(HarnessError::not_found("repository"));
            }
            tx.commit().map_err(sql_err)?;
            Ok(())
        })
        .await
    }

    // ---- conversations ------------------------------------------------

    pub async fn create_conversation(
        &self,
        scope: Scope,
        directory_id: DirectoryId,
        title: String,
        agent_type: AgentType,
        adapter_state: CanonicalJson,
    ) -> Result<Conversation, HarnessError> {
        let now = Utc::now();
        let conversation = self
            .run(move |conn| {
                let tx = conn.transaction().map_err(sql_err)?;
                let conversation_id = ConversationId::new();
                let conversation = Conversation {
                    conversation_id,
                    directory_id,
                    scope,
                    title,
                    agent_type,
                    adapter_state,
                    archived_at: None,
                    created_at: now,
                    updated_at: now,
                };
                tx.execute(
                    "INSERT INTO conversations \
                     (conversation_id, directory_id, tenant_id, user_id, workspace_id, title, agent_type, adapter_state, archived_at, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, ?9, ?9)",
                    params![
                        conversation.conversation_id.to_string(),
                        conversation.directory_id.to_string(),
                        conversation.scope.tenant_id,
                        conversation.scope.user_id,
                        conversation.scope.workspace_id,
                        conversation.title,
                        agent_type_to_str(conversation.agent_type),
                        conversation.adapter_state.canonicalize(),
                        now.to_rfc3339(),
                    ],
                )
                .map_err(sql_err)?;
                tx.commit().map_err(sql_err)?;
                Ok(conversation)
            })
            .await?;
        self.bus.publish(ObservedEvent::ConversationCreated { conversation: conversation.clone() });
        Ok(conversation)
    }

    /// Fetch one conversation by id, used by `pty.start` to resolve the
    /// agent type and adapter state a new session composes its start args
    /// from.
    pub async fn get_conversation(&self, scope: Scope, conversation_id: ConversationId) -> Result<Conversation, HarnessError> {
        self.run(move |conn| {
            let tx = conn.transaction().map_err(sql_err)?;
            let conversation = load_conversation_tx(&tx, &scope, conversation_id)?;
            tx.commit().map_err(sql_err)?;
            Ok(conversation)
        })
        .await
    }

    pub async fn update_conversation(
        &self,
        scope: Scope,
        conversation_id: ConversationId,
        title: Option<String>,
        adapter_state: Option<CanonicalJson>,
    ) -> Result<Conversation, HarnessError> {
        let now = Utc::now();
        let conversation = self
            .run(move |conn| {
                let tx = conn.transaction().map_err(sql_err)?;
                let mut conversation = load_conversation_tx(&tx, &scope, conversation_id)?;
                if let Some(title) = title {
                    conversation.title = title;
                }
                if let Some(adapter_state) = adapter_state {
                    conversation.adapter_state = adapter_state;
                }
                conversation.updated_at = now;
                tx.execute(
                    "UPDATE conversations SET title = ?1, adapter_state = ?2, updated_at = ?3 WHERE conversation_id = ?4",
                    params![conversation.title, conversation.adapter_state.canonicalize(), now.to_rfc3339(), conversation_id.to_string()],
                )
                .map_err(sql_err)?;
                tx.commit().map_err(sql_err)?;
                Ok(conversation)
            })
            .await?;
        self.bus.publish(ObservedEvent::ConversationUpdated { conversation: conversation.clone() });
        Ok(conversation)
    }

    pub async fn archive_conversation(&self, scope: Scope, conversation_id: ConversationId) -> Result<(), HarnessError> {
        self.run(move |conn| {
            let tx = conn.transaction().map_err(sql_err)?;
            let updated = tx
                .execute(
                    "UPDATE conversations SET archived_at = ?1 \
                     WHERE conversation_id = ?2 AND tenant_id = ?3 AND user_id = ?4 AND workspace_id = ?5 AND archived_at IS NULL",
                    params![Utc::now().to_rfc3339(), conversation_id.to_string(), scope.tenant_id, scope.user_id, scope.workspace_id],
                )
                .map_err(sql_err)?;
            if updated == 0 {
                return Err(HarnessError::not_found("conversation"));
            }
            tx.commit().map_err(sql_err)?;
            Ok(())
        })
        .await?;
        self.bus.publish(ObservedEvent::ConversationArchived { conversation_id });
        Ok(())
    }

    pub async fn delete_conversation(&self, scope: Scope, conversation_id: ConversationId) -> Result<(), HarnessError> {
        self.run(move |conn| {
            let tx = conn.transaction().map_err(sql_err)?;
            let deleted = tx
                .execute(
                    "DELETE FROM conversations WHERE conversation_id = ?1 AND tenant_id = ?2 AND user_id = ?3 AND workspace_id = ?4",
                    params![conversation_id.to_string(), scope.tenant_id, scope.user_id, scope.workspace_id],
                )
                .map_err(sql_err)?;
            if deleted == 0 {
                return Err(HarnessError::not_found("conversation"));
            }
            tx.commit().map_err(sql_err)?;
            Ok(())
        })
        .await?;
        self.bus.publish(ObservedEvent::ConversationDeleted { conversation_id });
        Ok(())
    }

    pub async fn list_conversations(
        &self,
        scope: Scope,
        directory_id: Option<DirectoryId>,
        include_archived: bool,
        limit: Option<u32>,
    ) -> Result<Vec<Conversation>, HarnessError> {
        self.run(move |conn| {
            let mut sql = String::from(
                "SELECT conversation_id, directory_id, tenant_id, user_id, workspace_id, title, agent_type, adapter_state, archived_at, created_at, updated_at \
                 FROM conversations WHERE tenant_id = ?1 AND user_id = ?2 AND workspace_id = ?3",
            );
            if !include_archived {
                sql.push_str(" AND archived_at IS NULL");
            }
            if directory_id.is_some() {
                sql.push_str(" AND directory_id = ?5");
            }
            sql.push_str(" ORDER BY created_at LIMIT ?4");

            let mut stmt = conn.prepare(&sql).map_err(sql_err)?;
            let limit = limit.unwrap_or(u32::MAX);
            let rows = if let Some(directory_id) = directory_id {
                stmt.query_map(
                    params![scope.tenant_id, scope.user_id, scope.workspace_id, limit, directory_id.to_string()],
                    row_to_conversation,
                )
            } else {
                stmt.query_map(params![scope.tenant_id, scope.user_id, scope.workspace_id, limit], row_to_conversation)
            }
            .map_err(sql_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(sql_err)
        })
        .await
    }

    // ---- tasks ----------------------------------------------------------

    pub async fn create_task(
        &self,
        scope: Scope,
        repository_id: Option<RepositoryId>,
        title: String,
        description: String,
        order_index: Option<i64>,
    ) -> Result<Task, HarnessError> {
        let now = Utc::now();
        self.run(move |conn| {
            let tx = conn.transaction().map_err(sql_err)?;
            let next_index = match order_index {
                Some(index) => index,
                None => {
                    let max: Option<i64> = tx
                        .query_row(
                            "SELECT MAX(order_index) FROM tasks WHERE tenant_id = ?1 AND user_id = ?2 AND workspace_id = ?3",
                            params![scope.tenant_id, scope.user_id, scope.workspace_id],
                            |row| row.get(0),
                        )
                        .map_err(sql_err)?;
                    max.map(|m| m + 1).unwrap_or(0)
                }
            };
            let task = Task {
                task_id: TaskId::new(),
                scope: scope.clone(),
                repository_id,
                title,
                description,
                status: TaskStatus::Draft,
                order_index: next_index,
                completed_at: None,
                created_at: now,
                updated_at: now,
            };
            tx.execute(
                "INSERT INTO tasks (task_id, tenant_id, user_id, workspace_id, repository_id, title, description, status, order_index, completed_at, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL, ?10, ?10)",
                params![
                    task.task_id.to_string(),
                    task.scope.tenant_id,
                    task.scope.user_id,
                    task.scope.workspace_id,
                    task.repository_id.map(|id| id.to_string()),
                    task.title,
                    task.description,
                    task_status_to_str(task.status),
                    task.order_index,
                    now.to_rfc3339(),
                ],
            )
            .map_err(sql_err)?;
            tx.commit().map_err(sql_err)?;
            Ok(task)
        })
        .await
    }

    pub async fn update_task(
        &self,
        scope: Scope,
        task_id: TaskId,
        title: Option<String>,
        description: Option<String>,
    ) -> Result<Task, HarnessError> {
        self.run(move |conn| {
            let tx = conn.transaction().map_err(sql_err)?;
            let mut task = load_task_tx(&tx, &scope, task_id)?;
            if let Some(title) = title {
                task.title = title;
            }
            if let Some(description) = description {
                task.description = description;
            }
            task.updated_at = Utc::now();
            tx.execute(
                "UPDATE tasks SET title = ?1, description = ?2, updated_at = ?3 WHERE task_id = ?4",
                params![task.title, task.description, task.updated_at.to_rfc3339(), task_id.to_string()],
            )
            .map_err(sql_err)?;
            tx.commit().map_err(sql_err)?;
            Ok(task)
        })
        .await
    }

    /// `Ready/Draft/Complete`: validated against [`Task::can_transition_to`],
    /// rejecting invalid transitions with `Conflict`.
    pub async fn transition_task(&self, scope: Scope, task_id: TaskId, next: TaskStatus) -> Result<Task, HarnessError> {
        self.run(move |conn| {
            let tx = conn.transaction().map_err(sql_err)?;
            let mut task = load_task_tx(&tx, &scope, task_id)?;
            if !task.can_transition_to(next) {
                return Err(HarnessError::conflict(format!(
                    "cannot transition task from {:?} to {:?}",
                    task.status, next
                )));
            }
            task.status = next;
            task.updated_at = Utc::now();
            task.completed_at = if next == TaskStatus::Completed { Some(task.updated_at) } else { None };
            tx.execute(
                "UPDATE tasks SET status = ?1, completed_at = ?2, updated_at = ?3 WHERE task_id = ?4",
                params![
                    task_status_to_str(task.status),
                    task.completed_at.map(|t| t.to_rfc3339()),
                    task.updated_at.to_rfc3339(),
                    task_id.to_string(),
                ],
            )
            .map_err(sql_err)?;
            tx.commit().map_err(sql_err)?;
            Ok(task)
        })
        .await
    }

    pub async fn delete_task(&self, scope: Scope, task_id: TaskId) -> Result<(), HarnessError> {
        self.run(move |conn| {
            let tx = conn.transaction().map_err(sql_err)?;
            let deleted = tx
                .execute(
                    "DELETE FROM tasks WHERE task_id = ?1 AND tenant_id = ?2 AND user_id = ?3 AND workspace_id = ?4",
                    params![task_id.to_string(), scope.tenant_id, scope.user_id, scope.workspace_id],
                )
                .map_err(sql_err)?;
            if deleted == 0 {
                return Err(HarnessError::not_found("task"));
            }
            tx.commit().map_err(sql_err)?;
            Ok(())
        })
        .await
    }

    /// `Reorder(orderedTaskIds)`: rewrites `orderIndex` to `0..n-1` in the
    /// given order; tasks not named keep their previous index, producing a
    /// dense tail above the reordered prefix.
    pub async fn reorder_tasks(&self, scope: Scope, ordered_task_ids: Vec<TaskId>) -> Result<(), HarnessError> {
        self.run(move |conn| {
            let tx = conn.transaction().map_err(sql_err)?;
            for (index, task_id) in ordered_task_ids.iter().enumerate() {
                let updated = tx
                    .execute(
                        "UPDATE tasks SET order_index = ?1 \
                         WHERE task_id = ?2 AND tenant_id = ?3 AND user_id = ?4 AND workspace_id = ?5",
                        params![index as i64, task_id.to_string(), scope.tenant_id, scope.user_id, scope.workspace_id],
                    )
                    .map_err(sql_err)?;
                if updated == 0 {
                    return Err(HarnessError::not_found("task"));
                }
            }
            tx.commit().map_err(sql_err)?;
            Ok(())
        })
        .await
    }

    pub async fn list_tasks(
        &self,
        scope: Scope,
        repository_id: Option<RepositoryId>,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>, HarnessError> {
        self.run(move |conn| {
            let mut sql = String::from(
                "SELECT task_id, tenant_id, user_id, workspace_id, repository_id, title, description, status, order_index, completed_at, created_at, updated_at \
                 FROM tasks WHERE tenant_id = ?1 AND user_id = ?2 AND workspace_id = ?3",
            );
            if repository_id.is_some() {
                sql.push_str(" AND repository_id = ?4");
            }
            if status.is_some() {
                sql.push_str(" AND status = ?5");
            }
            sql.push_str(" ORDER BY order_index");

            let mut stmt = conn.prepare(&sql).map_err(sql_err)?;
            let rows = match (repository_id, status) {
                (Some(repository_id), Some(status)) => stmt.query_map(
                    params![scope.tenant_id, scope.user_id, scope.workspace_id, repository_id.to_string(), task_status_to_str(status)],
                    row_to_task,
                ),
                (Some(repository_id), None) => stmt.query_map(
                    params![scope.tenant_id, scope.user_id, scope.workspace_id, repository_id.to_string()],
                    row_to_task,
                ),
                (None, Some(status)) => stmt.query_map(
                    params![scope.tenant_id, scope.user_id, scope.workspace_id, rusqlite::types::Null, task_status_to_str(status)],
                    row_to_task,
                ),
                (None, None) => stmt.query_map(params![scope.tenant_id, scope.user_id, scope.workspace_id], row_to_task),
            }
            .map_err(sql_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(sql_err)
        })
        .await
    }
}

fn upsert_directory_tx(tx: &Transaction, scope: &Scope, path: &str) -> Result<Directory, HarnessError> {
    let existing_id: Option<String> = tx
        .query_row(
            "SELECT directory_id FROM directories WHERE tenant_id = ?1 AND user_id = ?2 AND workspace_id = ?3 AND path = ?4 AND archived_at IS NULL",
            params![scope.tenant_id, scope.user_id, scope.workspace_id, path],
            |row| row.get(0),
        )
        .optional()
        .map_err(sql_err)?;

    let directory_id = match existing_id {
        Some(id) => parse_id(&id)?,
        None => {
            let directory_id = DirectoryId::new();
            tx.execute(
                "INSERT INTO directories (directory_id, tenant_id, user_id, workspace_id, path, archived_at) VALUES (?1, ?2, ?3, ?4, ?5, NULL)",
                params![directory_id.to_string(), scope.tenant_id, scope.user_id, scope.workspace_id, path],
            )
            .map_err(sql_err)?;
            directory_id
        }
    };
    Ok(Directory { directory_id, scope: scope.clone(), path: path.to_string(), archived_at: None })
}

#[allow(clippy::too_many_arguments)]
fn upsert_repository_tx(
    tx: &Transaction,
    scope: &Scope,
    name: &str,
    remote_url: &str,
    default_branch: &str,
    metadata: &CanonicalJson,
    now: DateTime<Utc>,
) -> Result<Repository, HarnessError> {
    let normalized = normalize_remote_url(remote_url);
    let existing: Option<(String, String)> = tx
        .query_row(
            "SELECT repository_id, created_at FROM repositories \
             WHERE tenant_id = ?1 AND user_id = ?2 AND workspace_id = ?3 AND normalized_remote_url = ?4 AND archived_at IS NULL",
            params![scope.tenant_id, scope.user_id, scope.workspace_id, normalized],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(sql_err)?;

    let (repository_id, created_at) = match existing {
        Some((id, created_at)) => (parse_id::<RepositoryId>(&id)?, parse_timestamp(&created_at)?),
        None => {
            let repository_id = RepositoryId::new();
            tx.execute(
                "INSERT INTO repositories (repository_id, tenant_id, user_id, workspace_id, name, normalized_remote_url, default_branch, metadata, created_at, archived_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL)",
                params![
                    repository_id.to_string(),
                    scope.tenant_id,
                    scope.user_id,
                    scope.workspace_id,
                    name,
                    normalized,
                    default_branch,
                    metadata.canonicalize(),
                    now.to_rfc3339(),
                ],
            )
            .map_err(sql_err)?;
            (repository_id, now)
        }
    };

    Ok(Repository {
        repository_id,
        scope: scope.clone(),
        name: name.to_string(),
        normalized_remote_url: normalized,
        default_branch: default_branch.to_string(),
        metadata: metadata.clone(),
        created_at,
        archived_at: None,
    })
}

fn load_repository_tx(tx: &Transaction, scope: &Scope, repository_id: RepositoryId) -> Result<Repository, HarnessError> {
    tx.query_row(
        "SELECT repository_id, tenant_id, user_id, workspace_id, name, normalized_remote_url, default_branch, metadata, created_at, archived_at \
         FROM repositories WHERE repository_id = ?1 AND tenant_id = ?2 AND user_id = ?3 AND workspace_id = ?4",
        params![repository_id.to_string(), scope.tenant_id, scope.user_id, scope.workspace_id],
        row_to_repository,
    )
    .optional()
    .map_err(sql_err)?
    .ok_or_else(|| HarnessError::not_found("repository"))
}

fn load_conversation_tx(tx: &Transaction, scope: &Scope, conversation_id: ConversationId) -> Result<Conversation, HarnessError> {
    tx.query_row(
        "SELECT conversation_id, directory_id, tenant_id, user_id, workspace_id, title, agent_type, adapter_state, archived_at, created_at, updated_at \
         FROM conversations WHERE conversation_id = ?1 AND tenant_id = ?2 AND user_id = ?3 AND workspace_id = ?4",
        params![conversation_id.to_string(), scope.tenant_id, scope.user_id, scope.workspace_id],
        row_to_conversation,
    )
    .optional()
    .map_err(sql_err)?
    .ok_or_else(|| HarnessError::not_found("conversation"))
}

fn load_task_tx(tx: &Transaction, scope: &Scope, task_id: TaskId) -> Result<Task, HarnessError> {
    tx.query_row(
        "SELECT task_id, tenant_id, user_id, workspace_id, repository_id, title, description, status, order_index, completed_at, created_at, updated_at \
         FROM tasks WHERE task_id = ?1 AND tenant_id = ?2 AND user_id = ?3 AND workspace_id = ?4",
        params![task_id.to_string(), scope.tenant_id, scope.user_id, scope.workspace_id],
        row_to_task,
    )
    .optional()
    .map_err(sql_err)?
    .ok_or_else(|| HarnessError::not_found("task"))
}

fn row_to_directory(row: &rusqlite::Row) -> rusqlite::Result<Directory> {
    let directory_id: String = row.get(0)?;
    let tenant_id: String = row.get(1)?;
    let user_id: String = row.get(2)?;
    let workspace_id: String = row.get(3)?;
    let path: String = row.get(4)?;
    let archived_at: Option<String> = row.get(5)?;
    Ok(Directory {
        directory_id: row_parse_id(0, &directory_id)?,
        scope: Scope { tenant_id, user_id, workspace_id },
        path,
        archived_at: archived_at.map(|s| row_parse_timestamp(5, &s)).transpose()?,
    })
}

fn row_to_repository(row: &rusqlite::Row) -> rusqlite::Result<Repository> {
    let repository_id: String = row.get(0)?;
    let tenant_id: String = row.get(1)?;
    let user_id: String = row.get(2)?;
    let workspace_id: String = row.get(3)?;
    let name: String = row.get(4)?;
    let normalized_remote_url: String = row.get(5)?;
    let default_branch: String = row.get(6)?;
    let metadata: String = row.get(7)?;
    let created_at: String = row.get(8)?;
    let archived_at: Option<String> = row.get(9)?;
    Ok(Repository {
        repository_id: row_parse_id(0, &repository_id)?,
        scope: Scope { tenant_id, user_id, workspace_id },
        name,
        normalized_remote_url,
        default_branch,
        metadata: CanonicalJson(row_parse_json(7, &metadata)?),
        created_at: row_parse_timestamp(8, &created_at)?,
        archived_at: archived_at.map(|s| row_parse_timestamp(9, &s)).transpose()?,
    })
}

fn row_to_conversation(row: &rusqlite::Row) -> rusqlite::Result<Conversation> {
    let conversation_id: String = row.get(0)?;
    let directory_id: String = row.get(1)?;
    let tenant_id: String = row.get(2)?;
    let user_id: String = row.get(3)?;
    let workspace_id: String = row.get(4)?;
    let title: String = row.get(5)?;
    let agent_type: String = row.get(6)?;
    let adapter_state: String = row.get(7)?;
    let archived_at: Option<String> = row.get(8)?;
    let created_at: String = row.get(9)?;
    let updated_at: String = row.get(10)?;
    Ok(Conversation {
        conversation_id: row_parse_id(0, &conversation_id)?,
        directory_id: row_parse_id(1, &directory_id)?,
        scope: Scope { tenant_id, user_id, workspace_id },
        title,
        agent_type: agent_type_from_str(&agent_type),
        adapter_state: CanonicalJson(row_parse_json(7, &adapter_state)?),
        archived_at: archived_at.map(|s| row_parse_timestamp(8, &s)).transpose()?,
        created_at: row_parse_timestamp(9, &created_at)?,
        updated_at: row_parse_timestamp(10, &updated_at)?,
    })
}

fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<Task> {
    let task_id: String = row.get(0)?;
    let tenant_id: String = row.get(1)?;
    let user_id: String = row.get(2)?;
    let workspace_id: String = row.get(3)?;
    let repository_id: Option<String> = row.get(4)?;
    let title: String = row.get(5)?;
    let description: String = row.get(6)?;
    let status: String = row.get(7)?;
    let order_index: i64 = row.get(8)?;
    let completed_at: Option<String> = row.get(9)?;
    let created_at: String = row.get(10)?;
    let updated_at: String = row.get(11)?;
    Ok(Task {
        task_id: row_parse_id(0, &task_id)?,
        scope: Scope { tenant_id, user_id, workspace_id },
        repository_id: repository_id.map(|id| row_parse_id(4, &id)).transpose()?,
        title,
        description,
        status: task_status_from_str(&status),
        order_index,
        completed_at: completed_at.map(|s| row_parse_timestamp(9, &s)).transpose()?,
        created_at: row_parse_timestamp(10, &created_at)?,
        updated_at: row_parse_timestamp(11, &updated_at)?,
    })
}

fn parse_id<T: FromStr>(raw: &str) -> Result<T, HarnessError> {
    raw.parse().map_err(|_| HarnessError::new(ErrorCode::Fatal, "corrupt id in store row"))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, HarnessError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| HarnessError::new(ErrorCode::Fatal, "corrupt timestamp in store row"))
}

/// A row written by this crate should always hold a well-formed id; a
/// parse failure here means on-disk corruption, surfaced the same way
/// `rusqlite` itself reports a column of the wrong shape.
fn row_parse_id<T: FromStr>(column: usize, raw: &str) -> rusqlite::Result<T> {
    raw.parse().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, "corrupt id".into())
    })
}

fn row_parse_timestamp(column: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc)).map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, "corrupt timestamp".into())
    })
}

fn row_parse_json(column: usize, raw: &str) -> rusqlite::Result<serde_json::Value> {
    serde_json::from_str(raw).map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, "corrupt json".into())
    })
}

fn sql_err(e: rusqlite::Error) -> HarnessError {
    HarnessError::transient(format!("store error: {e}"))
}

fn agent_type_to_str(agent_type: AgentType) -> &'static str {
    match agent_type {
        AgentType::Codex => "codex",
        AgentType::Claude => "claude",
        AgentType::Cursor => "cursor",
        AgentType::Terminal => "terminal",
        AgentType::Critique => "critique",
    }
}

fn agent_type_from_str(raw: &str) -> AgentType {
    match raw {
        "claude" => AgentType::Claude,
        "cursor" => AgentType::Cursor,
        "terminal" => AgentType::Terminal,
        "critique" => AgentType::Critique,
        _ => AgentType::Codex,
    }
}

fn task_status_to_str(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Draft => "draft",
        TaskStatus::Ready => "ready",
        TaskStatus::InProgress => "in-progress",
        TaskStatus::Completed => "completed",
    }
}

fn task_status_from_str(raw: &str) -> TaskStatus {
    match raw {
        "ready" => TaskStatus::Ready,
        "in-progress" => TaskStatus::InProgress,
        "completed" => TaskStatus::Completed,
        _ => TaskStatus::Draft,
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
