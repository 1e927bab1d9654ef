// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Schema migrations, applied on every open: schema is versioned and
//! migrations run on open. Each entry in [`MIGRATIONS`] runs at
//! most once, tracked by an incrementing `schema_version`.

use rusqlite::Connection;

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE directories (
        directory_id TEXT PRIMARY KEY,
        tenant_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        workspace_id TEXT NOT NULL,
        path TEXT NOT NULL,
        archived_at TEXT
    );
    CREATE UNIQUE INDEX directories_scope_path_active
        ON directories (tenant_id, user_id, workspace_id, path)
        WHERE archived_at IS NULL;

    CREATE TABLE repositories (
        repository_id TEXT PRIMARY KEY,
        tenant_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        workspace_id TEXT NOT NULL,
        name TEXT NOT NULL,
        normalized_remote_url TEXT NOT NULL,
        default_branch TEXT NOT NULL,
        metadata TEXT NOT NULL,
        created_at TEXT NOT NULL,
        archived_at TEXT
    );
    CREATE UNIQUE INDEX repositories_scope_url_active
        ON repositories (tenant_id, user_id, workspace_id, normalized_remote_url)
        WHERE archived_at IS NULL;

    CREATE TABLE conversations (
        conversation_id TEXT PRIMARY KEY,
        directory_id TEXT NOT NULL,
        tenant_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        workspace_id TEXT NOT NULL,
        title TEXT NOT NULL,
        agent_type TEXT NOT NULL,
        adapter_state TEXT NOT NULL,
        archived_at TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE INDEX conversations_by_directory ON conversations (directory_id);

    CREATE TABLE tasks (
        task_id TEXT PRIMARY KEY,
        tenant_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        workspace_id TEXT NOT NULL,
        repository_id TEXT,
        title TEXT NOT NULL,
        description TEXT NOT NULL,
        status TEXT NOT NULL,
        order_index INTEGER NOT NULL,
        completed_at TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE INDEX tasks_by_repository ON tasks (repository_id);
    CREATE INDEX tasks_by_scope_order ON tasks (tenant_id, user_id, workspace_id, order_index);
    "#,
];

/// Apply every migration not yet recorded in `schema_version`. Idempotent:
/// running against an already-current database is a no-op.
pub fn apply(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")?;
    let current: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| row.get(0))?;

    let tx = conn.transaction()?;
    for (index, migration) in MIGRATIONS.iter().enumerate() {
        let version = index as i64 + 1;
        if version <= current {
            continue;
        }
        tx.execute_batch(migration)?;
        tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    }
    tx.commit()
}

#[cfg(test)]
#[path = "migrations_tests.rs"]
mod tests;
