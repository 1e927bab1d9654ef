#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use super::*;
use harness_core::envelope::Command;
use harness_core::model::AgentType;
use harness_core::{EventBus, ErrorCode};

fn scope() -> Scope {
    Scope::new("tenant-a", "user-a", "workspace-a").expect("valid scope")
}

async fn ctx() -> (Context, tempfile::TempDir) {
    let bus = Arc::new(EventBus::new());
    let store = Arc::new(WorkspaceStore::open_in_memory(Arc::clone(&bus)).await.expect("open store"));
    let coordinator = Arc::new(Coordinator::new(Arc::clone(&bus)));
    let dir = tempfile::tempdir().expect("tempdir");
    let config = Arc::new(ServerConfig {
        bind_addr: "127.0.0.1:0".parse().expect("addr"),
        auth_token: None,
        notify_dir: dir.path().to_path_buf(),
        scope: scope(),
        subscription_queue_capacity: 16,
    });
    (Context { store, coordinator, config, bus }, dir)
}

#[tokio::test]
async fn directory_upsert_then_list_round_trips() {
    let (ctx, _dir) = ctx().await;
    let upserted = dispatch(&ctx, Command::DirectoryUpsert { path: "/repo/one".to_string() }).await.expect("upsert");
    assert_eq!(upserted.as_map().expect("object").get("path").and_then(|v| v.as_str()), Some("/repo/one"));

    let listed = dispatch(&ctx, Command::DirectoryList { include_archived: false, limit: None }).await.expect("list");
    let array = listed.0.as_array().expect("array");
    assert_eq!(array.len(), 1);
}

#[tokio::test]
async fn directory_archive_of_unknown_id_is_not_found() {
    let (ctx, _dir) = ctx().await;
    let err = dispatch(&ctx, Command::DirectoryArchive { directory_id: harness_core::ids::DirectoryId::new() })
        .await
        .expect_err("should fail");
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn task_create_ready_complete_transitions() {
    let (ctx, _dir) = ctx().await;
    let created = dispatch(
        &ctx,
        Command::TaskCreate { repository_id: None, title: "do the thing".to_string(), description: String::new(), order_index: None },
    )
    .await
    .expect("create");
    let task_id: harness_core::ids::TaskId =
        created.as_map().expect("object").get("taskId").and_then(|v| v.as_str()).expect("taskId").parse().expect("uuid");

    dispatch(&ctx, Command::TaskReady { task_id }).await.expect("ready");
    let completed_directly = dispatch(&ctx, Command::TaskComplete { task_id }).await;
    assert_eq!(completed_directly.unwrap_err().code, ErrorCode::Conflict);
}

#[tokio::test]
async fn conversation_create_then_pty_start_runs_a_real_child() {
    let (ctx, _dir) = ctx().await;
    let directory = dispatch(&ctx, Command::DirectoryUpsert { path: "/repo/one".to_string() }).await.expect("dir upsert");
    let directory_id: harness_core::ids::DirectoryId =
        directory.as_map().expect("object").get("directoryId").and_then(|v| v.as_str()).expect("id").parse().expect("uuid");

    let conversation = dispatch(
        &ctx,
        Command::ConversationCreate {
            directory_id,
            title: "session one".to_string(),
            agent_type: AgentType::Terminal,
            adapter_state: CanonicalJson::empty_object(),
        },
    )
    .await
    .expect("create conversation");
    let conversation_id: harness_core::ids::ConversationId = conversation
        .as_map()
        .expect("object")
        .get("conversationId")
        .and_then(|v| v.as_str())
        .expect("id")
        .parse()
        .expect("uuid");

    let started = dispatch(
        &ctx,
        Command::PtyStart {
            conversation_id,
            command: "sh".to_string(),
            args: vec!["-c".to_string(), "printf hi".to_string()],
            env: Default::default(),
            cwd: None,
            cols: 80,
            rows: 24,
        },
    )
    .await
    .expect("pty start");
    assert!(started.as_map().expect("object").contains_key("sessionId"));

    let status = ctx.coordinator.session_status(conversation_id).await.expect("status");
    assert!(status.live || status.runtime_status.is_terminal());
}

#[tokio::test]
async fn normalize_path_expands_relative_to_absolute() {
    let result = normalize_path("relative/dir");
    assert!(std::path::Path::new(&result).is_absolute());
}
