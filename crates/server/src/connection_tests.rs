#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use harness_core::envelope::Command;
use harness_core::json::CanonicalJson;
use harness_core::model::AgentType;
use harness_core::{EventBus, Scope};
use harness_coordinator::Coordinator;
use harness_store::WorkspaceStore;
use tokio::sync::mpsc;

use super::*;
use crate::config::ServerConfig;

async fn ctx() -> (Arc<Context>, tempfile::TempDir) {
    let bus = Arc::new(EventBus::new());
    let store = Arc::new(WorkspaceStore::open_in_memory(Arc::clone(&bus)).await.expect("open store"));
    let coordinator = Arc::new(Coordinator::new(Arc::clone(&bus)));
    let dir = tempfile::tempdir().expect("tempdir");
    let config = Arc::new(ServerConfig {
        bind_addr: "127.0.0.1:0".parse().expect("addr"),
        auth_token: None,
        notify_dir: dir.path().to_path_buf(),
        scope: Scope::new("tenant-a", "user-a", "workspace-a").expect("scope"),
        subscription_queue_capacity: 16,
    });
    (Arc::new(Context { store, coordinator, config, bus }), dir)
}

#[tokio::test]
async fn stream_subscribe_then_unsubscribe_stops_delivery() {
    let (ctx, _dir) = ctx().await;
    let (deliver_tx, mut deliver_rx) = mpsc::unbounded_channel();
    let mut subscriptions = HashMap::new();
    let mut event_subscriptions = HashMap::new();
    let mut attachments = HashMap::new();

    let result = handle_command(
        &ctx,
        Command::StreamSubscribe { filters: CanonicalJson::empty_object(), include_output: false, after_cursor: None },
        &deliver_tx,
        &mut subscriptions,
        &mut event_subscriptions,
        &mut attachments,
    )
    .await
    .expect("subscribe");
    let subscription_id: harness_core::ids::SubscriptionId =
        result.as_map().expect("object").get("subscriptionId").and_then(|v| v.as_str()).expect("id").parse().expect("uuid");
    assert_eq!(subscriptions.len(), 1);

    ctx.store.upsert_directory(ctx.config.scope.clone(), "/repo/one".to_string()).await.expect("upsert");
    let delivered = tokio::time::timeout(std::time::Duration::from_secs(1), deliver_rx.recv()).await.expect("not timed out").expect("some event");
    match delivered {
        ServerEnvelope::StreamEvent { subscription_id: id, .. } => assert_eq!(id, subscription_id),
        other => panic!("unexpected envelope: {other:?}"),
    }

    handle_command(
        &ctx,
        Command::StreamUnsubscribe { subscription_id },
        &deliver_tx,
        &mut subscriptions,
        &mut event_subscriptions,
        &mut attachments,
    )
    .await
    .expect("unsubscribe");
    assert!(subscriptions.is_empty());
}

#[tokio::test]
async fn pty_attach_then_detach_releases_the_broker_handle() {
    let (ctx, dir) = ctx().await;
    let directory = ctx.store.upsert_directory(ctx.config.scope.clone(), "/repo/two".to_string()).await.expect("upsert");
    let conversation = ctx
        .store
        .create_conversation(ctx.config.scope.clone(), directory.directory_id, "s".to_string(), AgentType::Terminal, CanonicalJson::empty_object())
        .await
        .expect("create conversation");
    let session_id = conversation.session_id();
    ctx.coordinator
        .start_session(harness_coordinator::StartSessionArgs {
            session_id,
            agent_type: AgentType::Terminal,
            command: "sh",
            args: &["-c".to_string(), "printf hi".to_string()],
            env: &Default::default(),
            cwd: None,
            cols: 80,
            rows: 24,
            notify_path: Some(dir.path().join("n.jsonl")),
            otlp_path: None,
            history_path: None,
        })
        .await
        .expect("start session");

    let (deliver_tx, mut deliver_rx) = mpsc::unbounded_channel();
    let mut subscriptions = HashMap::new();
    let mut event_subscriptions = HashMap::new();
    let mut attachments = HashMap::new();

    let result = handle_command(
        &ctx,
        Command::PtyAttach { session_id, since_cursor: 0, include_output: true },
        &deliver_tx,
        &mut subscriptions,
        &mut event_subscriptions,
        &mut attachments,
    )
    .await
    .expect("attach");
    let attachment_id: harness_core::ids::AttachmentId =
        result.as_map().expect("object").get("attachmentId").and_then(|v| v.as_str()).expect("id").parse().expect("uuid");
    assert_eq!(attachments.len(), 1);

    let _ = tokio::time::timeout(std::time::Duration::from_secs(1), deliver_rx.recv()).await;

    handle_command(
        &ctx,
        Command::PtyDetach { attachment_id },
        &deliver_tx,
        &mut subscriptions,
        &mut event_subscriptions,
        &mut attachments,
    )
    .await
    .expect("detach");
    assert!(attachments.is_empty());
}
