#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use harness_core::{EventBus, Scope};
use harness_coordinator::Coordinator;
use harness_store::WorkspaceStore;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::config::ServerConfig;

async fn spawn_server() -> (std::net::SocketAddr, CancellationToken, tempfile::TempDir) {
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
    let ctx = Arc::new(Context { store, coordinator, config, bus });
    let server = Server::bind(ctx).await.expect("bind");
    let addr = server.local_addr().expect("local addr");
    let shutdown = CancellationToken::new();
    let child_shutdown = shutdown.clone();
    tokio::spawn(async move { server.run(child_shutdown).await });
    (addr, shutdown, dir)
}

#[tokio::test]
async fn accepts_a_connection_and_completes_a_command() {
    let (addr, shutdown, _dir) = spawn_server().await;
    let stream = TcpStream::connect(addr).await.expect("connect");
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    write_half.write_all(b"{\"type\":\"command\",\"commandId\":\"c1\",\"command\":{\"type\":\"session.list\"}}\n").await.expect("write");

    let accepted = lines.next_line().await.expect("read").expect("some line");
    assert!(accepted.contains("command.accepted"));
    let completed = lines.next_line().await.expect("read").expect("some line");
    assert!(completed.contains("command.completed"));

    shutdown.cancel();
}

#[tokio::test]
async fn rejects_commands_before_auth_when_token_configured() {
    let bus = Arc::new(EventBus::new());
    let store = Arc::new(WorkspaceStore::open_in_memory(Arc::clone(&bus)).await.expect("open store"));
    let coordinator = Arc::new(Coordinator::new(Arc::clone(&bus)));
    let dir = tempfile::tempdir().expect("tempdir");
    let config = Arc::new(ServerConfig {
        bind_addr: "127.0.0.1:0".parse().expect("addr"),
        auth_token: Some("secret".to_string()),
        notify_dir: dir.path().to_path_buf(),
        scope: Scope::new("tenant-a", "user-a", "workspace-a").expect("scope"),
        subscription_queue_capacity: 16,
    });
    let ctx = Arc::new(Context { store, coordinator, config, bus });
    let server = Server::bind(ctx).await.expect("bind");
    let addr = server.local_addr().expect("local addr");
    let shutdown = CancellationToken::new();
    let child_shutdown = shutdown.clone();
    tokio::spawn(async move { server.run(child_shutdown).await });

    let stream = TcpStream::connect(addr).await.expect("connect");
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    write_half.write_all(b"{\"type\":\"command\",\"commandId\":\"c1\",\"command\":{\"type\":\"session.list\"}}\n").await.expect("write");
    let reply = lines.next_line().await.expect("read").expect("some line");
    assert!(reply.contains("auth.error"));

    shutdown.cancel();
}

#[tokio::test]
async fn accepts_after_correct_auth_token() {
    let bus = Arc::new(EventBus::new());
    let store = Arc::new(WorkspaceStore::open_in_memory(Arc::clone(&bus)).await.expect("open store"));
    let coordinator = Arc::new(Coordinator::new(Arc::clone(&bus)));
    let dir = tempfile::tempdir().expect("tempdir");
    let config = Arc::new(ServerConfig {
        bind_addr: "127.0.0.1:0".parse().expect("addr"),
        auth_token: Some("secret".to_string()),
        notify_dir: dir.path().to_path_buf(),
        scope: Scope::new("tenant-a", "user-a", "workspace-a").expect("scope"),
        subscription_queue_capacity: 16,
    });
    let ctx = Arc::new(Context { store, coordinator, config, bus });
    let server = Server::bind(ctx).await.expect("bind");
    let addr = server.local_addr().expect("local addr");
    let shutdown = CancellationToken::new();
    let child_shutdown = shutdown.clone();
    tokio::spawn(async move { server.run(child_shutdown).await });

    let stream = TcpStream::connect(addr).await.expect("connect");
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    write_half.write_all(b"{\"type\":\"auth\",\"token\":\"secret\"}\n").await.expect("write");
    let reply = lines.next_line().await.expect("read").expect("some line");
    assert!(reply.contains("auth.ok"));

    shutdown.cancel();
}
