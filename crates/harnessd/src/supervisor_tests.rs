#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use super::*;
use crate::config::SupervisorConfig;

fn test_config(port: u16, store_dir: &std::path::Path, notify_dir: &std::path::Path) -> SupervisorConfig {
    SupervisorConfig {
        host: "127.0.0.1".to_string(),
        port,
        auth_token: None,
        tenant_id: "tenant-a".to_string(),
        user_id: "user-a".to_string(),
        workspace_id: "workspace-a".to_string(),
        store_path: Some(store_dir.join("store.sqlite3")),
        legacy_store_path: None,
        notify_dir: Some(notify_dir.to_path_buf()),
        subscription_queue_capacity: 16,
        usage_refresh_ms: 50,
        log_format: "text".to_string(),
        log_level: "info".to_string(),
    }
}

#[tokio::test]
async fn binds_and_serves_a_command_then_shuts_down_gracefully() {
    let store_dir = tempfile::tempdir().expect("store dir");
    let notify_dir = tempfile::tempdir().expect("notify dir");
    let config = test_config(0, store_dir.path(), notify_dir.path());

    let supervisor = Supervisor::bind(&config).await.expect("bind");
    let addr = supervisor.local_addr().expect("local addr");
    let shutdown = supervisor.shutdown_handle();

    let run_handle = tokio::spawn(async move { supervisor.run().await });

    let stream = TcpStream::connect(addr).await.expect("connect");
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    write_half.write_all(b"{\"type\":\"command\",\"commandId\":\"c1\",\"command\":{\"type\":\"session.list\"}}\n").await.expect("write");
    let accepted = lines.next_line().await.expect("read").expect("line");
    assert!(accepted.contains("command.accepted"));

    shutdown.cancel();
    tokio::time::timeout(std::time::Duration::from_secs(2), run_handle).await.expect("supervisor stopped in time").expect("join");
}
