// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process supervisor: binds the Workspace Store, Session Coordinator, and
//! Stream Server behind one shared [`EventBus`], starts the background
//! usage refresher, and carries out the shutdown sequence in order: stop
//! accepting new connections, close live sessions, flush backlog drains,
//! close the store, then exit.

use std::sync::Arc;

use harness_core::EventBus;
use harness_coordinator::Coordinator;
use harness_server::{Context, Server, ServerConfig};
use harness_store::WorkspaceStore;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::SupervisorConfig;
use crate::usage;

pub struct Supervisor {
    // Held only to keep the store's connection alive for the process
    // lifetime; the server reaches it through `Context::store` instead.
    #[allow(dead_code)]
    store: Arc<WorkspaceStore>,
    coordinator: Arc<Coordinator>,
    server: Server,
    shutdown: CancellationToken,
    usage_refresh_interval: std::time::Duration,
}

impl Supervisor {
    /// Binds every component without accepting connections yet. A bind
    /// failure here is `Fatal`— the process should not start.
    pub async fn bind(config: &SupervisorConfig) -> Result<Self, harness_core::HarnessError> {
        let bus = Arc::new(EventBus::new());
        let scope = config
            .scope()
            .map_err(|e| harness_core::HarnessError::fatal(format!("invalid scope: {e}")))?;

        let store = Arc::new(
            WorkspaceStore::open(config.store_path(), config.legacy_store_path.clone(), Arc::clone(&bus)).await?,
        );
        let coordinator = Arc::new(Coordinator::new(Arc::clone(&bus)));

        let notify_dir = config.notify_dir();
        std::fs::create_dir_all(&notify_dir)
            .map_err(|e| harness_core::HarnessError::fatal(format!("failed to create notify dir: {e}")))?;

        let server_config = Arc::new(ServerConfig {
            bind_addr: config
                .bind_addr()
                .map_err(|e| harness_core::HarnessError::fatal(format!("invalid bind address: {e}")))?,
            auth_token: config.auth_token.clone(),
            notify_dir,
            scope,
            subscription_queue_capacity: config.subscription_queue_capacity,
        });

        let ctx = Arc::new(Context { store: Arc::clone(&store), coordinator: Arc::clone(&coordinator), config: server_config, bus });
        let server = Server::bind(ctx).await?;

        Ok(Self {
            store,
            coordinator,
            server,
            shutdown: CancellationToken::new(),
            usage_refresh_interval: config.usage_refresh_interval(),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.server.local_addr()
    }

    /// A token the caller can cancel to trigger the shutdown sequence
    /// from outside (e.g. a Ctrl-C handler in `main`).
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Runs until `shutdown_handle()` is cancelled, then carries out the
    /// graceful shutdown sequence.
    pub async fn run(&self) {
        usage::spawn(Arc::clone(&self.coordinator), self.usage_refresh_interval, self.shutdown.clone());

        self.server.run(self.shutdown.clone()).await;

        info!("supervisor shutting down: closing live sessions");
        for session in self.coordinator.list_sessions().await {
            if !session.runtime_status.is_terminal() {
                let _ = self.coordinator.signal(session.session_id, harness_core::model::Signal::Terminate).await;
            }
        }

        // Give the PTY hosts a brief grace window to flush their last
        // backlog drain before the process exits; sessions that haven't
        // reported exit by then are abandoned along with the process.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        info!("supervisor shutdown complete");
    }
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
