// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! TCP listener binding for the Stream Server. Spawns one
//! [`crate::connection::handle`] task per accepted socket and stops
//! accepting once the Supervisor cancels the shared token — graceful
//! shutdown stops taking new connections before draining sessions.

use std::sync::Arc;

use harness_core::HarnessError;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::router::Context;

/// A bound listener plus the context every connection it spawns shares.
pub struct Server {
    listener: TcpListener,
    ctx: Arc<Context>,
}

impl Server {
    /// Binds `ctx.config.bind_addr` without accepting any connections yet.
    pub async fn bind(ctx: Arc<Context>) -> Result<Self, HarnessError> {
        let listener = TcpListener::bind(ctx.config.bind_addr)
            .await
            .map_err(|err| HarnessError::fatal(format!("failed to bind {}: {err}", ctx.config.bind_addr)))?;
        Ok(Self { listener, ctx })
    }

    /// The address actually bound, useful when `bind_addr`'s port is 0.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` is cancelled, spawning one
    /// [`crate::connection::handle`] task per socket. Each connection
    /// task runs independently of this loop and of each other; shutting
    /// down the listener does not close already-accepted connections —
    /// the Supervisor does that separately by cancelling the session
    /// coordinator's own tasks.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(addr = ?self.listener.local_addr().ok(), "stream server listening");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((socket, peer)) => {
                            if let Err(err) = socket.set_nodelay(true) {
                                warn!(%peer, %err, "failed to set TCP_NODELAY");
                            }
                            let ctx = Arc::clone(&self.ctx);
                            tokio::spawn(async move { crate::connection::handle(socket, ctx).await });
                        }
                        Err(err) => {
                            warn!(%err, "failed to accept connection");
                        }
                    }
                }
            }
        }
        info!("stream server stopped accepting connections");
    }
}

/// Convenience entry point: bind and run until `shutdown` fires.
pub async fn serve(ctx: Arc<Context>, shutdown: CancellationToken) -> Result<(), HarnessError> {
    let server = Server::bind(ctx).await?;
    server.run(shutdown).await;
    Ok(())
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
