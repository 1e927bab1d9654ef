// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::Parser;

/// Multi-agent terminal harness daemon: binds the Workspace Store, Session
/// Coordinator, and Stream Server, and supervises them until shutdown.
#[derive(Debug, Clone, Parser)]
#[command(name = "harnessd", version, about)]
pub struct SupervisorConfig {
    /// Host to bind the Stream Server on.
    #[arg(long, default_value = "127.0.0.1", env = "HARNESSD_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 7777, env = "HARNESSD_PORT")]
    pub port: u16,

    /// Bearer token every connection must present via `auth`. If unset,
    /// auth is disabled — only appropriate when bound to loopback.
    #[arg(long, env = "HARNESSD_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Tenant component of the workspace scope this process serves.
    #[arg(long, env = "HARNESSD_TENANT_ID")]
    pub tenant_id: String,

    /// User component of the workspace scope this process serves.
    #[arg(long, env = "HARNESSD_USER_ID")]
    pub user_id: String,

    /// Workspace component of the workspace scope this process serves.
    #[arg(long, env = "HARNESSD_WORKSPACE_ID")]
    pub workspace_id: String,

    /// Path to the workspace-scoped store file. Defaults under the OS
    /// data directory, namespaced by scope.
    #[arg(long, env = "HARNESSD_STORE_PATH")]
    pub store_path: Option<PathBuf>,

    /// Path to a pre-existing non-scoped store file to migrate in on
    /// first run.
    #[arg(long, env = "HARNESSD_LEGACY_STORE_PATH")]
    pub legacy_store_path: Option<PathBuf>,

    /// Directory notify/OTLP/history side-channel files are written
    /// under. Defaults to the OS temp dir, namespaced by pid.
    #[arg(long, env = "HARNESSD_NOTIFY_DIR")]
    pub notify_dir: Option<PathBuf>,

    /// Per-subscription bounded queue capacity.
    #[arg(long, default_value_t = harness_server::config::DEFAULT_SUBSCRIPTION_QUEUE_CAPACITY, env = "HARNESSD_SUBSCRIPTION_QUEUE_CAPACITY")]
    pub subscription_queue_capacity: usize,

    /// Background process-usage refresh interval in milliseconds (spec
    /// §4.K: "≈250 ms").
    #[arg(long, default_value_t = 250, env = "HARNESSD_USAGE_REFRESH_MS")]
    pub usage_refresh_ms: u64,

    /// Log format (json or text).
    #[arg(long, default_value = "json", env = "HARNESSD_LOG_FORMAT")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "HARNESSD_LOG_LEVEL")]
    pub log_level: String,
}

impl SupervisorConfig {
    pub fn bind_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("invalid bind address: {e}")))
    }

    pub fn usage_refresh_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.usage_refresh_ms)
    }

    pub fn store_path(&self) -> PathBuf {
        self.store_path.clone().unwrap_or_else(|| default_store_dir().join(self.scope_storage_key()).join("store.sqlite3"))
    }

    pub fn notify_dir(&self) -> PathBuf {
        self.notify_dir.clone().unwrap_or_else(|| std::env::temp_dir().join(format!("harnessd-{}", std::process::id())))
    }

    fn scope_storage_key(&self) -> String {
        format!("{}/{}/{}", self.tenant_id, self.user_id, self.workspace_id)
    }

    pub fn scope(&self) -> Result<harness_core::Scope, harness_core::scope::EmptyScopeComponent> {
        harness_core::Scope::new(self.tenant_id.clone(), self.user_id.clone(), self.workspace_id.clone())
    }
}

fn default_store_dir() -> PathBuf {
    dirs_data_dir().join("harnessd")
}

/// Minimal `dirs`-style data-dir resolution without adding the `dirs`
/// crate: `XDG_DATA_HOME`, falling back to `~/.local/share`.
fn dirs_data_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        if !xdg.is_empty() {
            return PathBuf::from(xdg);
        }
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".local/share")
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
