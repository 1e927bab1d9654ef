// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::net::SocketAddr;
use std::path::PathBuf;

use harness_core::Scope;

/// Stream Server configuration. Bound at process start by
/// the Supervisor; a single listener serves a single scope, matching "a
/// single store file per workspace."
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// When set, every connection must `auth{token}` with this value
    /// before any other envelope is accepted.
    pub auth_token: Option<String>,
    /// Directory notify-hook files are written under, one file per
    /// session named `<sessionId>.jsonl`. Defaults to the OS temp dir,
    /// namespaced per-pid.
    pub notify_dir: PathBuf,
    pub scope: Scope,
    /// Per-subscription bounded queue capacity.
    pub subscription_queue_capacity: usize,
}

impl ServerConfig {
    pub fn notify_path_for(&self, session_id: harness_core::ids::SessionId) -> PathBuf {
        self.notify_dir.join(format!("{session_id}.jsonl"))
    }

    /// OTLP-log and history side-channel files are written alongside the
    /// notify file, one per session per kind.
    pub fn otlp_path_for(&self, session_id: harness_core::ids::SessionId) -> PathBuf {
        self.notify_dir.join(format!("{session_id}.otlp.jsonl"))
    }

    pub fn history_path_for(&self, session_id: harness_core::ids::SessionId) -> PathBuf {
        self.notify_dir.join(format!("{session_id}.history.jsonl"))
    }
}

pub const DEFAULT_SUBSCRIPTION_QUEUE_CAPACITY: usize = 256;
