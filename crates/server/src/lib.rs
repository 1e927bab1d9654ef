// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stream Server: a single TCP listener speaking a line-delimited JSON
//! protocol — auth, then a strictly-ordered command stream per
//! connection, plus raw `pty.input`/`pty.resize`/`pty.signal` and
//! fan-out `stream.event` delivery for every subscription and PTY
//! attachment a connection opens.

pub mod auth;
pub mod config;
pub mod connection;
pub mod router;
pub mod server;
pub mod subscription;

pub use config::ServerConfig;
pub use router::Context;
pub use server::{serve, Server};
