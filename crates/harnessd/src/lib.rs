// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervisor binary library: wires the Workspace Store, Session
//! Coordinator, and Stream Server into a single long-running process.

pub mod config;
pub mod supervisor;
pub mod usage;

pub use config::SupervisorConfig;
pub use supervisor::Supervisor;
