// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background process-usage refresher: a periodic background refresh
//! (≈250 ms) computing per-session process-usage samples (cpu%,
//! mem MB, status) from OS counters and publishing changes. An interval
//! timer races a cancellation token, re-snapshotting every live session's
//! process on each tick via `sysinfo`.

use std::sync::Arc;

use harness_core::model::ProcessUsage;
use sysinfo::{Pid, System};
use tokio_util::sync::CancellationToken;

use harness_coordinator::Coordinator;

/// Spawns the refresher; returns immediately, the task runs until
/// `shutdown` is cancelled.
pub fn spawn(coordinator: Arc<Coordinator>, interval: std::time::Duration, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut system = System::new_all();
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }

            let sessions = coordinator.list_sessions().await;
            if sessions.iter().all(|s| s.pid.is_none()) {
                continue;
            }
            system.refresh_all();

            for session in &sessions {
                let Some(pid) = session.pid else { continue };
                let Some(process) = system.process(Pid::from_u32(pid as u32)) else { continue };
                let usage = ProcessUsage {
                    cpu_millipercent: (process.cpu_usage() * 1000.0) as u32,
                    mem_kb: process.memory(),
                };
                coordinator.update_usage(session.session_id, usage).await;
            }
        }
    });
}

#[cfg(test)]
#[path = "usage_tests.rs"]
mod tests;
