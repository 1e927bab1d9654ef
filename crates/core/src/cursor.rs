// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide monotonic `u64` assigned at the moment an observed event is
/// published. Shared by the Session Coordinator, the Workspace Store, and
/// the Stream Server — every observed event, regardless of producer, draws
/// its cursor from a single allocator so clients can resume with a single
/// `afterCursor`.
#[derive(Debug, Default)]
pub struct CursorAllocator(AtomicU64);

impl CursorAllocator {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Returns the next cursor value, starting at 1.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// The most recently issued cursor, or 0 if none has been issued yet.
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
#[path = "cursor_tests.rs"]
mod tests;
