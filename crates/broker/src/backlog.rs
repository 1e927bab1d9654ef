// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use bytes::Bytes;
use std::collections::VecDeque;

/// One stamped output chunk: `{cursor, chunk}`. `cursor` is strictly
/// monotonic per session, starting at 1.
#[derive(Debug, Clone)]
pub struct OutputChunk {
    pub cursor: u64,
    pub chunk: Bytes,
}

/// Cursor-indexed FIFO of output chunks, bounded by `MaxBacklogBytes`.
///
/// Each chunk is kept as a distinct entry, rather than a fixed-capacity
/// circular byte array addressed by global offset, so a late `Attach` can
/// hand back exact `(cursor, chunk)` pairs rather than an arbitrary byte
/// range. Eviction is FIFO by cursor.
#[derive(Debug)]
pub struct Backlog {
    entries: VecDeque<OutputChunk>,
    total_len: usize,
    max_bytes: usize,
}

impl Backlog {
    pub fn new(max_bytes: usize) -> Self {
        Self { entries: VecDeque::new(), total_len: 0, max_bytes }
    }

    /// Store `chunk` under `cursor`, truncating from the head when the
    /// chunk alone exceeds `max_bytes`, then evicting the oldest entries
    /// until `sum(len) <= max_bytes`. Eviction never touches the entry
    /// just inserted: once truncated it fits alone within the cap, so the
    /// FIFO eviction loop below always stops at or before it.
    pub fn push(&mut self, cursor: u64, chunk: Bytes) {
        let chunk = if chunk.len() > self.max_bytes {
            chunk.slice(chunk.len() - self.max_bytes..)
        } else {
            chunk
        };
        self.total_len += chunk.len();
        self.entries.push_back(OutputChunk { cursor, chunk });

        while self.total_len > self.max_bytes {
            let Some(oldest) = self.entries.pop_front() else { break };
            self.total_len -= oldest.chunk.len();
        }
    }

    /// Every entry with `cursor > since_cursor`, in cursor order.
    pub fn replay_since(&self, since_cursor: u64) -> impl Iterator<Item = &OutputChunk> {
        self.entries.iter().filter(move |e| e.cursor > since_cursor)
    }

    pub fn total_bytes(&self) -> usize {
        self.total_len
    }
}

#[cfg(test)]
#[path = "backlog_tests.rs"]
mod tests;
