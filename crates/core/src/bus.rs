// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The process-wide observed-event bus. Stamps every [`ObservedEvent`]
//! with a fresh cursor at the moment of publication and fans it out to
//! every subscriber — the Session Coordinator and the Workspace Store
//! both hold an `Arc<EventBus>` and publish into it; the Stream Server
//! holds the same `Arc` and subscribes from it to drive
//! `stream.event` delivery. A `broadcast::Sender` hub that hands out a
//! cloned receiver per subscription.
//!
//! Living in `harness-core` rather than `harness-server` breaks the cyclic
//! dependency between them: the Coordinator and Store must publish
//! without depending on the crate that owns subscriptions.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::broadcast;

use crate::cursor::CursorAllocator;
use crate::envelope::ObservedEvent;

/// Default broadcast channel capacity. A lagging subscriber that falls
/// behind by more than this sees `RecvError::Lagged`, which the Stream
/// Server surfaces to the client as a resume gap.
pub const DEFAULT_BUS_CAPACITY: usize = 4096;

/// Retention horizon: events older than this many entries behind
/// the most recent publish are not replayable by a fresh `afterCursor`
/// subscription — the same entry count as the broadcast channel capacity,
/// so a subscriber that replays the full retention window never also
/// needs the broadcast channel's own lag recovery.
pub const DEFAULT_RETENTION: usize = DEFAULT_BUS_CAPACITY;

/// One event as delivered off the bus: the cursor it was published with,
/// plus the event itself.
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub cursor: u64,
    pub event: ObservedEvent,
}

pub struct EventBus {
    cursor: CursorAllocator,
    sender: broadcast::Sender<PublishedEvent>,
    /// Bounded replay buffer backing `afterCursor` resume: a cursor-indexed
    /// FIFO with the oldest entry evicted first, the same shape as the
    /// Session Broker's own output backlog. `tokio::sync::broadcast::
    /// Receiver::subscribe` only ever sees events sent after it
    /// subscribes, so replaying already-published history needs this
    /// separate retained copy.
    retained: Mutex<VecDeque<PublishedEvent>>,
    retention: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self {
            cursor: CursorAllocator::new(),
            sender,
            retained: Mutex::new(VecDeque::with_capacity(DEFAULT_RETENTION)),
            retention: DEFAULT_RETENTION,
        }
    }

    /// Assign the next cursor and broadcast `event`, returning the
    /// assigned cursor so the caller can also report it back to a direct
    /// command response if needed.
    pub fn publish(&self, event: ObservedEvent) -> u64 {
        let cursor = self.cursor.next();
        let published = PublishedEvent { cursor, event };

        #[allow(clippy::unwrap_used)]
        let mut retained = self.retained.lock().unwrap_or_else(|e| e.into_inner());
        retained.push_back(published.clone());
        while retained.len() > self.retention {
            retained.pop_front();
        }
        drop(retained);

        // No receivers is a valid state (no subscriber yet); broadcast
        // returns an error in that case, which is not a failure to log.
        let _ = self.sender.send(published);
        cursor
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Every retained event with `cursor > since_cursor`, oldest first.
    /// Events evicted past the retention horizon are simply absent —
    /// callers must treat a lower-bound gap as permanent.
    pub fn replay_since(&self, since_cursor: u64) -> Vec<PublishedEvent> {
        #[allow(clippy::unwrap_used)]
        let retained = self.retained.lock().unwrap_or_else(|e| e.into_inner());
        retained.iter().filter(|e| e.cursor > since_cursor).cloned().collect()
    }

    /// The most recently issued cursor, or 0 if nothing has been
    /// published yet — the lower bound a fresh subscription can resume
    /// from without guaranteed gaps.
    pub fn current_cursor(&self) -> u64 {
        self.cursor.current()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
