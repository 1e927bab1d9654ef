// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use harness_core::ids::AttachmentId;
use harness_core::model::{ExitRecord, Signal};
use harness_pty::{BackendEvent, PtyHandle};
use tokio::sync::mpsc;
use tracing::debug;

use crate::backlog::Backlog;

/// Default `MaxBacklogBytes`: 256 KiB.
pub const DEFAULT_MAX_BACKLOG_BYTES: usize = 256 * 1024;

/// Delivered to an attachment: either a stamped output chunk or the
/// session's single terminal exit record.
#[derive(Debug, Clone)]
pub enum BrokerEvent {
    Data { cursor: u64, chunk: Bytes },
    Exit(ExitRecord),
}

struct Inner {
    next_cursor: u64,
    backlog: Backlog,
    attachments: HashMap<AttachmentId, mpsc::UnboundedSender<BrokerEvent>>,
    exit: Option<ExitRecord>,
}

/// Wraps one PTY Host. Stamps each output chunk with a
/// monotonic cursor, keeps a bounded backlog, and fans out to every
/// attachment in the same cursor order.
///
/// `Inner` is guarded by a plain (non-async) mutex: every critical section
/// is synchronous bookkeeping, so holding the lock never spans an await
/// point and registering an attachment can never race with a concurrent
/// push — both go through the same lock, so the replay snapshot an
/// `attach` call takes is always consistent with what gets delivered live
/// afterward.
pub struct SessionBroker {
    pty: PtyHandle,
    inner: Mutex<Inner>,
}

impl SessionBroker {
    pub fn new(pty: PtyHandle, max_backlog_bytes: usize) -> Self {
        Self {
            pty,
            inner: Mutex::new(Inner {
                next_cursor: 1,
                backlog: Backlog::new(max_backlog_bytes),
                attachments: HashMap::new(),
                exit: None,
            }),
        }
    }

    /// Drive the broker from the backend's event stream until exit. Spawn
    /// this as its own task; it returns once the terminal `Exit` event has
    /// been stamped and fanned out.
    pub async fn run(self: &Arc<Self>, mut events: mpsc::Receiver<BackendEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                BackendEvent::Data(chunk) => self.push_output(chunk),
                BackendEvent::Exit(exit) => {
                    self.mark_exit(exit);
                    return;
                }
            }
        }
    }

    fn push_output(&self, chunk: Bytes) {
        #[allow(clippy::unwrap_used)]
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let cursor = inner.next_cursor;
        inner.next_cursor += 1;
        inner.backlog.push(cursor, chunk.clone());
        inner.attachments.retain(|id, tx| {
            let ok = tx.send(BrokerEvent::Data { cursor, chunk: chunk.clone() }).is_ok();
            if !ok {
                debug!(attachment = %id.0, "dropping dead attachment on push");
            }
            ok
        });
    }

    fn mark_exit(&self, exit: ExitRecord) {
        #[allow(clippy::unwrap_used)]
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.exit = Some(exit);
        for tx in inner.attachments.values() {
            let _ = tx.send(BrokerEvent::Exit(exit));
        }
    }

    /// Subscribe; replay every backlog entry with `cursor > since_cursor`
    /// in cursor order, then deliver the exit record immediately after the
    /// replay if it has already been observed.
    pub fn attach(&self, since_cursor: u64) -> (AttachmentId, mpsc::UnboundedReceiver<BrokerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = AttachmentId::new();
        #[allow(clippy::unwrap_used)]
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        for entry in inner.backlog.replay_since(since_cursor) {
            let _ = tx.send(BrokerEvent::Data { cursor: entry.cursor, chunk: entry.chunk.clone() });
        }
        if let Some(exit) = inner.exit {
            let _ = tx.send(BrokerEvent::Exit(exit));
        }
        inner.attachments.insert(id, tx);
        (id, rx)
    }

    /// Remove a handler. In-flight callbacks already dispatched to it
    /// still complete on the receiver's side; this only stops future
    /// deliveries.
    pub fn detach(&self, id: AttachmentId) {
        #[allow(clippy::unwrap_used)]
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.attachments.remove(&id);
    }

    pub fn latest_cursor(&self) -> u64 {
        #[allow(clippy::unwrap_used)]
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.next_cursor - 1
    }

    pub fn has_exited(&self) -> bool {
        #[allow(clippy::unwrap_used)]
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).exit.is_some()
    }

    pub fn write(&self, data: Bytes) {
        self.pty.write(data);
    }

    pub fn resize(&self, cols: u16, rows: u16) {
        self.pty.resize(cols, rows);
    }

    pub fn signal(&self, signal: Signal) {
        self.pty.signal(signal);
    }

    pub fn close(&self) {
        self.pty.close();
    }

    pub fn process_id(&self) -> Option<u32> {
        self.pty.process_id()
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
