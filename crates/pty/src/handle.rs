// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use harness_core::model::{ExitRecord, Signal};
use tokio::sync::mpsc;
use tracing::warn;

use crate::backend::{Backend, BackendInput};
use crate::native::NativePty;

/// Output of a running PTY: either a chunk of raw bytes or the single
/// terminal exit record. `Exit` is emitted exactly once and is always the
/// last event on the channel.
#[derive(Debug, Clone)]
pub enum BackendEvent {
    Data(Bytes),
    Exit(ExitRecord),
}

/// Handle to a spawned PTY session. All control operations are
/// fire-and-forget: they queue a message for the backend's single-threaded
/// run loop rather than touching the PTY fd directly, so a handle is cheap
/// to clone and send across tasks.
#[derive(Clone)]
pub struct PtyHandle {
    input_tx: mpsc::Sender<BackendInput>,
    resize_tx: mpsc::Sender<(u16, u16)>,
    child_pid: Option<u32>,
    closed: Arc<AtomicBool>,
}

impl PtyHandle {
    /// Write bytes to the child. Silently dropped if the session is closed
    /// or has already exited.
    pub fn write(&self, data: Bytes) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if self.input_tx.try_send(BackendInput::Write(data)).is_err() {
            warn!("pty input dropped: channel closed or full");
        }
    }

    /// Fire-and-forget resize; silently dropped once closed.
    pub fn resize(&self, cols: u16, rows: u16) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.resize_tx.try_send((cols, rows));
    }

    /// Fire-and-forget `{interrupt,eof,terminate}`; silently dropped once
    /// closed.
    pub fn signal(&self, signal: Signal) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.input_tx.try_send(BackendInput::Signal(signal));
    }

    /// Mark the handle closed. Writes after `close` are dropped silently;
    /// the backend's run loop tears down the child once its input channel
    /// closes (all senders dropped) or the process exits on its own.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn process_id(&self) -> Option<u32> {
        self.child_pid
    }
}

/// Start a child process attached to a pseudo-terminal.
///
/// `error` from the backend's `run` future is mapped internally to a
/// synthetic `exit{code:null,signal:null}` so that every caller observes a
/// uniform terminal event regardless of whether the child exited cleanly
/// or the backend hit an I/O error.
pub fn start(
    command: &str,
    args: &[String],
    env: &BTreeMap<String, String>,
    cwd: Option<&str>,
    cols: u16,
    rows: u16,
) -> anyhow::Result<(PtyHandle, mpsc::Receiver<BackendEvent>)> {
    let mut backend = NativePty::spawn(command, args, env, cwd, cols, rows)?;
    let child_pid = backend.child_pid();

    let (raw_tx, mut raw_rx) = mpsc::channel::<Bytes>(256);
    let (input_tx, input_rx) = mpsc::channel::<BackendInput>(256);
    let (resize_tx, resize_rx) = mpsc::channel::<(u16, u16)>(8);
    let (event_tx, event_rx) = mpsc::channel::<BackendEvent>(256);

    let run_future = backend.run(raw_tx, input_rx, resize_rx);
    let run_handle = tokio::spawn(async move {
        // `backend` (and with it the PTY master fd) stays alive until this
        // future resolves; dropping it afterward tears down the child via
        // `NativePty`'s `Drop`.
        let result = run_future.await;
        drop(backend);
        result
    });

    let forward_tx = event_tx.clone();
    tokio::spawn(async move {
        while let Some(chunk) = raw_rx.recv().await {
            if forward_tx.send(BackendEvent::Data(chunk)).await.is_err() {
                return;
            }
        }
    });

    tokio::spawn(async move {
        let exit_record = match run_handle.await {
            Ok(Ok(status)) => ExitRecord { code: status.code, signal: signal_name(status.signal) },
            Ok(Err(err)) => {
                warn!(error = %err, "pty backend error, synthesizing uniform exit");
                ExitRecord { code: None, signal: None }
            }
            Err(join_err) => {
                warn!(error = %join_err, "pty backend task panicked, synthesizing uniform exit");
                ExitRecord { code: None, signal: None }
            }
        };
        // The forwarder task above only returns once `raw_tx` (owned by the
        // `run` future we just joined) has been dropped and fully drained,
        // so every `Data` event is guaranteed to precede this `Exit`.
        let _ = event_tx.send(BackendEvent::Exit(exit_record)).await;
    });

    let handle = PtyHandle {
        input_tx,
        resize_tx,
        child_pid,
        closed: Arc::new(AtomicBool::new(false)),
    };
    Ok((handle, event_rx))
}

fn signal_name(signal: Option<i32>) -> Option<&'static str> {
    signal.and_then(|s| nix::sys::signal::Signal::try_from(s).ok()).map(|s| s.as_str())
}

#[cfg(test)]
#[path = "handle_tests.rs"]
mod tests;
