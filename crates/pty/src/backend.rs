// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use bytes::Bytes;
use harness_core::model::Signal;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::mpsc;

/// Raw exit outcome of a backend's child process, before `error` is mapped
/// to a synthetic uniform exit by [`crate::handle::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

/// Input sent to the PTY backend: either raw bytes to write or a drain
/// synchronization point.
#[derive(Debug)]
pub enum BackendInput {
    /// Raw bytes to write to the PTY.
    Write(Bytes),
    /// `{interrupt,eof,terminate}`, applied by the backend itself so it can
    /// use the same fd/pid state `run` already owns.
    Signal(Signal),
    /// Drain marker: since the backend processes messages sequentially,
    /// all prior writes are complete when this is received. The sender is
    /// notified via the oneshot channel.
    Drain(tokio::sync::oneshot::Sender<()>),
}

/// Terminal backend abstraction over a spawned child process.
///
/// Object-safe for use as `Box<dyn Backend>`.
pub trait Backend: Send + 'static {
    fn run(
        &mut self,
        output_tx: mpsc::Sender<Bytes>,
        input_rx: mpsc::Receiver<BackendInput>,
        resize_rx: mpsc::Receiver<(u16, u16)>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ExitStatus>> + Send + '_>>;

    fn resize(&self, cols: u16, rows: u16) -> anyhow::Result<()>;

    fn signal(&self, signal: Signal) -> anyhow::Result<()>;

    fn child_pid(&self) -> Option<u32>;
}
