//! # Read Loop
//!
//! Background task draining a [`TextReader`] into the session log until it is
//! cancelled, the stream ends, or a read fails.

use super::adapter::TextReader;
use super::line_log::{LogHandle, LogKind};
use log::debug;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};

/// Cooperative cancellation flag shared by a session and its read loop.
#[derive(Clone)]
pub struct CancelFlag {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelFlag {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        CancelFlag { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Completes once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            let cancelled = *rx.borrow_and_update();
            if cancelled || rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for CancelFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a read loop stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    EndOfStream,
    Errored(String),
}

/// Handle to a running read loop.
pub struct ReadLoop {
    handle: JoinHandle<(TextReader, StopReason)>,
    cancel: CancelFlag,
}

impl ReadLoop {
    /// Starts draining `reader` into `log` on a new task.
    pub fn spawn(reader: TextReader, log: LogHandle, cancel: CancelFlag) -> Self {
        let handle = tokio::spawn(run(reader, log, cancel.clone()));
        ReadLoop { handle, cancel }
    }

    /// `false` once the loop stopped on its own or was cancelled.
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Cancels the loop and waits for it, getting the reader back.
    pub async fn stop(self) -> Result<(TextReader, StopReason), JoinError> {
        self.cancel.cancel();
        self.handle.await
    }

    /// Stops the task without waiting; the reader is dropped with it.
    pub fn abort(&self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

async fn run(
    mut reader: TextReader,
    log: LogHandle,
    cancel: CancelFlag,
) -> (TextReader, StopReason) {
    debug!("Read loop started");
    let reason = loop {
        if cancel.is_cancelled() {
            break StopReason::Cancelled;
        }
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => break StopReason::Cancelled,
            chunk = reader.read_chunk() => chunk,
        };
        match chunk {
            Ok(Some(text)) => {
                if !text.is_empty() {
                    log.append(LogKind::Inbound, text);
                }
            }
            Ok(None) => break StopReason::EndOfStream,
            Err(e) => {
                log.warning(format!("Read stopped: {e}"));
                break StopReason::Errored(e.to_string());
            }
        }
    };
    debug!("Read loop stopped: {reason:?}");
    (reader, reason)
}
