//! Lifecycle notifications and subscriber channels
//!
//! Spawn collaborators deliver exit/close/error notices through a
//! single-consumer queue owned by the process handle, which keeps dispatch
//! for one process strictly serial. The handle republishes each notice on a
//! per-channel broadcast sender so any number of observers can subscribe.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use crate::error::ProcessError;

/// Channel capacity for broadcast events
const CHANNEL_CAPACITY: usize = 64;

/// Exit status reported by a terminated process
///
/// Exactly one of `code` and `signal` is set: `code` for a normal exit,
/// `signal` for signal-delivered termination. Both may be absent when the
/// platform could not report how the process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Termination {
    /// Exit code, when the process exited normally
    pub code: Option<i32>,
    /// Signal name (e.g. `"SIGTERM"`), when the process was killed by a signal
    pub signal: Option<String>,
}

/// A lifecycle notice queued for the process handle
#[derive(Debug)]
pub(crate) enum ProcessNotification {
    /// Process execution terminated
    Exit(Termination),
    /// All tracked stdio streams drained
    Close(Termination),
    /// A fault occurred; does not affect lifecycle state
    Error(ProcessError),
}

/// Producer half of a process handle's notification queue
///
/// Handed out by [`SpawnedProcess::notices`](crate::SpawnedProcess::notices)
/// so the spawn collaborator's watcher can deliver lifecycle notices. Notices
/// sent after the handle has observed close are dropped.
#[derive(Debug, Clone)]
pub struct NoticeSender {
    tx: mpsc::UnboundedSender<ProcessNotification>,
}

impl NoticeSender {
    pub(crate) fn new(tx: mpsc::UnboundedSender<ProcessNotification>) -> Self {
        Self { tx }
    }

    /// Weak producer that does not keep the queue open
    ///
    /// The handle holds this form so an abandoned handle never keeps its own
    /// dispatch task alive; only collaborator-held senders do.
    pub(crate) fn downgrade(&self) -> mpsc::WeakUnboundedSender<ProcessNotification> {
        self.tx.downgrade()
    }

    /// Report that the process terminated
    pub fn exit(&self, code: Option<i32>, signal: Option<String>) {
        let _ = self
            .tx
            .send(ProcessNotification::Exit(Termination { code, signal }));
    }

    /// Report that the process terminated and its stdio streams drained
    pub fn close(&self, code: Option<i32>, signal: Option<String>) {
        let _ = self
            .tx
            .send(ProcessNotification::Close(Termination { code, signal }));
    }

    /// Report a fault without altering lifecycle state
    pub fn error(&self, error: ProcessError) {
        let _ = self.tx.send(ProcessNotification::Error(error));
    }
}

/// One broadcast sender per notification channel
pub(crate) struct EventChannels {
    exit: broadcast::Sender<Termination>,
    close: broadcast::Sender<Termination>,
    error: broadcast::Sender<Arc<ProcessError>>,
}

impl EventChannels {
    pub(crate) fn new() -> Self {
        let (exit, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (close, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (error, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { exit, close, error }
    }

    pub(crate) fn publish_exit(&self, termination: Termination) {
        // Ignore send errors - it's ok if there are no subscribers
        let _ = self.exit.send(termination);
    }

    pub(crate) fn publish_close(&self, termination: Termination) {
        let _ = self.close.send(termination);
    }

    pub(crate) fn publish_error(&self, error: Arc<ProcessError>) {
        let _ = self.error.send(error);
    }

    pub(crate) fn subscribe_exit(&self) -> broadcast::Receiver<Termination> {
        self.exit.subscribe()
    }

    pub(crate) fn subscribe_close(&self) -> broadcast::Receiver<Termination> {
        self.close.subscribe()
    }

    pub(crate) fn subscribe_error(&self) -> broadcast::Receiver<Arc<ProcessError>> {
        self.error.subscribe()
    }
}
