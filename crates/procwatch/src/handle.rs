//! Observable handle for one spawned process
//!
//! A [`ProcessHandle`] owns the process reference produced by the spawn
//! collaborator and consumes its notification queue from a single dispatch
//! task, so notices for one process are always handled serially. Each notice
//! updates lifecycle state before being republished on the matching
//! subscriber channel.
//!
//! `exited` and `closed` are independent flags: a process can exit while a
//! grandchild keeps its stdio open, and some platforms can report close
//! before the exit notice arrives. Close is the terminal signal for resource
//! ownership. When it is observed the handle releases the process reference
//! exactly once and detaches from the queue, which is also what makes
//! duplicate close notices and late exits unobservable.

use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::error::{ProcessError, Result};
use crate::event::{EventChannels, NoticeSender, ProcessNotification, Termination};
use crate::spawn::{SignalSender, SpawnedProcess, StdioStreams};
use crate::stdio::{InputStream, OutputStream};

/// Signal sent by `destroy` when none is given
const DEFAULT_KILL_SIGNAL: &str = "SIGTERM";

/// Exclusively-owned view of the live process, present until close
struct ProcessRef {
    pid: u32,
    streams: StdioStreams,
    signals: Box<dyn SignalSender>,
}

#[derive(Default)]
struct LifecycleState {
    exited: bool,
    closed: bool,
    exit_code: Option<i32>,
    exit_signal: Option<String>,
}

struct HandleInner {
    /// Pid copy kept for tracing after the reference is released
    pid: u32,
    reference: Mutex<Option<ProcessRef>>,
    lifecycle: Mutex<LifecycleState>,
    channels: EventChannels,
    /// Weak so the dispatch task's `Arc<HandleInner>` never keeps its own
    /// queue open; a dropped handle lets the queue close and the task end
    notices: mpsc::WeakUnboundedSender<ProcessNotification>,
}

impl HandleInner {
    /// Release the process reference; only the first call has any effect
    fn release(&self) {
        let mut reference = self.reference.lock().unwrap();
        if let Some(released) = reference.take() {
            debug!(pid = %released.pid, "Releasing process reference");
        }
    }
}

/// Handle observing and republishing the lifecycle of one spawned process
///
/// Created by [`ProcessConfig::start`](crate::ProcessConfig::start). Queries
/// are synchronous and never block on the child; termination is requested
/// with [`destroy`](Self::destroy) and awaited by subscribing to the exit or
/// close channel.
pub struct ProcessHandle {
    inner: Arc<HandleInner>,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lifecycle = self.inner.lifecycle.lock().unwrap();
        f.debug_struct("ProcessHandle")
            .field("pid", &self.inner.pid)
            .field("exited", &lifecycle.exited)
            .field("closed", &lifecycle.closed)
            .finish_non_exhaustive()
    }
}

impl ProcessHandle {
    /// Wrap a spawned process and begin consuming its notification queue
    ///
    /// Must be called within a tokio runtime.
    pub(crate) fn new(spawned: SpawnedProcess) -> Self {
        let notices = spawned.notices().downgrade();
        let (pid, streams, signals, queue) = spawned.into_parts();
        let inner = Arc::new(HandleInner {
            pid,
            reference: Mutex::new(Some(ProcessRef {
                pid,
                streams,
                signals,
            })),
            lifecycle: Mutex::new(LifecycleState::default()),
            channels: EventChannels::new(),
            notices,
        });
        tokio::spawn(dispatch(Arc::clone(&inner), queue));
        Self { inner }
    }

    /// The OS process identifier
    ///
    /// Fails with [`ProcessError::InvalidState`] once the reference has been
    /// released rather than reporting a stale id.
    pub fn pid(&self) -> Result<u32> {
        match self.inner.reference.lock().unwrap().as_ref() {
            Some(reference) => Ok(reference.pid),
            None => Err(ProcessError::InvalidState {
                operation: "pid".to_string(),
            }),
        }
    }

    /// Take the child's stdin handle
    ///
    /// Returns `None` if the stream was not piped, was already taken, or the
    /// reference has been released.
    pub fn take_stdin(&self) -> Option<InputStream> {
        self.inner
            .reference
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|reference| reference.streams.take_stdin())
    }

    /// Take the child's stdout handle
    ///
    /// Returns `None` if the stream was not piped, was already taken, or the
    /// reference has been released. Streams nobody has taken by the time the
    /// child exits may be reclaimed and drained by the spawner, so callers
    /// that want output should take the stream promptly after start.
    pub fn take_stdout(&self) -> Option<OutputStream> {
        self.inner
            .reference
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|reference| reference.streams.take_stdout())
    }

    /// Take the child's stderr handle; same rules as [`take_stdout`](Self::take_stdout)
    pub fn take_stderr(&self) -> Option<OutputStream> {
        self.inner
            .reference
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|reference| reference.streams.take_stderr())
    }

    /// Whether the exit notification has been observed
    pub fn is_exited(&self) -> bool {
        self.inner.lifecycle.lock().unwrap().exited
    }

    /// Whether the close notification has been observed
    pub fn is_closed(&self) -> bool {
        self.inner.lifecycle.lock().unwrap().closed
    }

    /// Exit code, once exited normally
    pub fn exit_code(&self) -> Option<i32> {
        self.inner.lifecycle.lock().unwrap().exit_code
    }

    /// Terminating signal name, once killed by a signal
    pub fn exit_signal(&self) -> Option<String> {
        self.inner.lifecycle.lock().unwrap().exit_signal.clone()
    }

    /// Request termination by sending `signal` (default `SIGTERM`)
    ///
    /// Fire-and-forget: this does not wait for the process to die; subscribe
    /// to the exit or close channel for that. A no-op once exit has been
    /// observed, and a guarded no-op once the reference has been released,
    /// since close can arrive without exit and the exit flag alone is not
    /// enough to know the reference is still there. Delivery failures surface
    /// on the error channel, never from this call.
    pub fn destroy(&self, signal: Option<&str>) {
        let signal = signal.unwrap_or(DEFAULT_KILL_SIGNAL);
        if self.is_exited() {
            debug!(pid = %self.inner.pid, "Process already exited; ignoring destroy");
            return;
        }
        match self.inner.reference.lock().unwrap().as_ref() {
            Some(reference) => {
                debug!(pid = %reference.pid, signal = %signal, "Requesting termination");
                if let Err(error) = reference.signals.send(signal) {
                    warn!(pid = %reference.pid, signal = %signal, error = %error, "Signal delivery failed");
                    if let Some(tx) = self.inner.notices.upgrade() {
                        NoticeSender::new(tx).error(error);
                    }
                }
            }
            None => {
                debug!(pid = %self.inner.pid, "Process reference released; ignoring destroy");
            }
        }
    }

    /// Subscribe to exit notifications
    ///
    /// Any number of subscribers may be attached; delivery follows the
    /// arrival order of the underlying notices. Subscribers attached after an
    /// event was published do not see it. Unsubscribe by dropping the
    /// receiver.
    pub fn subscribe_exit(&self) -> broadcast::Receiver<Termination> {
        self.inner.channels.subscribe_exit()
    }

    /// Subscribe to close notifications
    pub fn subscribe_close(&self) -> broadcast::Receiver<Termination> {
        self.inner.channels.subscribe_close()
    }

    /// Subscribe to fault notifications
    ///
    /// Faults are independent, repeatable events; they never change the
    /// exit/close flags and never trigger cleanup. Subscribers decide whether
    /// a fault is terminal.
    pub fn subscribe_error(&self) -> broadcast::Receiver<Arc<ProcessError>> {
        self.inner.channels.subscribe_error()
    }
}

/// Consume the notification queue, updating state before publishing
async fn dispatch(inner: Arc<HandleInner>, mut queue: mpsc::UnboundedReceiver<ProcessNotification>) {
    while let Some(notice) = queue.recv().await {
        match notice {
            ProcessNotification::Exit(termination) => {
                {
                    let mut lifecycle = inner.lifecycle.lock().unwrap();
                    if lifecycle.exited {
                        // Some platforms can deliver duplicates; exit publishes once
                        continue;
                    }
                    lifecycle.exited = true;
                    lifecycle.exit_code = termination.code;
                    lifecycle.exit_signal = termination.signal.clone();
                }
                debug!(
                    pid = %inner.pid,
                    code = ?termination.code,
                    signal = ?termination.signal,
                    "Exit observed"
                );
                inner.channels.publish_exit(termination);
            }
            ProcessNotification::Close(termination) => {
                inner.release();
                inner.lifecycle.lock().unwrap().closed = true;
                debug!(pid = %inner.pid, "Close observed");
                inner.channels.publish_close(termination);
                // Close is terminal: detach so duplicates and late notices
                // go unobserved
                break;
            }
            ProcessNotification::Error(error) => {
                warn!(pid = %inner.pid, error = %error, "Process fault");
                inner.channels.publish_error(Arc::new(error));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::sync::broadcast::error::TryRecvError;

    #[derive(Default)]
    struct RecordingSignals {
        sent: Arc<Mutex<Vec<String>>>,
    }

    impl SignalSender for RecordingSignals {
        fn send(&self, signal: &str) -> Result<()> {
            self.sent.lock().unwrap().push(signal.to_string());
            Ok(())
        }
    }

    fn stub_handle(pid: u32) -> (ProcessHandle, NoticeSender, Arc<Mutex<Vec<String>>>) {
        stub_handle_with_streams(pid, StdioStreams::default())
    }

    fn stub_handle_with_streams(
        pid: u32,
        streams: StdioStreams,
    ) -> (ProcessHandle, NoticeSender, Arc<Mutex<Vec<String>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let spawned = SpawnedProcess::new(
            pid,
            streams,
            Box::new(RecordingSignals { sent: sent.clone() }),
        );
        let notices = spawned.notices();
        (ProcessHandle::new(spawned), notices, sent)
    }

    #[tokio::test]
    async fn test_exit_then_close_lifecycle() {
        let (handle, notices, _) = stub_handle(321);
        let mut exits = handle.subscribe_exit();
        let mut closes = handle.subscribe_close();

        notices.exit(Some(0), None);
        let termination = exits.recv().await.unwrap();
        assert_eq!(termination.code, Some(0));
        assert_eq!(termination.signal, None);

        // State is updated before the event is published
        assert!(handle.is_exited());
        assert!(!handle.is_closed());
        assert_eq!(handle.exit_code(), Some(0));
        assert_eq!(handle.pid().unwrap(), 321);

        notices.close(Some(0), None);
        closes.recv().await.unwrap();
        assert!(handle.is_closed());

        match handle.pid().unwrap_err() {
            ProcessError::InvalidState { operation } => assert_eq!(operation, "pid"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_signal_termination_payload() {
        let (handle, notices, _) = stub_handle(77);
        let mut exits = handle.subscribe_exit();

        notices.exit(None, Some("SIGTERM".to_string()));
        let termination = exits.recv().await.unwrap();
        assert_eq!(termination.code, None);
        assert_eq!(termination.signal.as_deref(), Some("SIGTERM"));
        assert_eq!(handle.exit_code(), None);
        assert_eq!(handle.exit_signal().as_deref(), Some("SIGTERM"));
    }

    #[tokio::test]
    async fn test_duplicate_exit_publishes_once() {
        let (handle, notices, _) = stub_handle(9);
        let mut exits = handle.subscribe_exit();
        let mut errors = handle.subscribe_error();

        notices.exit(Some(0), None);
        assert_eq!(exits.recv().await.unwrap().code, Some(0));

        notices.exit(Some(1), None);
        // The queue is serial, so once this fault is observed the duplicate
        // exit has already been processed
        notices.error(ProcessError::InvalidState {
            operation: "marker".to_string(),
        });
        errors.recv().await.unwrap();

        assert!(matches!(exits.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(handle.exit_code(), Some(0));
    }

    #[tokio::test]
    async fn test_faults_are_repeatable_and_change_nothing() {
        let (handle, notices, _) = stub_handle(5);
        let mut errors = handle.subscribe_error();

        notices.error(ProcessError::StreamFailure {
            stream: "stdout".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "broken pipe"),
        });
        notices.error(ProcessError::StreamFailure {
            stream: "stderr".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "broken pipe"),
        });

        errors.recv().await.unwrap();
        errors.recv().await.unwrap();
        assert!(!handle.is_exited());
        assert!(!handle.is_closed());
        assert!(handle.pid().is_ok());
    }

    #[tokio::test]
    async fn test_destroy_before_exit_sends_signal() {
        let (handle, _notices, sent) = stub_handle(11);

        handle.destroy(Some("SIGINT"));
        handle.destroy(None);

        assert_eq!(*sent.lock().unwrap(), ["SIGINT", "SIGTERM"]);
    }

    #[tokio::test]
    async fn test_destroy_after_exit_is_noop() {
        let (handle, notices, sent) = stub_handle(12);
        let mut exits = handle.subscribe_exit();

        notices.exit(Some(0), None);
        exits.recv().await.unwrap();

        handle.destroy(None);
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_without_exit_releases_and_guards_destroy() {
        let (handle, notices, sent) = stub_handle(13);
        let mut exits = handle.subscribe_exit();
        let mut closes = handle.subscribe_close();

        notices.close(None, None);
        closes.recv().await.unwrap();

        assert!(handle.is_closed());
        assert!(!handle.is_exited());
        assert!(handle.pid().is_err());

        // The reference is gone even though exit was never observed
        handle.destroy(None);
        assert!(sent.lock().unwrap().is_empty());

        // A late exit is unobserved: dispatch detached at close
        notices.exit(Some(0), None);
        assert!(!handle.is_exited());
        assert!(matches!(exits.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_debug_shows_pid_and_lifecycle_flags() {
        let (handle, notices, _) = stub_handle(55);
        let mut exits = handle.subscribe_exit();
        assert!(format!("{handle:?}").contains("pid: 55"));

        notices.exit(Some(0), None);
        exits.recv().await.unwrap();

        let rendered = format!("{handle:?}");
        assert!(rendered.contains("exited: true"));
        assert!(rendered.contains("closed: false"));
    }

    struct DropTrackingSignals {
        released: Arc<Mutex<bool>>,
    }

    impl SignalSender for DropTrackingSignals {
        fn send(&self, _signal: &str) -> Result<()> {
            Ok(())
        }
    }

    impl Drop for DropTrackingSignals {
        fn drop(&mut self) {
            *self.released.lock().unwrap() = true;
        }
    }

    #[tokio::test]
    async fn test_abandoned_handle_without_close_does_not_leak() {
        let released = Arc::new(Mutex::new(false));
        let spawned = SpawnedProcess::new(
            44,
            StdioStreams::default(),
            Box::new(DropTrackingSignals {
                released: released.clone(),
            }),
        );
        let notices = spawned.notices();
        let handle = ProcessHandle::new(spawned);

        // No close notice ever arrives; dropping the handle and the last
        // collaborator sender must still let the dispatch task end and the
        // process reference drop
        drop(handle);
        drop(notices);

        for _ in 0..32 {
            if *released.lock().unwrap() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(*released.lock().unwrap());
    }

    #[tokio::test]
    async fn test_take_streams_once_and_not_after_close() {
        let streams = StdioStreams::new(
            None,
            Some(OutputStream::new(std::io::Cursor::new(b"out".to_vec()))),
            None,
        );
        let (handle, notices, _) = stub_handle_with_streams(21, streams);

        let mut stdout = handle.take_stdout().expect("stdout was piped");
        assert!(handle.take_stdout().is_none());
        assert!(handle.take_stdin().is_none());

        let mut contents = Vec::new();
        stdout.read_to_end(&mut contents).await.unwrap();
        assert_eq!(contents, b"out");

        let mut closes = handle.subscribe_close();
        notices.close(Some(0), None);
        closes.recv().await.unwrap();
        assert!(handle.take_stderr().is_none());
    }
}
