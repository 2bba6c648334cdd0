//! Spawn collaborator seam and the OS-backed spawner
//!
//! [`ProcessSpawner`] abstracts process creation so handles can be driven by
//! the real operating system or by test doubles. [`OsSpawner`] is the
//! production implementation: it builds a `tokio::process::Command` from the
//! assembled options, spawns the child, and runs a watch task that delivers
//! the exit notice when the process terminates and the close notice once all
//! piped output has drained.

use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

#[cfg(unix)]
use nix::{
    errno::Errno,
    sys::signal::{self, Signal},
    unistd::Pid,
};

use crate::config::ProcessOptions;
use crate::error::{ProcessError, Result};
use crate::event::{NoticeSender, ProcessNotification, Termination};
use crate::stdio::{InputStream, OutputStream, StdioMode};

type Slot<T> = Arc<Mutex<Option<T>>>;

/// Creates OS-level processes from validated spawn parameters
///
/// The spawner applies `cwd`, `env`, `uid`, `gid`, `detached`, and `stdio`
/// exactly as provided, and is responsible for delivering exit, close, and
/// error notices through the spawned process's notice queue.
#[async_trait]
pub trait ProcessSpawner: Send + Sync {
    async fn spawn(
        &self,
        command: &str,
        args: &[String],
        options: &ProcessOptions,
    ) -> Result<SpawnedProcess>;
}

/// Sends signals to a spawned process by name
pub trait SignalSender: Send + Sync {
    fn send(&self, signal: &str) -> Result<()>;
}

/// Take-once slots for a spawned process's piped streams
///
/// Slots left empty by the stdio mode stay `None`. The OS spawner shares the
/// output slots with its watch task so pipes nobody claimed can be reclaimed
/// and drained once the process exits.
#[derive(Default)]
pub struct StdioStreams {
    pub(crate) stdin: Slot<InputStream>,
    pub(crate) stdout: Slot<OutputStream>,
    pub(crate) stderr: Slot<OutputStream>,
}

impl StdioStreams {
    /// Build the stream set from whatever the collaborator piped
    pub fn new(
        stdin: Option<InputStream>,
        stdout: Option<OutputStream>,
        stderr: Option<OutputStream>,
    ) -> Self {
        Self {
            stdin: Arc::new(Mutex::new(stdin)),
            stdout: Arc::new(Mutex::new(stdout)),
            stderr: Arc::new(Mutex::new(stderr)),
        }
    }

    pub(crate) fn take_stdin(&self) -> Option<InputStream> {
        self.stdin.lock().unwrap().take()
    }

    pub(crate) fn take_stdout(&self) -> Option<OutputStream> {
        self.stdout.lock().unwrap().take()
    }

    pub(crate) fn take_stderr(&self) -> Option<OutputStream> {
        self.stderr.lock().unwrap().take()
    }
}

/// A live process produced by a [`ProcessSpawner`]
///
/// Bundles the process id, the piped stream slots, a signal sender, and the
/// notification queue a [`ProcessHandle`](crate::ProcessHandle) consumes.
pub struct SpawnedProcess {
    pid: u32,
    streams: StdioStreams,
    signals: Box<dyn SignalSender>,
    notice_tx: mpsc::UnboundedSender<ProcessNotification>,
    notice_rx: mpsc::UnboundedReceiver<ProcessNotification>,
}

impl SpawnedProcess {
    /// Assemble a spawned process with a fresh notification queue
    pub fn new(pid: u32, streams: StdioStreams, signals: Box<dyn SignalSender>) -> Self {
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        Self {
            pid,
            streams,
            signals,
            notice_tx,
            notice_rx,
        }
    }

    /// The OS process identifier
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Producer half of the notification queue
    ///
    /// The collaborator's watcher uses this to deliver exit/close/error
    /// notices; it may be cloned freely.
    pub fn notices(&self) -> NoticeSender {
        NoticeSender::new(self.notice_tx.clone())
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        u32,
        StdioStreams,
        Box<dyn SignalSender>,
        mpsc::UnboundedReceiver<ProcessNotification>,
    ) {
        (self.pid, self.streams, self.signals, self.notice_rx)
    }
}

// The boxed stream and signal objects are opaque, so derive is unavailable
impl std::fmt::Debug for SpawnedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnedProcess")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

/// Production spawner backed by `tokio::process::Command`
#[derive(Debug, Clone, Copy, Default)]
pub struct OsSpawner;

impl OsSpawner {
    /// Create a new OS-backed spawner
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessSpawner for OsSpawner {
    async fn spawn(
        &self,
        command: &str,
        args: &[String],
        options: &ProcessOptions,
    ) -> Result<SpawnedProcess> {
        debug!(
            command = %command,
            args = ?args,
            "Spawning process"
        );

        let mut cmd = Command::new(command);
        cmd.args(args);

        if let Some(ref dir) = options.cwd {
            cmd.current_dir(dir);
        }

        // A set environment replaces the parent's rather than extending it
        if let Some(ref env) = options.env {
            cmd.env_clear();
            cmd.envs(env);
        }

        cmd.stdin(os_stdio(options.stdio.stdin));
        cmd.stdout(os_stdio(options.stdio.stdout));
        cmd.stderr(os_stdio(options.stdio.stderr));

        #[cfg(unix)]
        {
            if let Some(uid) = options.uid {
                cmd.uid(uid);
            }
            if let Some(gid) = options.gid {
                cmd.gid(gid);
            }
            if options.detached {
                cmd.process_group(0);
            }
        }
        #[cfg(windows)]
        {
            if options.uid.is_some() || options.gid.is_some() {
                warn!(command = %command, "uid/gid are not supported on this platform; ignoring");
            }
            if options.detached {
                const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
                const DETACHED_PROCESS: u32 = 0x0000_0008;
                cmd.creation_flags(CREATE_NEW_PROCESS_GROUP | DETACHED_PROCESS);
            }
        }
        #[cfg(not(any(unix, windows)))]
        {
            if options.uid.is_some() || options.gid.is_some() || options.detached {
                warn!(command = %command, "uid/gid/detached are not supported on this platform; ignoring");
            }
        }

        let mut child = cmd.spawn().map_err(|source| ProcessError::SpawnFailure {
            command: command.to_string(),
            source,
        })?;
        let pid = child.id().ok_or_else(|| ProcessError::SpawnFailure {
            command: command.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "spawned child reported no pid"),
        })?;

        info!(pid = %pid, command = %command, "Process spawned");

        let mut streams = StdioStreams::default();
        if let Some(raw) = child.stdin.take() {
            streams.stdin = Arc::new(Mutex::new(Some(InputStream::new(raw))));
        }
        let mut outputs = Vec::new();
        if let Some(raw) = child.stdout.take() {
            let (guard, drained) = oneshot::channel();
            streams.stdout = Arc::new(Mutex::new(Some(OutputStream::with_drain_guard(raw, guard))));
            outputs.push(OutputDrain {
                name: "stdout",
                slot: streams.stdout.clone(),
                drained,
            });
        }
        if let Some(raw) = child.stderr.take() {
            let (guard, drained) = oneshot::channel();
            streams.stderr = Arc::new(Mutex::new(Some(OutputStream::with_drain_guard(raw, guard))));
            outputs.push(OutputDrain {
                name: "stderr",
                slot: streams.stderr.clone(),
                drained,
            });
        }

        let stdin_slot = streams.stdin.clone();
        let spawned = SpawnedProcess::new(pid, streams, Box::new(PidSignalSender { pid }));
        tokio::spawn(watch(child, pid, spawned.notices(), stdin_slot, outputs));

        Ok(spawned)
    }
}

/// A piped output the watch task must see drained before close
struct OutputDrain {
    name: &'static str,
    slot: Slot<OutputStream>,
    drained: oneshot::Receiver<()>,
}

/// Wait for termination, then for stdio drain, delivering notices as each
/// milestone is reached
async fn watch(
    mut child: Child,
    pid: u32,
    notices: NoticeSender,
    stdin_slot: Slot<InputStream>,
    outputs: Vec<OutputDrain>,
) {
    let termination = match child.wait().await {
        Ok(status) => {
            let (code, signal) = termination_parts(&status);
            debug!(pid = %pid, code = ?code, signal = ?signal, "Process exited");
            Termination { code, signal }
        }
        Err(source) => {
            warn!(pid = %pid, error = %source, "Failed to await process");
            notices.error(ProcessError::WaitFailure { pid, source });
            Termination {
                code: None,
                signal: None,
            }
        }
    };
    notices.exit(termination.code, termination.signal.clone());

    // stdin is useless once the process is gone; drop it if nobody took it
    stdin_slot.lock().unwrap().take();

    for output in outputs {
        let reclaimed = output.slot.lock().unwrap().take();
        match reclaimed {
            // Nobody claimed the pipe; drain it so close still fires
            Some(stream) => drain_output(stream, output.name, pid, &notices).await,
            // The caller holds the stream; close waits for EOF or drop
            None => {
                let _ = output.drained.await;
            }
        }
    }

    debug!(pid = %pid, "Stdio drained");
    notices.close(termination.code, termination.signal);
}

async fn drain_output(
    mut stream: OutputStream,
    name: &'static str,
    pid: u32,
    notices: &NoticeSender,
) {
    let mut scratch = [0u8; 8192];
    loop {
        match stream.read(&mut scratch).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(source) => {
                warn!(pid = %pid, stream = %name, error = %source, "Failed to drain stream");
                notices.error(ProcessError::StreamFailure {
                    stream: name.to_string(),
                    source,
                });
                break;
            }
        }
    }
}

/// Split an exit status into the (code, signal name) pair notices carry
fn termination_parts(status: &std::process::ExitStatus) -> (Option<i32>, Option<String>) {
    if let Some(code) = status.code() {
        return (Some(code), None);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(raw) = status.signal() {
            let name = Signal::try_from(raw)
                .map(|signal| signal.as_str().to_string())
                .unwrap_or_else(|_| format!("SIG{raw}"));
            return (None, Some(name));
        }
    }
    (None, None)
}

fn os_stdio(mode: StdioMode) -> Stdio {
    match mode {
        StdioMode::Pipe => Stdio::piped(),
        StdioMode::Inherit => Stdio::inherit(),
        StdioMode::Ignore => Stdio::null(),
    }
}

/// Delivers signals by process id
///
/// Unix parses signal names through nix and treats an already-reaped process
/// as success; Windows supports termination only, so any signal requests it
/// via `taskkill`.
struct PidSignalSender {
    pid: u32,
}

impl SignalSender for PidSignalSender {
    fn send(&self, signal_name: &str) -> Result<()> {
        #[cfg(unix)]
        {
            let signal: Signal = signal_name
                .parse()
                .map_err(|_| ProcessError::SignalDelivery {
                    pid: self.pid,
                    signal: signal_name.to_string(),
                    reason: "unknown signal name".to_string(),
                })?;
            match signal::kill(Pid::from_raw(self.pid as i32), signal) {
                Ok(()) => {
                    debug!(pid = %self.pid, signal = %signal_name, "Signal sent");
                    Ok(())
                }
                // The process is already gone; nothing left to signal
                Err(Errno::ESRCH) => {
                    debug!(pid = %self.pid, "Process already gone");
                    Ok(())
                }
                Err(errno) => Err(ProcessError::SignalDelivery {
                    pid: self.pid,
                    signal: signal_name.to_string(),
                    reason: errno.to_string(),
                }),
            }
        }
        #[cfg(windows)]
        {
            debug!(pid = %self.pid, signal = %signal_name, "Requesting termination via taskkill");
            std::process::Command::new("taskkill")
                .args(["/pid", &self.pid.to_string(), "/f"])
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
                .map_err(|e| ProcessError::SignalDelivery {
                    pid: self.pid,
                    signal: signal_name.to_string(),
                    reason: e.to_string(),
                })?;
            Ok(())
        }
        #[cfg(not(any(unix, windows)))]
        {
            Err(ProcessError::SignalDelivery {
                pid: self.pid,
                signal: signal_name.to_string(),
                reason: "signal delivery is not supported on this platform".to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawn_delivers_exit_then_close() {
        let spawner = OsSpawner::new();
        let spawned = spawner
            .spawn("echo", &["hello".to_string()], &ProcessOptions::default())
            .await
            .unwrap();
        assert!(spawned.pid() > 0);

        let (_pid, _streams, _signals, mut notices) = spawned.into_parts();
        match notices.recv().await.unwrap() {
            ProcessNotification::Exit(termination) => {
                assert_eq!(termination.code, Some(0));
                assert_eq!(termination.signal, None);
            }
            other => panic!("expected exit first, got {other:?}"),
        }
        match notices.recv().await.unwrap() {
            ProcessNotification::Close(termination) => assert_eq!(termination.code, Some(0)),
            other => panic!("expected close, got {other:?}"),
        }
        // The watch task is done; the queue ends
        assert!(notices.recv().await.is_none());
    }

    #[test]
    fn test_spawned_process_debug_reports_pid() {
        struct NoopSignals;
        impl SignalSender for NoopSignals {
            fn send(&self, _signal: &str) -> Result<()> {
                Ok(())
            }
        }
        let spawned = SpawnedProcess::new(33, StdioStreams::default(), Box::new(NoopSignals));
        assert!(format!("{spawned:?}").contains("pid: 33"));
    }

    #[tokio::test]
    async fn test_spawn_missing_executable_fails_synchronously() {
        let spawner = OsSpawner::new();
        let err = spawner
            .spawn(
                "procwatch-test-no-such-binary",
                &[],
                &ProcessOptions::default(),
            )
            .await
            .unwrap_err();
        match err {
            ProcessError::SpawnFailure { command, .. } => {
                assert_eq!(command, "procwatch-test-no-such-binary");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
