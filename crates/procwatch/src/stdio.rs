//! Stdio wiring modes and stream handles
//!
//! A child's three standard streams are configured with [`StdioMode`] tokens,
//! either one mode for all streams or one per stream via [`StdioSpec`]. Piped
//! streams surface to callers as boxed [`InputStream`]/[`OutputStream`]
//! handles, so spawn collaborators are free to back them with real child
//! descriptors or in-memory streams.

use std::io;
use std::pin::Pin;
use std::str::FromStr;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::oneshot;

use crate::error::{ProcessError, Result};

/// How a single stdio stream is wired at spawn time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StdioMode {
    /// Connect the stream to the parent through a pipe
    #[default]
    Pipe,
    /// Share the parent's stream
    Inherit,
    /// Discard the stream
    Ignore,
}

impl StdioMode {
    /// The token form of this mode
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pipe => "pipe",
            Self::Inherit => "inherit",
            Self::Ignore => "ignore",
        }
    }
}

impl FromStr for StdioMode {
    type Err = ProcessError;

    fn from_str(token: &str) -> Result<Self> {
        match token {
            "pipe" => Ok(Self::Pipe),
            "inherit" => Ok(Self::Inherit),
            "ignore" => Ok(Self::Ignore),
            other => Err(ProcessError::InvalidConfiguration {
                field: "stdio".to_string(),
                value: format!("{other:?}"),
                expected: "one of \"pipe\", \"inherit\", \"ignore\"".to_string(),
            }),
        }
    }
}

/// Per-stream wiring for stdin, stdout, and stderr
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StdioSpec {
    pub stdin: StdioMode,
    pub stdout: StdioMode,
    pub stderr: StdioMode,
}

impl StdioSpec {
    /// Use the same mode for all three streams
    pub fn all(mode: StdioMode) -> Self {
        Self {
            stdin: mode,
            stdout: mode,
            stderr: mode,
        }
    }

    /// Pipe all three streams
    pub fn piped() -> Self {
        Self::all(StdioMode::Pipe)
    }

    /// Inherit all three streams from the parent
    pub fn inherit() -> Self {
        Self::all(StdioMode::Inherit)
    }

    /// Build a spec from a sequence of mode tokens ordered stdin, stdout,
    /// stderr. Missing entries default to pipe; more than three entries are
    /// rejected.
    pub fn from_tokens<S: AsRef<str>>(tokens: &[S]) -> Result<Self> {
        if tokens.len() > 3 {
            return Err(ProcessError::InvalidConfiguration {
                field: "stdio".to_string(),
                value: format!("{} entries", tokens.len()),
                expected: "at most three stream modes (stdin, stdout, stderr)".to_string(),
            });
        }
        let mut modes = [StdioMode::Pipe; 3];
        for (slot, token) in modes.iter_mut().zip(tokens) {
            *slot = token.as_ref().parse()?;
        }
        Ok(Self {
            stdin: modes[0],
            stdout: modes[1],
            stderr: modes[2],
        })
    }
}

impl Default for StdioSpec {
    fn default() -> Self {
        Self::piped()
    }
}

impl From<StdioMode> for StdioSpec {
    fn from(mode: StdioMode) -> Self {
        Self::all(mode)
    }
}

/// Conversion into a [`StdioSpec`]
///
/// Accepted shapes mirror the two the configuration surface supports: a
/// single mode token applied to all three streams (`"pipe"`), or an ordered
/// sequence of up to three tokens (`["inherit", "pipe"]`) with missing
/// entries defaulting to pipe. Ready-made [`StdioMode`]/[`StdioSpec`] values
/// convert without validation.
pub trait IntoStdioSpec {
    fn into_stdio_spec(self) -> Result<StdioSpec>;
}

impl IntoStdioSpec for StdioSpec {
    fn into_stdio_spec(self) -> Result<StdioSpec> {
        Ok(self)
    }
}

impl IntoStdioSpec for StdioMode {
    fn into_stdio_spec(self) -> Result<StdioSpec> {
        Ok(self.into())
    }
}

impl IntoStdioSpec for &str {
    fn into_stdio_spec(self) -> Result<StdioSpec> {
        self.parse::<StdioMode>().map(Into::into)
    }
}

impl IntoStdioSpec for String {
    fn into_stdio_spec(self) -> Result<StdioSpec> {
        self.as_str().into_stdio_spec()
    }
}

impl IntoStdioSpec for &[&str] {
    fn into_stdio_spec(self) -> Result<StdioSpec> {
        StdioSpec::from_tokens(self)
    }
}

impl<const N: usize> IntoStdioSpec for [&str; N] {
    fn into_stdio_spec(self) -> Result<StdioSpec> {
        StdioSpec::from_tokens(&self)
    }
}

impl IntoStdioSpec for Vec<&str> {
    fn into_stdio_spec(self) -> Result<StdioSpec> {
        StdioSpec::from_tokens(&self)
    }
}

impl IntoStdioSpec for &[String] {
    fn into_stdio_spec(self) -> Result<StdioSpec> {
        StdioSpec::from_tokens(self)
    }
}

impl IntoStdioSpec for Vec<String> {
    fn into_stdio_spec(self) -> Result<StdioSpec> {
        StdioSpec::from_tokens(&self)
    }
}

/// Writable handle to a spawned process's stdin
pub struct InputStream {
    inner: Box<dyn AsyncWrite + Send + Unpin>,
}

impl InputStream {
    /// Wrap a writable stream
    pub fn new(inner: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            inner: Box::new(inner),
        }
    }
}

impl AsyncWrite for InputStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(self.get_mut().inner.as_mut()).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(self.get_mut().inner.as_mut()).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(self.get_mut().inner.as_mut()).poll_shutdown(cx)
    }
}

/// Readable handle to a spawned process's stdout or stderr
///
/// A stream may carry a drain guard that resolves once the reader observes
/// end-of-file or the stream is dropped; spawn collaborators use the guard to
/// defer the close notification until piped output has drained.
pub struct OutputStream {
    inner: Box<dyn AsyncRead + Send + Unpin>,
    drained: Option<oneshot::Sender<()>>,
}

impl OutputStream {
    /// Wrap a readable stream with no drain tracking
    pub fn new(inner: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            inner: Box::new(inner),
            drained: None,
        }
    }

    /// Wrap a readable stream, resolving `guard` on end-of-file or drop
    pub fn with_drain_guard(
        inner: impl AsyncRead + Send + Unpin + 'static,
        guard: oneshot::Sender<()>,
    ) -> Self {
        Self {
            inner: Box::new(inner),
            drained: Some(guard),
        }
    }
}

impl AsyncRead for OutputStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let filled = buf.filled().len();
        let poll = Pin::new(this.inner.as_mut()).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = poll {
            // A successful read that appends nothing is end-of-file
            if buf.filled().len() == filled {
                if let Some(guard) = this.drained.take() {
                    let _ = guard.send(());
                }
            }
        }
        poll
    }
}
