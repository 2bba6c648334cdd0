//! # procwatch
//!
//! **Purpose**: Supervised child-process primitives
//!
//! Provides a validating spawn-parameter builder and an observable process
//! handle that republishes OS lifecycle notifications (exit, close, error)
//! to any number of subscribers.
//!
//! ## Features
//!
//! - **Validated Configuration**: Per-field setters that reject bad values
//!   without touching prior state, plus a lenient JSON bundle path for
//!   partial external payloads
//! - **Observable Lifecycle**: Exit, close, and error notifications on
//!   independent broadcast channels, delivered in arrival order
//! - **Exit vs. Close**: Process termination and stdio drain tracked as
//!   independent flags, in whichever order the platform reports them
//! - **Exactly-Once Cleanup**: The process reference is released on the
//!   first close notice, with destroy guarded against the released state
//! - **Pluggable Spawning**: A spawn collaborator trait with a
//!   tokio-backed production implementation
//!
//! ## Usage
//!
//! ```rust,no_run
//! use procwatch::ProcessConfig;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Configure the child
//! let mut config = ProcessConfig::new();
//! config.command("echo")?.args(["hello"]);
//!
//! // Spawn and observe
//! let handle = config.start().await?;
//! let mut exits = handle.subscribe_exit();
//!
//! let termination = exits.recv().await?;
//! println!("exit code: {:?}", termination.code);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod handle;
pub mod spawn;
pub mod stdio;

pub use config::{ProcessConfig, ProcessOptions};
pub use error::{ProcessError, Result};
pub use event::{NoticeSender, Termination};
pub use handle::ProcessHandle;
pub use spawn::{OsSpawner, ProcessSpawner, SignalSender, SpawnedProcess, StdioStreams};
pub use stdio::{InputStream, IntoStdioSpec, OutputStream, StdioMode, StdioSpec};
