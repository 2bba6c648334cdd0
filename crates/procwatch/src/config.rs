//! Validated spawn configuration
//!
//! [`ProcessConfig`] accumulates spawn parameters through per-field setters
//! and hands the assembled values to a [`ProcessSpawner`] at start time.
//! Fallible setters reject bad values without touching prior state; setters
//! whose argument type already rules out bad input are infallible. The JSON
//! bundle path is deliberately looser: fields that are absent or mistyped in
//! the bundle are skipped silently, so partial external payloads never fail.

use std::collections::HashMap;
use std::path::PathBuf;

use serde_json::Value;

use crate::error::{ProcessError, Result};
use crate::handle::ProcessHandle;
use crate::spawn::{OsSpawner, ProcessSpawner};
use crate::stdio::{IntoStdioSpec, StdioSpec};

/// Spawn options assembled by the builder
///
/// Unset fields inherit from the parent process. A set `env` replaces the
/// child environment wholesale rather than extending the parent's.
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Working directory (None = inherit)
    pub cwd: Option<PathBuf>,
    /// Child environment (None = inherit the parent environment)
    pub env: Option<HashMap<String, String>>,
    /// User id to run as (None = inherit; Unix only)
    pub uid: Option<u32>,
    /// Group id to run as (None = inherit; Unix only)
    pub gid: Option<u32>,
    /// Spawn the child outside the parent's process group
    pub detached: bool,
    /// Per-stream stdio wiring
    pub stdio: StdioSpec,
}

/// Builder for a supervised child process
///
/// # Examples
/// ```
/// use procwatch::ProcessConfig;
///
/// # fn main() -> procwatch::Result<()> {
/// let mut config = ProcessConfig::new();
/// config
///     .command("rust-analyzer")?
///     .args(["--stdio"])
///     .detached(false);
/// assert_eq!(config.get_command(), "rust-analyzer");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct ProcessConfig {
    command: String,
    args: Vec<String>,
    options: ProcessOptions,
}

impl ProcessConfig {
    /// Create an empty configuration
    ///
    /// The command starts empty and must be set before [`start`](Self::start).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the executable command
    ///
    /// Rejects an empty command, leaving the prior value in place.
    pub fn command(&mut self, command: impl Into<String>) -> Result<&mut Self> {
        let command = command.into();
        if command.is_empty() {
            return Err(ProcessError::InvalidConfiguration {
                field: "command".to_string(),
                value: format!("{command:?}"),
                expected: "a non-empty executable name".to_string(),
            });
        }
        self.command = command;
        Ok(self)
    }

    /// Set command arguments, replacing any previously set
    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the working directory
    ///
    /// Rejects an empty path, leaving the prior value in place.
    pub fn cwd(&mut self, dir: impl Into<PathBuf>) -> Result<&mut Self> {
        let dir = dir.into();
        if dir.as_os_str().is_empty() {
            return Err(ProcessError::InvalidConfiguration {
                field: "cwd".to_string(),
                value: format!("{dir:?}"),
                expected: "a non-empty directory path".to_string(),
            });
        }
        self.options.cwd = Some(dir);
        Ok(self)
    }

    /// Set the child environment, replacing the parent environment wholesale
    pub fn env<I, K, V>(&mut self, vars: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.options.env = Some(
            vars.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        );
        self
    }

    /// Set the user id the child runs as (Unix only at spawn time)
    pub fn uid(&mut self, uid: u32) -> &mut Self {
        self.options.uid = Some(uid);
        self
    }

    /// Set the group id the child runs as (Unix only at spawn time)
    pub fn gid(&mut self, gid: u32) -> &mut Self {
        self.options.gid = Some(gid);
        self
    }

    /// Spawn the child outside the parent's process group
    pub fn detached(&mut self, detached: bool) -> &mut Self {
        self.options.detached = detached;
        self
    }

    /// Set stdio wiring from a single mode token, a per-stream token
    /// sequence, or a ready-made spec
    ///
    /// This is the one setter that accepts two input shapes; see
    /// [`IntoStdioSpec`]. Invalid tokens and oversized sequences are
    /// rejected, leaving the prior wiring in place.
    pub fn stdio(&mut self, spec: impl IntoStdioSpec) -> Result<&mut Self> {
        self.options.stdio = spec.into_stdio_spec()?;
        Ok(self)
    }

    /// Apply a partial configuration bundle shaped
    /// `{ command, args, options: { cwd, detached, env, gid, stdio, uid } }`
    ///
    /// Each field is applied only when present and correctly typed in the
    /// JSON; everything else is skipped silently, including values the strict
    /// setters would reject. Non-object bundles are ignored wholesale. This
    /// never fails: the bundle path exists for partial external payloads,
    /// unlike the setters, which reject programmatic misuse loudly.
    pub fn apply_bundle(&mut self, bundle: &Value) -> &mut Self {
        let Value::Object(fields) = bundle else {
            return self;
        };

        if let Some(Value::Array(args)) = fields.get("args") {
            if let Some(args) = args
                .iter()
                .map(|entry| entry.as_str().map(str::to_owned))
                .collect::<Option<Vec<String>>>()
            {
                self.args(args);
            }
        }
        if let Some(Value::String(command)) = fields.get("command") {
            let _ = self.command(command.as_str());
        }
        if let Some(Value::Object(options)) = fields.get("options") {
            if let Some(Value::String(cwd)) = options.get("cwd") {
                let _ = self.cwd(cwd.as_str());
            }
            if let Some(Value::Bool(detached)) = options.get("detached") {
                self.detached(*detached);
            }
            if let Some(Value::Object(env)) = options.get("env") {
                if let Some(vars) = env
                    .iter()
                    .map(|(key, value)| value.as_str().map(|value| (key.clone(), value.to_owned())))
                    .collect::<Option<Vec<_>>>()
                {
                    self.env(vars);
                }
            }
            if let Some(gid) = options.get("gid").and_then(bundle_u32) {
                self.gid(gid);
            }
            match options.get("stdio") {
                Some(Value::String(mode)) => {
                    let _ = self.stdio(mode.as_str());
                }
                Some(Value::Array(modes)) => {
                    if let Some(modes) = modes
                        .iter()
                        .map(|entry| entry.as_str().map(str::to_owned))
                        .collect::<Option<Vec<String>>>()
                    {
                        let _ = self.stdio(modes);
                    }
                }
                _ => {}
            }
            if let Some(uid) = options.get("uid").and_then(bundle_u32) {
                self.uid(uid);
            }
        }
        self
    }

    /// Get the configured command
    pub fn get_command(&self) -> &str {
        &self.command
    }

    /// Get the configured arguments
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Get the assembled spawn options
    pub fn get_options(&self) -> &ProcessOptions {
        &self.options
    }

    /// Spawn the configured process with the default OS-backed spawner
    pub async fn start(&self) -> Result<ProcessHandle> {
        self.start_with(&OsSpawner::new()).await
    }

    /// Spawn the configured process with the given spawn collaborator
    ///
    /// Fails with [`ProcessError::InvalidConfiguration`] when no command has
    /// been set, rather than passing an empty command to the collaborator.
    /// Spawner failures surface synchronously; faults after the spawn is
    /// accepted arrive on the handle's error channel instead.
    pub async fn start_with(&self, spawner: &dyn ProcessSpawner) -> Result<ProcessHandle> {
        if self.command.is_empty() {
            return Err(ProcessError::InvalidConfiguration {
                field: "command".to_string(),
                value: "\"\"".to_string(),
                expected: "a non-empty executable name set before start".to_string(),
            });
        }
        let spawned = spawner.spawn(&self.command, &self.args, &self.options).await?;
        Ok(ProcessHandle::new(spawned))
    }
}

fn bundle_u32(value: &Value) -> Option<u32> {
    value.as_u64().and_then(|id| u32::try_from(id).ok())
}
