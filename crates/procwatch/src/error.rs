//! Error types for process configuration and lifecycle tracking

use std::io;
use thiserror::Error;

/// Process configuration and lifecycle errors
#[derive(Debug, Error)]
pub enum ProcessError {
    /// A configuration value was rejected by a builder setter or start-time check
    #[error("Invalid configuration for {field}: got {value}, expected {expected}")]
    InvalidConfiguration {
        field: String,
        value: String,
        expected: String,
    },

    /// The spawn collaborator could not produce a process
    #[error("Failed to spawn `{command}`: {source}")]
    SpawnFailure {
        command: String,
        #[source]
        source: io::Error,
    },

    /// Delivering a signal to a live process failed
    #[error("Failed to deliver {signal} to process {pid}: {reason}")]
    SignalDelivery {
        pid: u32,
        signal: String,
        reason: String,
    },

    /// A stdio stream failed while being drained
    #[error("Stream failure on {stream}: {source}")]
    StreamFailure {
        stream: String,
        #[source]
        source: io::Error,
    },

    /// Waiting on a spawned process failed
    #[error("Failed to await process {pid}: {source}")]
    WaitFailure {
        pid: u32,
        #[source]
        source: io::Error,
    },

    /// An operation that needs a live process reference ran after the reference
    /// was released
    #[error("Invalid state: {operation} requires a live process reference")]
    InvalidState { operation: String },
}

/// Result type for process operations
pub type Result<T> = std::result::Result<T, ProcessError>;
