//! Unified error handling for inference-warden
//!
//! Every failure inside a worker loop or the terminator ends in a respawn or a
//! termination attempt; these types exist so the places that absorb errors can
//! log them with a category, and so the binary can report configuration
//! problems before the fleet starts.

use crate::core::models::WorkerId;
use crate::core::process_tree::ProcessTreeError;
use std::fmt;
use std::io;
use thiserror::Error;

/// Main error type for the supervisor
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The worker command could not be started
    #[error("Worker {worker}: failed to spawn `{command}`: {source}")]
    Spawn {
        worker: WorkerId,
        command: String,
        #[source]
        source: io::Error,
    },

    /// Reading the worker's combined output failed
    #[error("Worker {worker}: output stream error: {source}")]
    OutputStream {
        worker: WorkerId,
        #[source]
        source: io::Error,
    },

    /// Process tree inspection errors
    #[error("Process tree error: {0}")]
    ProcessTree(#[from] ProcessTreeError),

    /// A worker task ended abnormally (panic or runtime cancellation)
    #[error("Worker {worker}: task ended abnormally: {message}")]
    WorkerJoin { worker: WorkerId, message: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Coarse classification used in log fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Config,
    Spawn,
    OutputStream,
    ProcessTree,
    Concurrency,
    Io,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorCategory::Config => "config",
            ErrorCategory::Spawn => "spawn",
            ErrorCategory::OutputStream => "output_stream",
            ErrorCategory::ProcessTree => "process_tree",
            ErrorCategory::Concurrency => "concurrency",
            ErrorCategory::Io => "io",
        })
    }
}

impl SupervisorError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        SupervisorError::Config {
            message: message.into(),
        }
    }

    /// Get error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            SupervisorError::Config { .. } => ErrorCategory::Config,
            SupervisorError::Spawn { .. } => ErrorCategory::Spawn,
            SupervisorError::OutputStream { .. } => ErrorCategory::OutputStream,
            SupervisorError::ProcessTree(_) => ErrorCategory::ProcessTree,
            SupervisorError::WorkerJoin { .. } => ErrorCategory::Concurrency,
            SupervisorError::Io(_) => ErrorCategory::Io,
        }
    }
}

pub type SupervisorResult<T> = Result<T, SupervisorError>;
