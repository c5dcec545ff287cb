//! Typed error hierarchy for the warden engine.
//!
//! One enum per subsystem:
//! - `CheckpointError`: checkpoint store failures (fatal for a task attempt)
//! - `AgentError`: transient agent execution failures (retried within budget)
//! - `RunnerError`: verification infrastructure failures (bounded retry, then block)
//! - `PolicyError`: policy document load/validation failures
//! - `QueueError`: queue load and status write-back failures
//! - `LoopError`: iteration loop aborts
//! - `DriverError`: batch-level failures that map to process exit codes

use std::path::PathBuf;
use thiserror::Error;

use crate::task::TaskStatus;

/// Errors from the checkpoint store.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Checkpoint I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Checkpoint {number} already exists in namespace {namespace}")]
    AlreadyExists { namespace: String, number: u64 },

    #[error("Corrupt checkpoint at {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize checkpoint: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Namespace {0} already has an active writer")]
    NamespaceBusy(String),

    #[error("No checkpoint found in namespace {0}")]
    NotFound(String),

    #[error("Invalid namespace component '{0}'")]
    InvalidKey(String),
}

/// Errors from a single agent invocation. All variants are transient.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Failed to spawn agent process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Agent timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Agent exited with non-zero code {exit_code}")]
    Crashed { exit_code: i32 },

    #[error("Agent terminated after run mode changed to {mode}")]
    Terminated { mode: String },

    #[error("Agent I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Change tracking failed: {0}")]
    Tracker(String),
}

/// Verification command runner failures, as opposed to a check that ran and failed.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Failed to spawn check '{step}': {source}")]
    Spawn {
        step: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Check '{step}' timed out after {secs}s")]
    Timeout { step: String, secs: u64 },

    #[error("Check '{step}' could not run: {message}")]
    Unavailable { step: String, message: String },
}

/// Policy document errors.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Failed to read policy file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse policy: {0}")]
    Parse(#[source] toml::de::Error),

    #[error("Guardrail '{name}' has an invalid pattern: {source}")]
    InvalidPattern {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("Protected path '{pattern}' is not a valid glob: {source}")]
    InvalidGlob {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("Policy is missing a version")]
    MissingVersion,
}

/// Queue errors.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Failed to read queue at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse queue at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write queue at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Task {0} not found in queue")]
    UnknownTask(String),

    #[error("Duplicate task id {0} in queue")]
    DuplicateTask(String),

    #[error("Task {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: TaskStatus,
        to: TaskStatus,
    },
}

/// Errors that abort an iteration loop.
#[derive(Debug, Error)]
pub enum LoopError {
    #[error("Checkpoint store failure: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Failed to write audit artifact: {0}")]
    Audit(#[source] anyhow::Error),
}

/// Batch-level driver failures.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Failed to load queue: {0}")]
    QueueLoad(#[source] QueueError),

    #[error("Run mode is {mode}; no new work will start")]
    KillSwitch { mode: String },

    #[error("Another driver holds the lock at {path}")]
    Locked { path: PathBuf },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
