// error.rs — Error types for the event log.
//
// Write failures are surfaced to the caller and never swallowed. Whether to
// retry is the caller's decision: `is_transient()` separates I/O trouble
// (worth a retry with backoff) from schema rejections (never retry as-is).

use std::path::PathBuf;

use keel_events::SchemaError;
use thiserror::Error;

/// Errors from appending to the log.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The event failed validation; nothing was written.
    #[error("event rejected before write: {0}")]
    Schema(#[from] SchemaError),

    /// The event could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The log directory could not be created.
    #[error("failed to create log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Opening, writing or syncing the segment failed (disk full,
    /// permissions, ...). The partial record, if any, was truncated away.
    #[error("failed to append to {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The exclusive append lock could not be taken.
    #[error("failed to lock {path}: {source}")]
    Lock {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl WriteError {
    /// Whether a retry of the same event could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            WriteError::CreateDir { .. } | WriteError::Io { .. } | WriteError::Lock { .. }
        )
    }
}

/// Errors from reading log segments.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Errors from applying a retention policy.
#[derive(Debug, Error)]
pub enum RetentionError {
    #[error(transparent)]
    Read(#[from] ReadError),

    #[error("failed to {action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to record retention event: {0}")]
    Write(#[from] WriteError),
}
