// error.rs — Error types for log queries.

use keel_events::PatternError;
use keel_log::ReadError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Pattern(#[from] PatternError),

    /// Reading the log itself failed; skipped records are not errors.
    #[error(transparent)]
    Read(#[from] ReadError),

    #[error("unknown group key '{0}' (expected namespace, type, actor, task or correlation)")]
    UnknownGroupKey(String),

    #[error("unknown bucket '{0}' (expected minute, hour or day)")]
    UnknownBucket(String),
}
