// error.rs — Errors raised by event handlers.
//
// A handler error never propagates past the router: it is logged, counted,
// and the remaining handlers still receive the event.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandlerError {
    /// A sink could not write its output.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The handler looked at the event and refused it.
    #[error("handler rejected event: {0}")]
    Rejected(String),

    /// A queued handler's worker thread is gone.
    #[error("handler '{handler}' is no longer running")]
    Disconnected { handler: String },

    /// The handler panicked; the router caught it.
    #[error("handler panicked: {0}")]
    Panicked(String),
}
