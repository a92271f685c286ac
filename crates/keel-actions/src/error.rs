// error.rs — Error types for action registration and invocation.

use keel_events::{ActionKey, FailureKind};
use keel_log::WriteError;
use thiserror::Error;
use uuid::Uuid;

/// Why a descriptor could not be registered.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A different descriptor is already registered under this key.
    #[error("action {key} is already registered with a different descriptor")]
    Conflict { key: ActionKey },

    #[error("invalid {field} '{value}' in action descriptor: expected [a-z][a-z0-9_]*")]
    InvalidIdentifier { field: &'static str, value: String },

    /// An input or output schema does not compile.
    #[error("invalid {which} schema for {key}: {reason}")]
    InvalidSchema {
        key: ActionKey,
        which: &'static str,
        reason: String,
    },

    /// A declared side effect is not a usable `namespace.type`.
    #[error("invalid side effect '{side_effect}' declared by {key}: {reason}")]
    InvalidSideEffect {
        key: ActionKey,
        side_effect: String,
        reason: String,
    },
}

/// Why an invocation did not produce a result.
///
/// `UnknownAction` and `InvalidInput` are raised before anything is
/// written. Every other variant is raised after `action.invoked` was
/// recorded, and carries the correlation id of that invocation.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("unknown action '{key}'")]
    UnknownAction { key: ActionKey },

    #[error("invalid input for {key}: {}", errors.join("; "))]
    InvalidInput { key: ActionKey, errors: Vec<String> },

    /// The `action.invoked` event could not be written; the operation
    /// did not run.
    #[error("failed to record invocation of {key}: {source}")]
    Write {
        key: ActionKey,
        #[source]
        source: WriteError,
    },

    #[error("{key} failed (correlation {correlation_id}): {message}")]
    Failed {
        key: ActionKey,
        correlation_id: Uuid,
        failure: FailureKind,
        message: String,
    },

    #[error("{key} aborted (correlation {correlation_id}): {reason}")]
    Aborted {
        key: ActionKey,
        correlation_id: Uuid,
        reason: String,
    },

    /// The operation finished but its terminal event could not be written.
    #[error("{key} finished but its terminal event was not recorded (correlation {correlation_id}): {source}")]
    TerminalWrite {
        key: ActionKey,
        correlation_id: Uuid,
        #[source]
        source: WriteError,
    },
}

impl ActionError {
    /// Correlation id of the invocation, once one was recorded.
    pub fn correlation_id(&self) -> Option<Uuid> {
        match self {
            ActionError::Failed { correlation_id, .. }
            | ActionError::Aborted { correlation_id, .. }
            | ActionError::TerminalWrite { correlation_id, .. } => Some(*correlation_id),
            _ => None,
        }
    }

    /// Whether retrying the same invocation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ActionError::Write { source, .. } | ActionError::TerminalWrite { source, .. } => {
                source.is_transient()
            }
            _ => false,
        }
    }
}

/// Error returned by a wrapped operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct OperationError {
    pub message: String,
    pub failure: FailureKind,
}

impl OperationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            failure: FailureKind::Operation,
        }
    }

    pub(crate) fn with_failure(message: impl Into<String>, failure: FailureKind) -> Self {
        Self {
            message: message.into(),
            failure,
        }
    }

    /// Wrap any error, keeping its display text.
    pub fn from_error(error: &dyn std::error::Error) -> Self {
        Self::new(error.to_string())
    }
}

impl From<String> for OperationError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for OperationError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}
