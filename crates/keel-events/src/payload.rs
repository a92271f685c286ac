// payload.rs — Typed payloads for the action lifecycle.
//
// The execution wrapper writes these and the reconstructor reads them, so
// both sides share one definition instead of poking at raw JSON.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::SchemaError;

/// Event types in the `action` namespace.
pub mod action_types {
    pub const INVOKED: &str = "invoked";
    pub const SUCCEEDED: &str = "succeeded";
    pub const FAILED: &str = "failed";
    pub const ABORTED: &str = "aborted";
}

/// `domain.verb` key identifying a registered action, e.g. `task.create`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ActionKey {
    pub domain: String,
    pub verb: String,
}

impl ActionKey {
    pub fn new(domain: impl Into<String>, verb: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            verb: verb.into(),
        }
    }
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.domain, self.verb)
    }
}

impl FromStr for ActionKey {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((domain, verb)) if !domain.is_empty() && !verb.is_empty() && !verb.contains('.') => {
                Ok(ActionKey::new(domain, verb))
            }
            _ => Err(SchemaError::Malformed {
                reason: format!("action key '{}' must be 'domain.verb'", s),
            }),
        }
    }
}

impl Serialize for ActionKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ActionKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The single outcome that closes an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalOutcome {
    Succeeded,
    Failed,
    Aborted,
}

impl TerminalOutcome {
    pub fn event_type(self) -> &'static str {
        match self {
            TerminalOutcome::Succeeded => action_types::SUCCEEDED,
            TerminalOutcome::Failed => action_types::FAILED,
            TerminalOutcome::Aborted => action_types::ABORTED,
        }
    }

    /// Map an `action.*` event type back to its outcome, if terminal.
    pub fn from_event_type(kind: &str) -> Option<Self> {
        match kind {
            action_types::SUCCEEDED => Some(TerminalOutcome::Succeeded),
            action_types::FAILED => Some(TerminalOutcome::Failed),
            action_types::ABORTED => Some(TerminalOutcome::Aborted),
            _ => None,
        }
    }
}

impl fmt::Display for TerminalOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_type())
    }
}

/// Payload of `action.invoked`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokedPayload {
    pub domain: String,
    pub verb: String,
    pub inputs: serde_json::Value,
    /// SHA-256 over the canonical JSON of `inputs`.
    pub input_fingerprint: String,
    /// Logical target for idempotent actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// Payload of `action.succeeded`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SucceededPayload {
    pub domain: String,
    pub verb: String,
    pub output: serde_json::Value,
    pub duration_ms: u64,
    /// Set when an idempotent re-invocation returned an earlier result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deduplicated_from: Option<Uuid>,
}

/// What went wrong in a failed invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The operation returned an error.
    #[default]
    Operation,
    /// The operation panicked.
    Panic,
    /// The output did not satisfy the descriptor's output schema.
    OutputSchema,
    /// The operation tried to emit a side effect it did not declare.
    UndeclaredSideEffect,
    /// A side-effect event could not be written.
    SideEffectWrite,
}

/// Payload of `action.failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedPayload {
    pub domain: String,
    pub verb: String,
    pub error: String,
    #[serde(default)]
    pub failure: FailureKind,
    #[serde(default)]
    pub duration_ms: u64,
}

/// Payload of `action.aborted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbortedPayload {
    pub domain: String,
    pub verb: String,
    pub reason: String,
    #[serde(default)]
    pub duration_ms: u64,
}
