// error.rs — Error types for event validation.
//
// Every variant is a permanent failure: a rejected candidate must be fixed
// before it is resubmitted, retrying it unmodified will fail the same way.

use thiserror::Error;

/// Why a candidate event was rejected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    /// The candidate line is not parseable JSON at all.
    #[error("invalid JSON: {reason}")]
    InvalidJson { reason: String },

    /// The candidate is JSON but not an object.
    #[error("event must be a JSON object")]
    NotAnObject,

    /// A required top-level field is absent.
    #[error("missing required field '{field}'")]
    MissingField { field: String },

    /// A required string field is present but empty.
    #[error("field '{field}' must not be empty")]
    EmptyField { field: String },

    /// `schema_version` is not a `MAJOR.MINOR.PATCH` string.
    #[error("invalid schema_version '{value}'")]
    InvalidVersion { value: String },

    /// The major component is not one this validator understands.
    #[error("unsupported schema major version {major} (supported: {supported:?})")]
    UnsupportedVersion { major: u64, supported: Vec<u64> },

    /// A namespace or type is not a lowercase identifier.
    #[error("invalid {field} '{value}': expected [a-z][a-z0-9_]*")]
    InvalidIdentifier { field: String, value: String },

    /// A field has the wrong JSON type or shape.
    #[error("malformed event: {reason}")]
    Malformed { reason: String },

    /// The payload failed the sub-schema registered for its `namespace.type`.
    #[error("payload rejected for {kind}: {}", errors.join("; "))]
    PayloadRejected { kind: String, errors: Vec<String> },

    /// Strict validators reject types without a registered payload schema.
    #[error("unknown event type '{kind}'")]
    UnknownEventType { kind: String },

    /// A payload schema document could not be compiled.
    #[error("invalid payload schema for {kind}: {reason}")]
    InvalidPayloadSchema { kind: String, reason: String },
}

/// An event id string that does not follow `<micros>-<origin>-<seq>`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid event id '{0}'")]
pub struct EventIdParseError(pub String);

/// A routing pattern that cannot be compiled.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid event pattern '{pattern}': {reason}")]
pub struct PatternError {
    pub pattern: String,
    pub reason: String,
}
