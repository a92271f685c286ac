//! # keel-events
//!
//! The canonical event record for Keel and its structural validator.
//!
//! Every significant operation in a multi-agent development workflow is
//! recorded as an [`Event`]: a versioned, immutable JSON record with a
//! `namespace.type` routing key, a correlation id linking causally related
//! events, an actor, an optional task, and a type-specific payload.
//!
//! ## Quick Example
//!
//! ```rust
//! use keel_events::{EventDraft, EventIdGenerator, EventValidator};
//! use serde_json::json;
//!
//! let mut ids = EventIdGenerator::new();
//! let (id, at) = ids.next(chrono::Utc::now());
//! let event = EventDraft::new("task", "created", "agent-1")
//!     .with_task("T-42")
//!     .with_payload(json!({"title": "Add login page"}))
//!     .into_event(id, at);
//!
//! let line = event.to_line().unwrap();
//! assert_eq!(EventValidator::default().validate_str(&line).unwrap(), event);
//! ```

pub mod error;
pub mod event;
pub mod filter;
pub mod pattern;
pub mod payload;
pub mod schema;
pub mod version;

pub use error::{EventIdParseError, PatternError, SchemaError};
pub use event::{namespaces, Event, EventDraft, EventId, EventIdGenerator};
pub use filter::EventFilter;
pub use pattern::EventPattern;
pub use payload::{
    action_types, AbortedPayload, ActionKey, FailedPayload, FailureKind, InvokedPayload,
    SucceededPayload, TerminalOutcome,
};
pub use schema::{EventValidator, PayloadSchemas};
pub use version::{SchemaVersion, CURRENT_SCHEMA_VERSION};
