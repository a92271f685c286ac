//! # keel-actions
//!
//! Governed execution of workflow actions.
//!
//! Actions are declared as [`ActionDescriptor`]s (domain, verb, input and
//! output JSON Schemas, idempotency, declared side effects) and registered
//! once into an immutable [`ActionRegistry`]. The [`ActionExecutor`] is the
//! single wrapper every action runs through: it validates inputs, records
//! `action.invoked`, runs the operation and records exactly one terminal
//! event (`action.succeeded`, `action.failed` or `action.aborted`) on
//! every exit path, including panics, cancellation and dropped futures.
//!
//! ## Quick Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use keel_actions::{catalog, ActionExecutor, InvocationRequest};
//! use keel_log::{EventWriter, WriterOptions};
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let writer = Arc::new(EventWriter::open(WriterOptions::new("/tmp/keel/events")));
//! let executor = ActionExecutor::new(Arc::new(catalog::standard()?), writer);
//!
//! let request = InvocationRequest::new("task", "create", json!({"task_id": "T-1", "title": "Login"}))
//!     .actor("agent-1")
//!     .task("T-1");
//! let output = executor
//!     .invoke(request, |ctx| async move {
//!         ctx.side_effect("task", "created", json!({"title": "Login"}))?;
//!         Ok::<_, keel_actions::OperationError>(json!({"task_id": "T-1"}))
//!     })
//!     .await?;
//! # let _ = output;
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod catalog;
pub mod descriptor;
pub mod error;
pub mod executor;
pub mod idempotency;
pub mod registry;

pub use cancel::CancelToken;
pub use descriptor::ActionDescriptor;
pub use error::{ActionError, OperationError, RegistryError};
pub use executor::{ActionContext, ActionExecutor, InvocationRequest};
pub use idempotency::{fingerprint, CachedResult, IdempotencyCache, IdempotencyKey};
pub use registry::{ActionRegistry, ActionRegistryBuilder, RegisteredAction};
