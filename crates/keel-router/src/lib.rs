//! # keel-router
//!
//! Fan-out of written events to interested consumers.
//!
//! The [`EventRouter`] is registered as an observer on the
//! [`keel_log::EventWriter`]; every successful append is delivered to the
//! handlers whose [`keel_events::EventPattern`] (and optional filter)
//! match. A failing or panicking handler is logged and counted, never
//! propagated to the producer or to sibling handlers.
//!
//! ## Quick Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use keel_events::{EventDraft, EventPattern};
//! use keel_log::{EventWriter, WriterOptions};
//! use keel_router::{EventRouter, MetricsHandler};
//!
//! let writer = EventWriter::open(WriterOptions::new("/tmp/keel/events"));
//! let router = Arc::new(EventRouter::new());
//! writer.add_observer(router.clone());
//!
//! let metrics = Arc::new(MetricsHandler::new("metrics"));
//! router.register(EventPattern::new("git.*").unwrap(), metrics.clone());
//!
//! writer.emit(EventDraft::new("git", "commit", "agent-1")).unwrap();
//! assert_eq!(metrics.snapshot().total, 1);
//! ```

pub mod error;
pub mod handler;
pub mod queued;
pub mod router;
pub mod sinks;

pub use error::HandlerError;
pub use handler::{EventHandler, FnHandler};
pub use queued::QueuedHandler;
pub use router::{DispatchReport, EventRouter, HandlerStats, RouteId};
pub use sinks::{IndexHandler, JsonlSink, MetricsHandler, MetricsSnapshot};
