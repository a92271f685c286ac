//! # keel-log
//!
//! Durable, append-only, time-rotated persistence for Keel events.
//!
//! Events are stored as JSONL (one JSON object per line) in segment files
//! named `events-<stream>-<window>.jsonl`. The [`EventWriter`] is the only
//! component that writes them; it holds an exclusive OS-level lock for the
//! duration of a single append and notifies [`AppendObserver`]s once the
//! record is durable. [`LogReader`] reads segments without locking.
//!
//! ## Quick Example
//!
//! ```rust,no_run
//! use keel_events::{EventDraft, EventValidator};
//! use keel_log::{EventWriter, LogReader, WriterOptions};
//!
//! let writer = EventWriter::open(WriterOptions::new("/tmp/keel/events"));
//! writer
//!     .emit(EventDraft::new("git", "commit", "agent-1").with_task("T-7"))
//!     .unwrap();
//!
//! let (events, rejected) = LogReader::new("/tmp/keel/events", "workflow")
//!     .events(&EventValidator::default())
//!     .unwrap();
//! assert!(rejected.is_empty());
//! ```

pub mod error;
pub mod reader;
pub mod retention;
pub mod rotation;
pub mod writer;

pub use error::{ReadError, RetentionError, WriteError};
pub use reader::{LogReader, LogRecord, RecordLocation, Records, RejectedRecord};
pub use retention::{RetentionMode, RetentionPolicy};
pub use rotation::{list_segments, RotationPeriod, Segment};
pub use writer::{AppendObserver, Emitter, EventWriter, WriterOptions};
