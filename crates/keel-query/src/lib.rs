//! # keel-query
//!
//! Read-side queries over the Keel event log: select events by routing
//! pattern plus task/actor/time filters, then count, group, or bucket them
//! over time.
//!
//! Queries stream the log line by line and never lock it, so they can run
//! while writers are appending. Records that fail validation are counted
//! in [`QueryResult::skipped`] and otherwise ignored.
//!
//! ## Quick Example
//!
//! ```rust,no_run
//! use keel_events::{EventFilter, EventValidator};
//! use keel_log::LogReader;
//! use keel_query::{EventQuery, GroupKey};
//!
//! let reader = LogReader::new(".keel/events", "workflow");
//! let result = EventQuery::parse("action.*")
//!     .unwrap()
//!     .filter(EventFilter::new().task("T-42"))
//!     .run_log(&reader, &EventValidator::default())
//!     .unwrap();
//! for (kind, count) in result.count_by(GroupKey::Kind) {
//!     println!("{kind}: {count}");
//! }
//! ```

pub mod aggregate;
pub mod error;
pub mod query;

pub use aggregate::{count_by, group_by, time_series, Bucket, GroupKey};
pub use error::QueryError;
pub use query::{EventQuery, LimitFrom, QueryResult};
