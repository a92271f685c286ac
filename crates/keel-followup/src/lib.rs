//! # keel-followup
//!
//! Advisory sequencing checks: given where a task stands (its phase and
//! the last action that succeeded on it), which actions make sense next?
//!
//! The answer comes from a [`RuleSet`]. Actions are allowed, allowed but
//! unusual (logged at `warn`), or rejected. Nothing here blocks execution;
//! the action executor never consults the graph.
//!
//! ## Quick Example
//!
//! ```rust
//! use keel_actions::catalog;
//! use keel_events::ActionKey;
//! use keel_followup::{rules, FollowupGraph, FollowupState};
//! use keel_replay::TaskPhase;
//!
//! let graph = FollowupGraph::new(&catalog::standard().unwrap(), rules::standard()).unwrap();
//! let state = FollowupState::new(TaskPhase::Specified);
//! assert!(graph.is_allowed(&state, &ActionKey::new("task", "design")));
//! assert!(!graph.is_allowed(&state, &ActionKey::new("task", "operate")));
//! ```

pub mod error;
pub mod graph;
pub mod rules;

pub use error::FollowupError;
pub use graph::{FollowupGraph, FollowupState, Verdict};
pub use rules::{FollowupRule, RuleSet};
