//! # keel-replay
//!
//! Deterministic reconstruction of workflow state from the event log.
//!
//! [`WorkflowState`] is never stored: it is a pure fold of the ordered
//! event stream through per-namespace reducers. Replaying the same log
//! always yields the same state, and because the state is made of keyed
//! maps, the relative interleaving of independent producers does not
//! change it. Corrupt records are skipped with a [`ReplayWarning`].
//!
//! ## Quick Example
//!
//! ```rust,no_run
//! use keel_log::LogReader;
//! use keel_replay::{find_orphans, Reconstructor};
//!
//! let reader = LogReader::new(".keel/events", "workflow");
//! let outcome = Reconstructor::default().replay_log(&reader, None).unwrap();
//! for warning in &outcome.warnings {
//!     eprintln!("skipped {}", warning);
//! }
//! let orphans = find_orphans(&outcome.state, chrono::Duration::minutes(15), chrono::Utc::now());
//! println!("{} tasks, {} orphaned invocations", outcome.state.tasks.len(), orphans.len());
//! ```

pub mod orphans;
pub mod reconstructor;
pub mod reducer;
pub mod state;

pub use orphans::{find_orphans, terminal_anomalies, OrphanedInvocationWarning, TerminalAnomaly};
pub use reconstructor::{replay_events, Reconstructor, ReplayOutcome, ReplayWarning};
pub use state::{
    BranchRecord, CommitRecord, ContainerRecord, DecisionRecord, GitState, InvocationRecord,
    InvocationStatus, PhaseChange, SecuritySummary, SystemState, TaskPhase, TaskRecord,
    WorkflowState,
};
