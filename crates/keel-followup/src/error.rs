// error.rs — Error types for followup graph construction.

use keel_events::ActionKey;
use keel_replay::TaskPhase;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FollowupError {
    /// A rule names an action the registry does not know.
    #[error("followup rule for phase '{phase}' names unregistered action '{key}'")]
    UnknownAction { key: ActionKey, phase: TaskPhase },

    /// An always-allowed entry names an action the registry does not know.
    #[error("always-allowed action '{key}' is not registered")]
    UnknownAlwaysAllowed { key: ActionKey },

    /// A rule marks the same action both allowed and unusual.
    #[error("rule for phase '{phase}' lists '{key}' as both allowed and unusual")]
    Contradictory { key: ActionKey, phase: TaskPhase },
}
