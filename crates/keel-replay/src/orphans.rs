// orphans.rs — Invocations that never settled, or settled twice.
//
// The execution wrapper guarantees one terminal event per invocation as
// long as the process survives. A crash between `invoked` and the terminal
// write leaves a pending invocation in the log forever; this scan reports
// those once they are older than a grace period, so slow but healthy
// invocations are not flagged.

use chrono::{DateTime, Duration, Utc};
use keel_events::ActionKey;
use serde::Serialize;
use uuid::Uuid;

use crate::state::{InvocationStatus, WorkflowState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanedInvocationWarning {
    pub correlation_id: Uuid,
    pub action: ActionKey,
    pub actor: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub invoked_at: DateTime<Utc>,
    pub age_secs: i64,
}

/// Pending invocations invoked more than `grace` before `now`, oldest
/// first.
pub fn find_orphans(
    state: &WorkflowState,
    grace: Duration,
    now: DateTime<Utc>,
) -> Vec<OrphanedInvocationWarning> {
    let mut orphans: Vec<OrphanedInvocationWarning> = state
        .pending_invocations()
        .filter(|i| now - i.invoked_at > grace)
        .map(|i| OrphanedInvocationWarning {
            correlation_id: i.correlation_id,
            action: i.action.clone(),
            actor: i.actor.clone(),
            task_id: i.task_id.clone(),
            invoked_at: i.invoked_at,
            age_secs: (now - i.invoked_at).num_seconds(),
        })
        .collect();
    orphans.sort_by(|a, b| {
        a.invoked_at
            .cmp(&b.invoked_at)
            .then(a.correlation_id.cmp(&b.correlation_id))
    });
    orphans
}

/// An invocation closed by more than one terminal event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TerminalAnomaly {
    pub correlation_id: Uuid,
    pub action: ActionKey,
    pub terminal_count: u32,
    pub status: InvocationStatus,
}

pub fn terminal_anomalies(state: &WorkflowState) -> Vec<TerminalAnomaly> {
    state
        .invocations
        .values()
        .filter(|i| i.terminal_count > 1)
        .map(|i| TerminalAnomaly {
            correlation_id: i.correlation_id,
            action: i.action.clone(),
            terminal_count: i.terminal_count,
            status: i.status,
        })
        .collect()
}
