// state.rs — Workflow state derived from the event log.
//
// Nothing here is ever persisted or edited in place: a WorkflowState is
// what you get by folding the log, and the only way to change it is to
// append events and fold again.
//
// Every collection is a map keyed by something the events carry (task id,
// correlation id, branch, sha, event id). Independent producers therefore
// touch disjoint keys, and interleaving their events differently yields
// the same state.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use keel_events::{ActionKey, EventId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle phase of a task.
///
/// ```text
/// Specified → Designed → Planned → Operating → Verifying → Done
///     (Abandoned from any phase; reopen returns to Specified)
/// ```
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    #[default]
    Specified,
    Designed,
    Planned,
    Operating,
    Verifying,
    Done,
    Abandoned,
}

impl TaskPhase {
    pub const ALL: [TaskPhase; 7] = [
        TaskPhase::Specified,
        TaskPhase::Designed,
        TaskPhase::Planned,
        TaskPhase::Operating,
        TaskPhase::Verifying,
        TaskPhase::Done,
        TaskPhase::Abandoned,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskPhase::Specified => "specified",
            TaskPhase::Designed => "designed",
            TaskPhase::Planned => "planned",
            TaskPhase::Operating => "operating",
            TaskPhase::Verifying => "verifying",
            TaskPhase::Done => "done",
            TaskPhase::Abandoned => "abandoned",
        }
    }

    /// Phase a task lands in after a successful `task.<verb>` action.
    pub fn after_verb(verb: &str) -> Option<TaskPhase> {
        Some(match verb {
            "create" | "reopen" => TaskPhase::Specified,
            "design" => TaskPhase::Designed,
            "plan" => TaskPhase::Planned,
            "operate" => TaskPhase::Operating,
            "verify" => TaskPhase::Verifying,
            "complete" => TaskPhase::Done,
            "abandon" => TaskPhase::Abandoned,
            _ => return None,
        })
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskPhase::Done | TaskPhase::Abandoned)
    }
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskPhase::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown task phase '{}'", s))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseChange {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<TaskPhase>,
    pub to: TaskPhase,
    pub event_id: EventId,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRecord {
    pub task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub phase: TaskPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    /// Last action that succeeded against this task.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_action: Option<ActionKey>,
    pub history: Vec<PhaseChange>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub(crate) fn new(task_id: &str, at: DateTime<Utc>) -> Self {
        Self {
            task_id: task_id.to_string(),
            title: None,
            phase: TaskPhase::Specified,
            assignee: None,
            last_action: None,
            history: Vec::new(),
            created_at: at,
            updated_at: at,
        }
    }

    /// Move to `to`, recording the change. Same-phase moves are not
    /// recorded, so an action and its own state-change event don't count
    /// twice.
    pub(crate) fn enter(&mut self, to: TaskPhase, event_id: EventId, at: DateTime<Utc>) {
        self.updated_at = self.updated_at.max(at);
        if self.phase == to && !self.history.is_empty() {
            return;
        }
        let from = if self.history.is_empty() && to == TaskPhase::Specified {
            None
        } else {
            Some(self.phase)
        };
        self.phase = to;
        self.history.push(PhaseChange {
            from,
            to,
            event_id,
            at,
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    Pending,
    Succeeded,
    Failed,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvocationRecord {
    pub correlation_id: Uuid,
    pub action: ActionKey,
    pub actor: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub inputs: Value,
    pub input_fingerprint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub invoked_event: EventId,
    pub invoked_at: DateTime<Utc>,
    pub status: InvocationStatus,
    /// Terminal events seen; anything but 1 on a settled invocation is
    /// an anomaly.
    pub terminal_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deduplicated_from: Option<Uuid>,
    /// Non-lifecycle events emitted under this correlation id.
    pub side_effects: Vec<EventId>,
}

impl InvocationRecord {
    /// The task this invocation acted on: the event's task id, or a
    /// `task_id` input.
    pub fn subject_task(&self) -> Option<&str> {
        self.task_id
            .as_deref()
            .or_else(|| self.inputs.get("task_id").and_then(Value::as_str))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BranchRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head: Option<String>,
    pub commits: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged_into: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub author: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GitState {
    pub branches: BTreeMap<String, BranchRecord>,
    pub commits: BTreeMap<String, CommitRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SecuritySummary {
    pub scans: u64,
    pub last_findings: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_scan_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecisionRecord {
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    pub actor: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub correlation_id: Uuid,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SystemState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<String>,
    pub config_changes: u64,
    pub retention_runs: u64,
}

/// Everything replay knows about the workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkflowState {
    pub tasks: BTreeMap<String, TaskRecord>,
    pub invocations: BTreeMap<Uuid, InvocationRecord>,
    pub git: GitState,
    pub containers: BTreeMap<String, ContainerRecord>,
    pub security: BTreeMap<String, SecuritySummary>,
    pub decisions: BTreeMap<EventId, DecisionRecord>,
    pub system: SystemState,
    /// Events folded into this state, per routing key.
    pub event_counts: BTreeMap<String, u64>,
}

impl WorkflowState {
    pub fn task(&self, task_id: &str) -> Option<&TaskRecord> {
        self.tasks.get(task_id)
    }

    pub fn invocation(&self, correlation_id: &Uuid) -> Option<&InvocationRecord> {
        self.invocations.get(correlation_id)
    }

    pub fn pending_invocations(&self) -> impl Iterator<Item = &InvocationRecord> {
        self.invocations
            .values()
            .filter(|i| i.status == InvocationStatus::Pending)
    }
}
