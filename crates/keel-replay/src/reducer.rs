// reducer.rs — Per-namespace fold functions.
//
// Each reducer decodes its typed payload first and only then mutates the
// state, so a rejected event leaves the state exactly as it was. Reducers
// never look at the wall clock: every timestamp comes from the event.

use chrono::{DateTime, Utc};
use keel_events::{
    action_types, namespaces, AbortedPayload, ActionKey, Event, FailedPayload, InvokedPayload,
    SucceededPayload, TerminalOutcome,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::state::{
    BranchRecord, CommitRecord, ContainerRecord, DecisionRecord, InvocationRecord,
    InvocationStatus, TaskPhase, TaskRecord, WorkflowState,
};

/// Why a reducer refused an event.
pub type Rejection = String;

fn decode<T: DeserializeOwned>(event: &Event) -> Result<T, Rejection> {
    serde_json::from_value(event.payload.clone())
        .map_err(|e| format!("invalid {} payload: {}", event.routing_key(), e))
}

fn require_task(event: &Event) -> Result<&str, Rejection> {
    event
        .task_id
        .as_deref()
        .ok_or_else(|| format!("{} requires a task_id", event.routing_key()))
}

/// Fold one event into `state`.
pub fn apply(state: &mut WorkflowState, event: &Event) -> Result<(), Rejection> {
    match event.namespace.as_str() {
        namespaces::ACTION => action(state, event)?,
        namespaces::TASK => task(state, event)?,
        namespaces::GIT => git(state, event)?,
        namespaces::CONTAINER => container(state, event)?,
        namespaces::SECURITY => security(state, event)?,
        namespaces::DECISION => decision(state, event)?,
        namespaces::SYSTEM => system(state, event)?,
        _ => {}
    }
    if event.namespace != namespaces::ACTION {
        if let Some(invocation) = state.invocations.get_mut(&event.correlation_id) {
            invocation.side_effects.push(event.event_id);
        }
    }
    *state.event_counts.entry(event.routing_key()).or_insert(0) += 1;
    Ok(())
}

fn action(state: &mut WorkflowState, event: &Event) -> Result<(), Rejection> {
    let correlation_id = event.correlation_id;
    if event.kind == action_types::INVOKED {
        let payload: InvokedPayload = decode(event)?;
        if state.invocations.contains_key(&correlation_id) {
            return Err(format!("invocation {} was already recorded", correlation_id));
        }
        state.invocations.insert(
            correlation_id,
            InvocationRecord {
                correlation_id,
                action: ActionKey::new(payload.domain, payload.verb),
                actor: event.actor.clone(),
                task_id: event.task_id.clone(),
                inputs: payload.inputs,
                input_fingerprint: payload.input_fingerprint,
                target: payload.target,
                invoked_event: event.event_id,
                invoked_at: event.timestamp,
                status: InvocationStatus::Pending,
                terminal_count: 0,
                finished_at: None,
                duration_ms: None,
                output: None,
                error: None,
                deduplicated_from: None,
                side_effects: Vec::new(),
            },
        );
        return Ok(());
    }

    let Some(outcome) = TerminalOutcome::from_event_type(&event.kind) else {
        return Ok(());
    };
    // Decode before touching the record.
    let terminal = match outcome {
        TerminalOutcome::Succeeded => Terminal::Succeeded(decode(event)?),
        TerminalOutcome::Failed => Terminal::Failed(decode(event)?),
        TerminalOutcome::Aborted => Terminal::Aborted(decode(event)?),
    };
    let Some(invocation) = state.invocations.get_mut(&correlation_id) else {
        return Err(format!(
            "{} for unknown invocation {}",
            event.routing_key(),
            correlation_id
        ));
    };

    invocation.terminal_count += 1;
    if invocation.status != InvocationStatus::Pending {
        // A second terminal is kept as an anomaly, not applied.
        return Ok(());
    }
    invocation.finished_at = Some(event.timestamp);
    match terminal {
        Terminal::Succeeded(p) => {
            invocation.status = InvocationStatus::Succeeded;
            invocation.duration_ms = Some(p.duration_ms);
            invocation.output = Some(p.output);
            invocation.deduplicated_from = p.deduplicated_from;
        }
        Terminal::Failed(p) => {
            invocation.status = InvocationStatus::Failed;
            invocation.duration_ms = Some(p.duration_ms);
            invocation.error = Some(p.error);
        }
        Terminal::Aborted(p) => {
            invocation.status = InvocationStatus::Aborted;
            invocation.duration_ms = Some(p.duration_ms);
            invocation.error = Some(p.reason);
        }
    }

    if invocation.status == InvocationStatus::Succeeded {
        let key = invocation.action.clone();
        let subject = invocation.subject_task().map(str::to_string);
        let title = invocation
            .inputs
            .get("title")
            .and_then(|t| t.as_str())
            .map(str::to_string);
        if let Some(task_id) = subject {
            task_action_succeeded(state, &task_id, &key, title, event);
        }
    }
    Ok(())
}

enum Terminal {
    Succeeded(SucceededPayload),
    Failed(FailedPayload),
    Aborted(AbortedPayload),
}

fn upsert_task<'a>(
    state: &'a mut WorkflowState,
    task_id: &str,
    at: DateTime<Utc>,
) -> &'a mut TaskRecord {
    state
        .tasks
        .entry(task_id.to_string())
        .or_insert_with(|| TaskRecord::new(task_id, at))
}

fn task_action_succeeded(
    state: &mut WorkflowState,
    task_id: &str,
    key: &ActionKey,
    title: Option<String>,
    event: &Event,
) {
    let task = upsert_task(state, task_id, event.timestamp);
    task.last_action = Some(key.clone());
    task.updated_at = task.updated_at.max(event.timestamp);
    if key.domain != namespaces::TASK {
        return;
    }
    if task.title.is_none() {
        task.title = title;
    }
    if let Some(phase) = TaskPhase::after_verb(&key.verb) {
        task.enter(phase, event.event_id, event.timestamp);
    }
}

#[derive(Deserialize)]
struct TaskCreated {
    title: String,
    #[serde(default)]
    assignee: Option<String>,
}

#[derive(Deserialize)]
struct TaskStateChanged {
    to: String,
}

#[derive(Deserialize)]
struct TaskAssigned {
    assignee: String,
}

fn task(state: &mut WorkflowState, event: &Event) -> Result<(), Rejection> {
    match event.kind.as_str() {
        "created" => {
            let payload: TaskCreated = decode(event)?;
            let task_id = require_task(event)?;
            let task = upsert_task(state, task_id, event.timestamp);
            task.title = Some(payload.title);
            if payload.assignee.is_some() {
                task.assignee = payload.assignee;
            }
            task.enter(TaskPhase::Specified, event.event_id, event.timestamp);
        }
        "state_changed" => {
            let payload: TaskStateChanged = decode(event)?;
            let phase: TaskPhase = payload.to.parse()?;
            let task_id = require_task(event)?;
            upsert_task(state, task_id, event.timestamp).enter(
                phase,
                event.event_id,
                event.timestamp,
            );
        }
        "assigned" => {
            let payload: TaskAssigned = decode(event)?;
            let task_id = require_task(event)?;
            let task = upsert_task(state, task_id, event.timestamp);
            task.assignee = Some(payload.assignee);
            task.updated_at = task.updated_at.max(event.timestamp);
        }
        _ => {}
    }
    Ok(())
}

#[derive(Deserialize)]
struct BranchCreated {
    branch: String,
    #[serde(default)]
    from: Option<String>,
}

#[derive(Deserialize)]
struct Committed {
    sha: String,
    #[serde(default)]
    branch: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct Merged {
    source: String,
    target: String,
    #[serde(default)]
    sha: Option<String>,
}

fn git(state: &mut WorkflowState, event: &Event) -> Result<(), Rejection> {
    match event.kind.as_str() {
        "branch_created" => {
            let payload: BranchCreated = decode(event)?;
            let branch = state.git.branches.entry(payload.branch).or_default();
            branch.from = payload.from.or(branch.from.take());
            branch.created_at.get_or_insert(event.timestamp);
        }
        "committed" | "commit" => {
            let payload: Committed = decode(event)?;
            if let Some(name) = &payload.branch {
                let branch: &mut BranchRecord =
                    state.git.branches.entry(name.clone()).or_default();
                branch.head = Some(payload.sha.clone());
                branch.commits += 1;
            }
            state.git.commits.insert(
                payload.sha,
                CommitRecord {
                    branch: payload.branch,
                    message: payload.message,
                    author: event.actor.clone(),
                    task_id: event.task_id.clone(),
                    at: event.timestamp,
                },
            );
        }
        "merged" => {
            let payload: Merged = decode(event)?;
            state
                .git
                .branches
                .entry(payload.source)
                .or_default()
                .merged_into = Some(payload.target.clone());
            if let Some(sha) = payload.sha {
                state.git.branches.entry(payload.target).or_default().head = Some(sha);
            }
        }
        _ => {}
    }
    Ok(())
}

#[derive(Deserialize)]
struct ContainerEvent {
    container_id: String,
    #[serde(default)]
    image: Option<String>,
}

fn container(state: &mut WorkflowState, event: &Event) -> Result<(), Rejection> {
    let running = match event.kind.as_str() {
        "started" => true,
        "stopped" => false,
        _ => return Ok(()),
    };
    let payload: ContainerEvent = decode(event)?;
    let record = state
        .containers
        .entry(payload.container_id)
        .or_insert_with(|| ContainerRecord {
            image: None,
            running: false,
            started_at: None,
            stopped_at: None,
        });
    if payload.image.is_some() {
        record.image = payload.image;
    }
    record.running = running;
    if running {
        record.started_at = Some(event.timestamp);
    } else {
        record.stopped_at = Some(event.timestamp);
    }
    Ok(())
}

#[derive(Deserialize)]
struct ScanCompleted {
    target: String,
    findings: u64,
}

fn security(state: &mut WorkflowState, event: &Event) -> Result<(), Rejection> {
    if event.kind != "scan_completed" {
        return Ok(());
    }
    let payload: ScanCompleted = decode(event)?;
    let summary = state.security.entry(payload.target).or_default();
    summary.scans += 1;
    summary.last_findings = payload.findings;
    summary.last_scan_at = Some(event.timestamp);
    Ok(())
}

#[derive(Deserialize)]
struct DecisionRecorded {
    summary: String,
    #[serde(default)]
    rationale: Option<String>,
}

fn decision(state: &mut WorkflowState, event: &Event) -> Result<(), Rejection> {
    if event.kind != "recorded" {
        return Ok(());
    }
    let payload: DecisionRecorded = decode(event)?;
    state.decisions.insert(
        event.event_id,
        DecisionRecord {
            summary: payload.summary,
            rationale: payload.rationale,
            actor: event.actor.clone(),
            task_id: event.task_id.clone(),
            correlation_id: event.correlation_id,
            at: event.timestamp,
        },
    );
    Ok(())
}

#[derive(Deserialize)]
struct ConfigChange {
    current_hash: String,
}

fn system(state: &mut WorkflowState, event: &Event) -> Result<(), Rejection> {
    match event.kind.as_str() {
        "config_change" => {
            let payload: ConfigChange = decode(event)?;
            state.system.config_hash = Some(payload.current_hash);
            state.system.config_changes += 1;
        }
        "retention_applied" => state.system.retention_runs += 1,
        _ => {}
    }
    Ok(())
}
