// catalog.rs — The default action vocabulary.
//
// Callers are free to register their own actions instead of (or next to)
// these. The catalogue exists so tooling, the followup rules and tests
// share one concrete vocabulary.

use serde_json::{json, Value};

use crate::descriptor::ActionDescriptor;
use crate::error::RegistryError;
use crate::registry::{ActionRegistry, ActionRegistryBuilder};

/// Task lifecycle verbs that move a task between phases.
pub const TASK_TRANSITIONS: &[(&str, &str)] = &[
    ("design", "Record the design of a specified task"),
    ("plan", "Break a designed task into an implementation plan"),
    ("operate", "Start implementing a planned task"),
    ("verify", "Submit an implemented task for verification"),
    ("complete", "Accept a verified task as done"),
    ("abandon", "Stop work on a task"),
    ("reopen", "Reopen a finished or abandoned task"),
];

fn object(required: &[&str], properties: Value) -> Value {
    json!({"type": "object", "required": required, "properties": properties})
}

fn task_ref() -> Value {
    object(
        &["task_id"],
        json!({
            "task_id": {"type": "string", "minLength": 1},
            "note": {"type": "string"}
        }),
    )
}

/// Descriptors of the default vocabulary.
pub fn descriptors() -> Vec<ActionDescriptor> {
    let mut all = vec![ActionDescriptor::new("task", "create")
        .category("lifecycle")
        .describe("Create a task in the Specified phase")
        .input_schema(object(
            &["task_id", "title"],
            json!({
                "task_id": {"type": "string", "minLength": 1},
                "title": {"type": "string", "minLength": 1},
                "assignee": {"type": "string"}
            }),
        ))
        .output_schema(object(&["task_id"], json!({"task_id": {"type": "string"}})))
        .idempotent_on("task_id")
        .side_effect("task.created")];

    all.extend(TASK_TRANSITIONS.iter().map(|(verb, description)| {
        ActionDescriptor::new("task", *verb)
            .category("lifecycle")
            .describe(*description)
            .input_schema(task_ref())
            .side_effect("task.state_changed")
    }));

    all.extend([
        ActionDescriptor::new("git", "branch")
            .category("vcs")
            .describe("Create a working branch")
            .input_schema(object(
                &["branch"],
                json!({"branch": {"type": "string", "minLength": 1}, "from": {"type": "string"}}),
            ))
            .idempotent_on("branch")
            .side_effect("git.branch_created"),
        ActionDescriptor::new("git", "commit")
            .category("vcs")
            .describe("Commit staged changes")
            .input_schema(object(
                &["branch", "message"],
                json!({
                    "branch": {"type": "string", "minLength": 1},
                    "message": {"type": "string", "minLength": 1}
                }),
            ))
            .output_schema(object(&["sha"], json!({"sha": {"type": "string", "minLength": 7}})))
            .side_effect("git.committed"),
        ActionDescriptor::new("git", "merge")
            .category("vcs")
            .describe("Merge one branch into another")
            .input_schema(object(
                &["source", "target"],
                json!({
                    "source": {"type": "string", "minLength": 1},
                    "target": {"type": "string", "minLength": 1}
                }),
            ))
            .side_effect("git.merged"),
        ActionDescriptor::new("security", "scan")
            .category("verification")
            .describe("Scan a target for vulnerabilities")
            .input_schema(object(
                &["target"],
                json!({"target": {"type": "string", "minLength": 1}}),
            ))
            .output_schema(object(
                &["findings"],
                json!({"findings": {"type": "integer", "minimum": 0}}),
            ))
            .side_effect("security.scan_completed"),
        ActionDescriptor::new("container", "start")
            .category("runtime")
            .describe("Start a sandbox container")
            .input_schema(object(
                &["image"],
                json!({"image": {"type": "string", "minLength": 1}}),
            ))
            .output_schema(object(
                &["container_id"],
                json!({"container_id": {"type": "string", "minLength": 1}}),
            ))
            .side_effect("container.started"),
        ActionDescriptor::new("container", "stop")
            .category("runtime")
            .describe("Stop a sandbox container")
            .input_schema(object(
                &["container_id"],
                json!({"container_id": {"type": "string", "minLength": 1}}),
            ))
            .idempotent_on("container_id")
            .side_effect("container.stopped"),
        ActionDescriptor::new("decision", "record")
            .category("governance")
            .describe("Record a decision and its rationale")
            .input_schema(object(
                &["summary"],
                json!({
                    "summary": {"type": "string", "minLength": 1},
                    "rationale": {"type": "string"}
                }),
            ))
            .side_effect("decision.recorded"),
    ]);
    all
}

/// A builder pre-loaded with the default vocabulary.
pub fn standard_builder() -> Result<ActionRegistryBuilder, RegistryError> {
    let mut builder = ActionRegistry::builder();
    builder.extend(descriptors())?;
    Ok(builder)
}

/// The default vocabulary as a frozen registry.
pub fn standard() -> Result<ActionRegistry, RegistryError> {
    Ok(standard_builder()?.build())
}
