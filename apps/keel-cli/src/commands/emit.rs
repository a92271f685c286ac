// emit.rs — Append one event, delivering it to configured handlers.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use keel_events::{EventDraft, SchemaError};
use keel_router::EventRouter;
use serde_json::Value;
use uuid::Uuid;

use super::Workspace;

#[derive(Args)]
pub struct EmitArgs {
    /// Event namespace (task, git, action, decision, container, security, system).
    pub namespace: String,
    /// Event type within the namespace (e.g. "committed").
    #[arg(value_name = "TYPE")]
    pub kind: String,
    /// Who or what is emitting the event.
    #[arg(long, default_value = "human")]
    pub actor: String,
    /// Task the event belongs to.
    #[arg(long)]
    pub task: Option<String>,
    /// Correlation id to join an existing invocation.
    #[arg(long)]
    pub correlation: Option<Uuid>,
    /// Payload as a JSON object.
    #[arg(long, default_value = "{}")]
    pub payload: String,
    /// Read the payload from a file instead.
    #[arg(long, conflicts_with = "payload")]
    pub payload_file: Option<PathBuf>,
}

pub fn execute(args: &EmitArgs, workspace: &Workspace) -> anyhow::Result<()> {
    let text = match &args.payload_file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading payload from {}", path.display()))?,
        None => args.payload.clone(),
    };
    let payload: Value = serde_json::from_str(&text).map_err(|e| SchemaError::InvalidJson {
        reason: format!("payload: {}", e),
    })?;

    let mut draft = EventDraft::new(&args.namespace, &args.kind, &args.actor).with_payload(payload);
    if let Some(task) = &args.task {
        draft = draft.with_task(task);
    }
    if let Some(correlation) = args.correlation {
        draft = draft.with_correlation(correlation);
    }

    let router = Arc::new(EventRouter::new());
    let handlers = workspace.config.install_handlers(&router)?;
    let writer = workspace.config.writer();
    writer.add_observer(router.clone());

    let event = writer.emit(draft)?;
    handlers.flush()?;
    println!("{}", event.event_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::workspace;
    use crate::exit::{code_for, SCHEMA_INVALID};
    use keel_events::EventValidator;
    use tempfile::tempdir;

    fn args(namespace: &str, kind: &str, payload: &str) -> EmitArgs {
        EmitArgs {
            namespace: namespace.into(),
            kind: kind.into(),
            actor: "tester".into(),
            task: Some("T-1".into()),
            correlation: None,
            payload: payload.into(),
            payload_file: None,
        }
    }

    #[test]
    fn emitted_event_lands_in_the_log() {
        let dir = tempdir().unwrap();
        let ws = workspace(dir.path());
        execute(&args("task", "created", r#"{"title": "Write docs"}"#), &ws).unwrap();

        let (events, rejected) = ws.config.reader().events(&EventValidator::default()).unwrap();
        assert!(rejected.is_empty());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].task_id.as_deref(), Some("T-1"));
    }

    #[test]
    fn schema_violations_exit_with_two() {
        let dir = tempdir().unwrap();
        let ws = workspace(dir.path());

        let err = execute(&args("task", "created", "{}"), &ws).unwrap_err();
        assert_eq!(code_for(&err), SCHEMA_INVALID);
        let err = execute(&args("Task", "created", r#"{"title": "x"}"#), &ws).unwrap_err();
        assert_eq!(code_for(&err), SCHEMA_INVALID);
        let err = execute(&args("task", "created", "{not json"), &ws).unwrap_err();
        assert_eq!(code_for(&err), SCHEMA_INVALID);
    }
}
