// check.rs — Ask the followup graph whether an action fits a task's history.

use anyhow::bail;
use clap::Args;
use keel_actions::catalog;
use keel_events::ActionKey;
use keel_followup::{rules, FollowupGraph, FollowupState, Verdict};

use super::Workspace;
use crate::exit::{Failure, FAILURE, UNKNOWN_ACTION};

#[derive(Args)]
pub struct CheckArgs {
    /// Task to check against its replayed state.
    pub task_id: String,
    /// Proposed `domain.verb`; omit to list what may come next.
    pub action: Option<String>,
}

pub fn execute(args: &CheckArgs, workspace: &Workspace) -> anyhow::Result<()> {
    let outcome = workspace.replay()?;
    let Some(task) = outcome.state.task(&args.task_id) else {
        bail!("task '{}' not found in the log", args.task_id);
    };
    let registry = catalog::standard()?;
    let graph = FollowupGraph::new(&registry, rules::standard())?;
    let state = FollowupState::from(task);

    println!(
        "Task {} is {}{}",
        task.task_id,
        task.phase,
        task.last_action
            .as_ref()
            .map(|key| format!(" (last action {})", key))
            .unwrap_or_default()
    );

    let Some(action) = &args.action else {
        print_keys("Allowed next", graph.allowed_next(&state).iter());
        print_keys("Unusual", graph.unusual_next(&state).iter());
        print_keys("Violations", graph.violations_for(&state).iter());
        return Ok(());
    };

    let key: ActionKey = action
        .parse()
        .map_err(|e| Failure::new(UNKNOWN_ACTION, format!("{}", e)))?;
    if !registry.contains(&key) {
        return Err(Failure::new(UNKNOWN_ACTION, format!("unknown action '{}'", key)).into());
    }

    match graph.classify(&state, &key) {
        Verdict::Allowed => {
            println!("{}: allowed", key);
            Ok(())
        }
        Verdict::Unusual => {
            println!("{}: allowed, but unusual in phase {}", key, task.phase);
            Ok(())
        }
        Verdict::Rejected => Err(Failure::new(
            FAILURE,
            format!("{} is not a valid followup in phase {}", key, task.phase),
        )
        .into()),
    }
}

fn print_keys<'a>(label: &str, keys: impl Iterator<Item = &'a ActionKey>) {
    let keys: Vec<String> = keys.map(ToString::to_string).collect();
    if keys.is_empty() {
        println!("{}: -", label);
    } else {
        println!("{}: {}", label, keys.join(", "));
    }
}
