// replay.rs — Rebuild workflow state from the log and summarize it.

use std::collections::BTreeMap;

use anyhow::Context;
use clap::Args;
use keel_events::EventId;
use keel_replay::{InvocationStatus, Reconstructor, ReplayOutcome};

use super::{print_json, Workspace};
use crate::exit::{Failure, SCHEMA_INVALID};

#[derive(Args)]
pub struct ReplayArgs {
    /// Only fold events after this event id.
    #[arg(long)]
    pub from: Option<EventId>,
    /// Print the full reconstructed state as JSON.
    #[arg(long)]
    pub json: bool,
    /// Exit with the schema-invalid code if any record was skipped.
    #[arg(long)]
    pub deny_warnings: bool,
}

pub fn execute(args: &ReplayArgs, workspace: &Workspace) -> anyhow::Result<()> {
    let reader = workspace.config.reader();
    let outcome = Reconstructor::new(workspace.config.validator())
        .replay_log(&reader, args.from.as_ref())
        .with_context(|| format!("replaying {}", workspace.config.log.dir.display()))?;

    for warning in &outcome.warnings {
        eprintln!("skipped: {}", warning);
    }
    if args.json {
        print_json(&outcome)?;
    } else {
        print_summary(&outcome);
    }

    if args.deny_warnings && !outcome.warnings.is_empty() {
        return Err(Failure::new(
            SCHEMA_INVALID,
            format!("{} record(s) skipped during replay", outcome.warnings.len()),
        )
        .into());
    }
    Ok(())
}

fn print_summary(outcome: &ReplayOutcome) {
    let state = &outcome.state;
    println!(
        "Replayed {} event(s), {} skipped, cursor {}",
        outcome.applied,
        outcome.warnings.len(),
        outcome
            .cursor
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string())
    );

    let mut phases: BTreeMap<String, usize> = BTreeMap::new();
    for task in state.tasks.values() {
        *phases.entry(task.phase.to_string()).or_insert(0) += 1;
    }
    println!("Tasks: {}", state.tasks.len());
    for (phase, count) in &phases {
        println!("  {:<10} {}", phase, count);
    }

    let count = |status| {
        state
            .invocations
            .values()
            .filter(|i| i.status == status)
            .count()
    };
    println!(
        "Invocations: {} ({} succeeded, {} failed, {} aborted, {} pending)",
        state.invocations.len(),
        count(InvocationStatus::Succeeded),
        count(InvocationStatus::Failed),
        count(InvocationStatus::Aborted),
        count(InvocationStatus::Pending),
    );
    println!(
        "Git: {} branch(es), {} commit(s)",
        state.git.branches.len(),
        state.git.commits.len()
    );
    println!(
        "Containers: {} ({} running)",
        state.containers.len(),
        state.containers.values().filter(|c| c.running).count()
    );
    println!("Security targets scanned: {}", state.security.len());
    println!("Decisions: {}", state.decisions.len());
    if let Some(hash) = &state.system.config_hash {
        println!("Config hash: {}", hash);
    }
}
