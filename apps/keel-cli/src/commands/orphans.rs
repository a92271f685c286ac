// orphans.rs — Report invocations that never reached a terminal event.

use chrono::Utc;
use clap::Args;
use keel_replay::{find_orphans, terminal_anomalies};
use serde_json::json;

use super::{print_json, Workspace};

#[derive(Args)]
pub struct OrphansArgs {
    /// Seconds an invocation may stay pending before it is reported
    /// (defaults to actions.orphan_grace_secs).
    #[arg(long)]
    pub grace_secs: Option<i64>,
    #[arg(long)]
    pub json: bool,
}

pub fn execute(args: &OrphansArgs, workspace: &Workspace) -> anyhow::Result<()> {
    let grace = match args.grace_secs {
        Some(secs) => chrono::Duration::seconds(secs),
        None => workspace.config.actions.orphan_grace(),
    };
    let outcome = workspace.replay()?;
    let orphans = find_orphans(&outcome.state, grace, Utc::now());
    let anomalies = terminal_anomalies(&outcome.state);

    if args.json {
        return print_json(&json!({
            "grace_secs": grace.num_seconds(),
            "orphans": orphans,
            "anomalies": anomalies,
        }));
    }

    if orphans.is_empty() {
        println!("No orphaned invocations.");
    } else {
        println!("{} orphaned invocation(s):", orphans.len());
        for orphan in &orphans {
            println!(
                "  {}  {:<20} actor={} task={} pending {}s",
                orphan.correlation_id,
                orphan.action.to_string(),
                orphan.actor,
                orphan.task_id.as_deref().unwrap_or("-"),
                orphan.age_secs
            );
        }
    }
    for anomaly in &anomalies {
        println!(
            "  anomaly: {} ({}) closed {} times, kept {:?}",
            anomaly.correlation_id, anomaly.action, anomaly.terminal_count, anomaly.status
        );
    }
    Ok(())
}
