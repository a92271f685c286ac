// prune.rs — Archive or delete expired log segments.

use chrono::Utc;
use clap::Args;
use keel_log::list_segments;

use super::Workspace;

#[derive(Args)]
pub struct PruneArgs {
    /// List what would be affected without touching anything.
    #[arg(long)]
    pub dry_run: bool,
    /// Actor recorded on the retention event.
    #[arg(long, default_value = "keel")]
    pub actor: String,
}

pub fn execute(args: &PruneArgs, workspace: &Workspace) -> anyhow::Result<()> {
    let config = &workspace.config;
    let policy = &config.retention;
    if policy.is_disabled() {
        println!("Retention is disabled; set retention.max_age_days or retention.keep_segments.");
        return Ok(());
    }

    if args.dry_run {
        let segments = list_segments(&config.log.dir, &config.log.stream)?;
        let expired = policy.select(&segments, Utc::now());
        if expired.is_empty() {
            println!("Nothing to prune.");
        }
        for segment in expired {
            println!("would {:?}: {}", policy.mode, segment.path.display());
        }
        return Ok(());
    }

    let affected = config.writer().apply_retention(policy, &args.actor)?;
    if affected.is_empty() {
        println!("Nothing to prune.");
    } else {
        tracing::info!(count = affected.len(), mode = ?policy.mode, "retention applied");
        for path in &affected {
            println!("{:?}: {}", policy.mode, path.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::workspace;
    use keel_log::RetentionMode;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn old_segments_are_deleted_and_recorded() {
        let dir = tempdir().unwrap();
        let mut ws = workspace(dir.path());
        ws.config.retention.max_age_days = Some(30);
        ws.config.retention.mode = RetentionMode::Delete;

        let log_dir = &ws.config.log.dir;
        fs::create_dir_all(log_dir).unwrap();
        let old = log_dir.join("events-workflow-20200101.jsonl");
        fs::write(&old, "").unwrap();
        fs::write(log_dir.join("events-workflow-20200102.jsonl"), "").unwrap();

        let dry = PruneArgs {
            dry_run: true,
            actor: "keel".into(),
        };
        execute(&dry, &ws).unwrap();
        assert!(old.exists());

        execute(
            &PruneArgs {
                dry_run: false,
                ..dry
            },
            &ws,
        )
        .unwrap();
        assert!(!old.exists());

        let outcome = ws.replay().unwrap();
        assert_eq!(outcome.state.system.retention_runs, 1);
    }

    #[test]
    fn disabled_policy_is_a_no_op() {
        let dir = tempdir().unwrap();
        let ws = workspace(dir.path());
        execute(
            &PruneArgs {
                dry_run: false,
                actor: "keel".into(),
            },
            &ws,
        )
        .unwrap();
    }
}
