// tail.rs — Show the most recent events.

use clap::Args;
use keel_query::EventQuery;

use super::query::{print_events, report_scan};
use super::Workspace;

#[derive(Args)]
pub struct TailArgs {
    /// Only events matching this routing pattern.
    #[arg(default_value = "*")]
    pub pattern: String,
    /// Number of events to show.
    #[arg(long, short = 'n', default_value = "10")]
    pub count: usize,
    #[arg(long)]
    pub json: bool,
}

pub fn execute(args: &TailArgs, workspace: &Workspace) -> anyhow::Result<()> {
    let result = EventQuery::parse(&args.pattern)?
        .latest(args.count)
        .run_log(&workspace.config.reader(), &workspace.config.validator())?;
    if result.is_empty() {
        println!("No events.");
    }
    print_events(&result.events, args.json)?;
    if result.skipped > 0 {
        report_scan(&result);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::workspace;
    use keel_events::EventDraft;
    use tempfile::tempdir;

    #[test]
    fn tail_keeps_the_newest() {
        let dir = tempdir().unwrap();
        let ws = workspace(dir.path());
        let writer = ws.config.writer();
        for i in 0..5 {
            writer
                .emit(EventDraft::new("git", "commit", format!("a{}", i)))
                .unwrap();
        }
        let result = EventQuery::parse("git.commit")
            .unwrap()
            .latest(2)
            .run_log(&ws.config.reader(), &ws.config.validator())
            .unwrap();
        let actors: Vec<&str> = result.events.iter().map(|e| e.actor.as_str()).collect();
        assert_eq!(actors, vec!["a3", "a4"]);

        execute(
            &TailArgs {
                pattern: "*".into(),
                count: 2,
                json: true,
            },
            &ws,
        )
        .unwrap();
    }
}
