// query.rs — Select, count, and bucket events from the log.

use chrono::{DateTime, Utc};
use clap::Args;
use keel_events::{Event, EventFilter};
use keel_query::{Bucket, EventQuery, GroupKey, QueryResult};

use super::{print_json, Workspace};

#[derive(Args)]
pub struct QueryArgs {
    /// Routing pattern, e.g. "git.*" or "action.failed".
    #[arg(default_value = "*")]
    pub pattern: String,
    #[arg(long)]
    pub task: Option<String>,
    #[arg(long)]
    pub actor: Option<String>,
    /// Only events at or after this RFC 3339 time.
    #[arg(long)]
    pub since: Option<DateTime<Utc>>,
    /// Only events before this RFC 3339 time.
    #[arg(long)]
    pub until: Option<DateTime<Utc>>,
    /// Keep at most this many events, oldest first.
    #[arg(long)]
    pub limit: Option<usize>,
    /// Print counts per namespace, type, actor, task, or correlation.
    #[arg(long, conflicts_with = "series")]
    pub count_by: Option<GroupKey>,
    /// Print counts per minute, hour, or day.
    #[arg(long)]
    pub series: Option<Bucket>,
    /// Print matching events as JSON lines.
    #[arg(long)]
    pub json: bool,
}

impl QueryArgs {
    pub(crate) fn build(&self) -> anyhow::Result<EventQuery> {
        let mut filter = EventFilter::new();
        if let Some(task) = &self.task {
            filter = filter.task(task);
        }
        if let Some(actor) = &self.actor {
            filter = filter.actor(actor);
        }
        if let Some(since) = self.since {
            filter = filter.since(since);
        }
        if let Some(until) = self.until {
            filter = filter.until(until);
        }
        let mut query = EventQuery::parse(&self.pattern)?.filter(filter);
        if let Some(n) = self.limit {
            query = query.limit(n);
        }
        Ok(query)
    }
}

pub fn execute(args: &QueryArgs, workspace: &Workspace) -> anyhow::Result<()> {
    let result = args
        .build()?
        .run_log(&workspace.config.reader(), &workspace.config.validator())?;

    if let Some(key) = args.count_by {
        let counts = result.count_by(key);
        if args.json {
            print_json(&counts)?;
        } else {
            for (label, count) in &counts {
                println!("{:>8}  {}", count, label);
            }
        }
    } else if let Some(bucket) = args.series {
        let series = result.time_series(bucket);
        if args.json {
            print_json(&series)?;
        } else {
            for (start, count) in &series {
                println!("{}  {:>8}", start.to_rfc3339(), count);
            }
        }
    } else {
        print_events(&result.events, args.json)?;
    }
    report_scan(&result);
    Ok(())
}

pub(crate) fn print_events(events: &[Event], json: bool) -> anyhow::Result<()> {
    for event in events {
        if json {
            println!("{}", event.to_line()?);
        } else {
            println!(
                "{}  {:<28} {:<12} {}",
                event.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                event.routing_key(),
                event.actor,
                event.task_id.as_deref().unwrap_or("-")
            );
        }
    }
    Ok(())
}

pub(crate) fn report_scan(result: &QueryResult) {
    if result.skipped > 0 {
        eprintln!(
            "{} of {} record(s) failed validation and were skipped",
            result.skipped, result.scanned
        );
    }
    if result.truncated {
        eprintln!("output truncated; raise --limit to see more");
    }
}
