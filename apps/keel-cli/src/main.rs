//! # keel-cli
//!
//! Command-line interface for the Keel event log.
//!
//! - `keel emit`: append one event
//! - `keel validate`: check every record of the log (or given files)
//! - `keel replay`: rebuild workflow state and summarize it
//! - `keel query` / `keel tail`: select, count and bucket events
//! - `keel orphans`: invocations that never settled
//! - `keel check`: followup-graph advice for a task
//! - `keel actions`: the registered action catalogue
//! - `keel prune`: apply the retention policy
//! - `keel config init/show/reload`: manage `.keel/keel.toml`
//!
//! Exit codes: 0 ok, 1 other failure, 2 schema invalid, 3 missing file or
//! config, 4 unknown action.

mod commands;
mod exit;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::Workspace;

/// Keel: event-sourced observability for agent workflows.
#[derive(Parser)]
#[command(name = "keel", version, about)]
struct Cli {
    /// Project root directory (defaults to current directory).
    #[arg(long, default_value = ".")]
    project_root: PathBuf,

    /// Config file (defaults to <project-root>/.keel/keel.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Append one event to the log.
    Emit(commands::emit::EmitArgs),
    /// Validate log records and report every invalid one.
    Validate(commands::validate::ValidateArgs),
    /// Replay the log into workflow state.
    Replay(commands::replay::ReplayArgs),
    /// Select events by pattern and filters.
    Query(commands::query::QueryArgs),
    /// Show the most recent events.
    Tail(commands::tail::TailArgs),
    /// Report invocations with no terminal event.
    Orphans(commands::orphans::OrphansArgs),
    /// Check which actions may follow a task's current state.
    Check(commands::check::CheckArgs),
    /// List registered actions.
    Actions(commands::actions::ActionsArgs),
    /// Archive or delete expired log segments.
    Prune(commands::prune::PruneArgs),
    /// Manage the config file.
    Config {
        #[command(subcommand)]
        command: commands::config::ConfigCommands,
    },
}

fn init_logging(json: bool) {
    // Logs go to stderr so they never mix with command output.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("keel=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let project_root = cli
        .project_root
        .canonicalize()
        .unwrap_or(cli.project_root);

    // `config init` must work before any config exists.
    if let Commands::Config {
        command: commands::config::ConfigCommands::Init { force },
    } = &cli.command
    {
        return commands::config::init(&project_root, cli.config.as_deref(), *force);
    }

    let workspace = Workspace::load(&project_root, cli.config.as_deref())?;
    match &cli.command {
        Commands::Emit(args) => commands::emit::execute(args, &workspace),
        Commands::Validate(args) => commands::validate::execute(args, &workspace),
        Commands::Replay(args) => commands::replay::execute(args, &workspace),
        Commands::Query(args) => commands::query::execute(args, &workspace),
        Commands::Tail(args) => commands::tail::execute(args, &workspace),
        Commands::Orphans(args) => commands::orphans::execute(args, &workspace),
        Commands::Check(args) => commands::check::execute(args, &workspace),
        Commands::Actions(args) => commands::actions::execute(args),
        Commands::Prune(args) => commands::prune::execute(args, &workspace),
        Commands::Config { command } => commands::config::execute(command, &workspace),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::from(exit::code_for(&err))
        }
    }
}
