// mod.rs — Subcommands and the workspace they operate on.

pub mod actions;
pub mod check;
pub mod config;
pub mod emit;
pub mod orphans;
pub mod prune;
pub mod query;
pub mod replay;
pub mod tail;
pub mod validate;

use std::path::{Path, PathBuf};

use anyhow::Context;
use keel_config::KeelConfig;
use keel_replay::{ReplayOutcome, Reconstructor};

/// The project being operated on and its loaded config.
pub struct Workspace {
    pub root: PathBuf,
    pub config_path: PathBuf,
    pub config: KeelConfig,
}

impl Workspace {
    /// An explicit `--config` must exist; the default location may be
    /// absent, in which case the standard layout is used.
    pub fn load(root: &Path, config: Option<&Path>) -> anyhow::Result<Self> {
        let (config_path, config) = match config {
            Some(path) => (
                path.to_path_buf(),
                KeelConfig::load(path)
                    .with_context(|| format!("loading {}", path.display()))?,
            ),
            None => (
                KeelConfig::path_for_project(root),
                KeelConfig::load_or_default(root)?,
            ),
        };
        tracing::debug!(
            config = %config_path.display(),
            log_dir = %config.log.dir.display(),
            "workspace loaded"
        );
        Ok(Self {
            root: root.to_path_buf(),
            config_path,
            config,
        })
    }

    /// Replay the whole configured log.
    pub fn replay(&self) -> anyhow::Result<ReplayOutcome> {
        let reader = self.config.reader();
        Reconstructor::new(self.config.validator())
            .replay_log(&reader, None)
            .with_context(|| format!("replaying {}", self.config.log.dir.display()))
    }
}

/// Print a value as pretty JSON on stdout.
pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
