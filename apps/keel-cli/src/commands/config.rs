// config.rs — Create, show, and reload the project config.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::Subcommand;
use keel_config::{ConfigManager, KeelConfig};

use super::Workspace;

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Write the default config for this project.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Print the effective config as TOML.
    Show,
    /// Re-read the config file and record a change event if it differs.
    Reload {
        #[arg(long, default_value = "keel")]
        actor: String,
    },
}

pub fn init(project_root: &Path, config: Option<&Path>, force: bool) -> anyhow::Result<()> {
    let path = config
        .map(Path::to_path_buf)
        .unwrap_or_else(|| KeelConfig::path_for_project(project_root));
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    KeelConfig::for_project(project_root).save(&path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

pub fn execute(command: &ConfigCommands, workspace: &Workspace) -> anyhow::Result<()> {
    match command {
        ConfigCommands::Init { force } => {
            init(&workspace.root, Some(&workspace.config_path), *force)
        }
        ConfigCommands::Show => {
            print!("{}", workspace.config.to_toml()?);
            Ok(())
        }
        ConfigCommands::Reload { actor } => reload(workspace, actor),
    }
}

/// Content of the config as of the last recorded change, kept beside the
/// config file so separate invocations can diff against it.
fn snapshot_path(config_path: &Path) -> PathBuf {
    config_path.with_extension("toml.applied")
}

fn reload(workspace: &Workspace, actor: &str) -> anyhow::Result<()> {
    let recorded = workspace.replay()?.state.system.config_hash;
    let snapshot = snapshot_path(&workspace.config_path);
    let previous = match fs::read_to_string(&snapshot) {
        Ok(text) => Some(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(e).with_context(|| format!("reading {}", snapshot.display())),
    };

    let manager = ConfigManager::resume(
        &workspace.config_path,
        workspace.config.clone(),
        previous.as_deref(),
        recorded,
    );
    let writer = workspace.config.writer();
    match manager.reload(&writer, actor)? {
        Some(event) => {
            let applied = fs::read_to_string(manager.path())
                .with_context(|| format!("reading {}", manager.path().display()))?;
            fs::write(&snapshot, applied)
                .with_context(|| format!("writing {}", snapshot.display()))?;
            let changed: Vec<String> = event.payload["changed"]
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|v| v.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default();
            println!(
                "Config changed ({}); recorded {}",
                if changed.is_empty() {
                    "no sections".to_string()
                } else {
                    changed.join(", ")
                },
                event.event_id
            );
        }
        None => println!("Config unchanged."),
    }
    Ok(())
}
