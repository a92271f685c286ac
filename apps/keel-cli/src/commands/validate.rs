// validate.rs — Report every record that fails validation.

use std::path::PathBuf;

use clap::Args;
use keel_log::LogReader;

use super::Workspace;
use crate::exit::{Failure, MISSING, SCHEMA_INVALID};

#[derive(Args)]
pub struct ValidateArgs {
    /// JSONL files to check (defaults to every segment of the configured log).
    pub files: Vec<PathBuf>,
    /// Print only the summary line.
    #[arg(long, short)]
    pub quiet: bool,
}

pub fn execute(args: &ValidateArgs, workspace: &Workspace) -> anyhow::Result<()> {
    let reader = if args.files.is_empty() {
        workspace.config.reader()
    } else {
        if let Some(missing) = args.files.iter().find(|p| !p.is_file()) {
            return Err(Failure::new(MISSING, format!("no such file: {}", missing.display())).into());
        }
        LogReader::from_files(args.files.clone())
    };

    let (events, rejected) = reader.events(&workspace.config.validator())?;
    if !args.quiet {
        for record in &rejected {
            println!("{}", record);
        }
    }
    println!("{} valid, {} invalid", events.len(), rejected.len());

    if rejected.is_empty() {
        Ok(())
    } else {
        Err(Failure::new(
            SCHEMA_INVALID,
            format!("{} invalid record(s)", rejected.len()),
        )
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::workspace;
    use crate::exit::code_for;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn invalid_lines_fail_with_schema_code() {
        let dir = tempdir().unwrap();
        let ws = workspace(dir.path());
        let file = dir.path().join("import.jsonl");
        fs::write(&file, "{\"schema_version\":\"1.0.0\"}\n").unwrap();

        let err = execute(
            &ValidateArgs {
                files: vec![file],
                quiet: true,
            },
            &ws,
        )
        .unwrap_err();
        assert_eq!(code_for(&err), SCHEMA_INVALID);
    }

    #[test]
    fn missing_file_fails_with_missing_code() {
        let dir = tempdir().unwrap();
        let ws = workspace(dir.path());
        let err = execute(
            &ValidateArgs {
                files: vec![dir.path().join("absent.jsonl")],
                quiet: false,
            },
            &ws,
        )
        .unwrap_err();
        assert_eq!(code_for(&err), MISSING);
    }

    #[test]
    fn empty_log_is_valid() {
        let dir = tempdir().unwrap();
        let ws = workspace(dir.path());
        execute(
            &ValidateArgs {
                files: vec![],
                quiet: false,
            },
            &ws,
        )
        .unwrap();
    }
}
