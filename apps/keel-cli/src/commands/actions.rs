// actions.rs — List the registered action catalog.

use clap::Args;
use keel_actions::catalog;
use keel_events::ActionKey;

use super::print_json;
use crate::exit::{Failure, UNKNOWN_ACTION};

#[derive(Args)]
pub struct ActionsArgs {
    /// Show one action's full descriptor.
    pub key: Option<String>,
    #[arg(long)]
    pub json: bool,
}

pub fn execute(args: &ActionsArgs) -> anyhow::Result<()> {
    let registry = catalog::standard()?;

    if let Some(raw) = &args.key {
        let registered = raw
            .parse::<ActionKey>()
            .ok()
            .and_then(|key| registry.get(&key))
            .ok_or_else(|| Failure::new(UNKNOWN_ACTION, format!("unknown action '{}'", raw)))?;
        return print_json(registered.descriptor());
    }

    if args.json {
        let all: Vec<_> = registry.descriptors().collect();
        return print_json(&all);
    }

    println!("{} registered action(s):", registry.len());
    for descriptor in registry.descriptors() {
        let mut flags = Vec::new();
        if descriptor.idempotent {
            flags.push("idempotent".to_string());
        }
        if !descriptor.side_effects.is_empty() {
            flags.push(format!("emits {}", descriptor.side_effects.join(",")));
        }
        println!(
            "  {:<20} {:<10} {}{}",
            descriptor.key().to_string(),
            descriptor.category,
            descriptor.description,
            if flags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", flags.join("; "))
            }
        );
    }
    Ok(())
}
