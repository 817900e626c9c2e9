//! `mason phases` command: show the well-known phases and configured aliases.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use mason_core::phase::PHASES;

use crate::config::{AliasEntry, MasonConfig};
use crate::selector::Selector;

/// Run the phases command.
pub fn run_phases(config: &MasonConfig) -> Result<()> {
    print!("{}", render(&config.aliases)?);
    Ok(())
}

fn render(aliases: &BTreeMap<String, Vec<AliasEntry>>) -> Result<String> {
    let mut out = String::from("Phases:\n");
    for (i, (phase, description)) in PHASES.iter().enumerate() {
        let (branch, _) = connectors(i + 1 == PHASES.len() && aliases.is_empty());
        out.push_str(&format!("{branch}{phase}  {description}\n"));
    }

    if aliases.is_empty() {
        return Ok(out);
    }

    out.push_str("\nAliases:\n");
    for (i, (alias, entries)) in aliases.iter().enumerate() {
        let (branch, indent) = connectors(i + 1 == aliases.len());
        out.push_str(&format!("{branch}{alias}\n"));

        for (j, entry) in entries.iter().enumerate() {
            let (phase_branch, phase_indent) = connectors(j + 1 == entries.len());
            out.push_str(&format!("{indent}{phase_branch}{}\n", entry.phase));

            let selector = Selector::parse(&entry.selector)
                .with_context(|| format!("failed to parse selector of alias {alias:?}"))?;
            let requirements = selector.requirements();
            for (k, requirement) in requirements.iter().enumerate() {
                let (req_branch, _) = connectors(k + 1 == requirements.len());
                out.push_str(&format!("{indent}{phase_indent}{req_branch}{requirement}\n"));
            }
        }
    }
    Ok(out)
}

/// Branch and child indentation for a tree node.
fn connectors(last: bool) -> (&'static str, &'static str) {
    if last {
        ("╰── ", "    ")
    } else {
        ("├── ", "│   ")
    }
}
