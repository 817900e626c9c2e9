//! `mason <PHASES>...`: render and apply phases in the root workspace.

use std::path::Path;

use anyhow::{Result, bail};
use mason_core::dagger::DaggerSettings;
use mason_core::{EventBus, Mason, PhaseOutcome, RunContext};

use crate::config::MasonConfig;
use crate::ui;

/// Run `phases` (phase names or aliases) in order.
///
/// Work dirs are removed after a successful run unless the config asks
/// to keep them. After a failure they are kept for inspection.
pub async fn run_phases(
    config: &MasonConfig,
    phases: &[String],
    verbosity: u8,
    quiet: bool,
) -> Result<()> {
    let events = EventBus::default();
    let ui_task = ui::spawn(&events, verbosity);

    let settings = DaggerSettings {
        binary: config.dagger.binary.clone(),
        env: config.dagger.env.clone(),
        args: config.dagger.args.clone(),
        output_disabled: quiet,
    };
    let mut mason = Mason::new(&config.root_path, RunContext::new(settings, events))
        .with_ignored_dirs(config.ignored_dirs.clone());

    let result = run_in_root_workspace(&mut mason, config, phases).await;

    match &result {
        Ok(outcomes) if !config.keep_work_dir => {
            let skipped = outcomes
                .iter()
                .filter(|o| **o == PhaseOutcome::Skipped)
                .count();
            tracing::info!(phases = outcomes.len(), skipped, "run complete");
            if let Err(err) = mason.clean_work_dirs() {
                tracing::warn!(error = %format!("{err:#}"), "failed to clean work dirs");
            }
        }
        _ => {
            let dirs: Vec<String> = mason
                .work_dirs()
                .iter()
                .filter(|d| d.exists())
                .map(|d| d.display().to_string())
                .collect();
            tracing::info!(workdirs = ?dirs, "keeping workdirs");
        }
    }

    // Dropping the last event sender ends the UI task.
    drop(mason);
    if let Err(err) = ui_task.await {
        tracing::warn!(error = %err, "progress output task failed");
    }

    result.map(|_| ())
}

async fn run_in_root_workspace(
    mason: &mut Mason,
    config: &MasonConfig,
    phases: &[String],
) -> Result<Vec<PhaseOutcome>> {
    let workspaces = mason.detect_workspaces()?;
    let workspace = match workspaces {
        [] => bail!("no .mason directory found in {}", config.root_path.display()),
        [workspace] => workspace.clone(),
        many => {
            let dirs: Vec<String> = many
                .iter()
                .map(|w| w.relative_path().display().to_string())
                .collect();
            bail!(
                "found {} workspaces ({}); multiple workspaces are not supported yet. \
                 Ignored dirs: {:?}",
                many.len(),
                dirs.join(", "),
                config.ignored_dirs
            );
        }
    };

    if workspace.relative_path() != Path::new(".") {
        bail!(
            "the .mason directory must be in the root path, found it in {}",
            workspace.relative_path().display()
        );
    }

    let blueprint = workspace.load_blueprint()?;
    let requests = config.phase_requests(phases)?;
    workspace.run_phases(&blueprint, &requests).await
}
