//! Running a plan: main script first, then the post-run script matching
//! its outcome.

use std::path::PathBuf;

use thiserror::Error;

use crate::dagger::{ExecError, ExecRequest};
use crate::event::{Event, OutputSource};
use crate::fragment::PostRun;
use crate::mason::RunContext;

use super::Plan;

/// Failure of a single script run.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("failed to write plan file {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Failure of a plan run. Every cause is kept.
#[derive(Debug, Error)]
pub enum PlanRunError {
    #[error("failed to run plan: {0}")]
    Main(StepError),

    /// The main script succeeded but the on-success script did not.
    #[error("failed to run post-run plan ({kind}): {error}")]
    PostRun { kind: PostRun, error: StepError },

    #[error("failed to run plan: {main}; post-run plan ({kind}) also failed: {post_run}")]
    Both {
        main: StepError,
        kind: PostRun,
        post_run: StepError,
    },
}

impl PlanRunError {
    pub fn main_error(&self) -> Option<&StepError> {
        match self {
            Self::Main(e) | Self::Both { main: e, .. } => Some(e),
            Self::PostRun { .. } => None,
        }
    }

    pub fn post_run_error(&self) -> Option<&StepError> {
        match self {
            Self::PostRun { error: e, .. } | Self::Both { post_run: e, .. } => Some(e),
            Self::Main(_) => None,
        }
    }
}

/// Run `plan`'s main script, then its on-success or on-failure script.
///
/// The post-run script runs whatever happened to the main script; its
/// failure never hides the main failure.
pub async fn apply_plan(plan: &Plan, ctx: &RunContext) -> Result<(), PlanRunError> {
    let main = run_script(plan, ctx, None).await;

    let kind = if main.is_ok() {
        PostRun::OnSuccess
    } else {
        PostRun::OnFailure
    };
    let post_run = run_script(plan, ctx, Some(kind)).await;

    match (main, post_run) {
        (Ok(()), Ok(())) => Ok(()),
        (Err(main), Ok(())) => Err(PlanRunError::Main(main)),
        (Ok(()), Err(error)) => Err(PlanRunError::PostRun { kind, error }),
        (Err(main), Err(post_run)) => Err(PlanRunError::Both {
            main,
            kind,
            post_run,
        }),
    }
}

async fn run_script(
    plan: &Plan,
    ctx: &RunContext,
    post_run: Option<PostRun>,
) -> Result<(), StepError> {
    let phase = plan.phase();
    let script = match post_run {
        None => plan.merged_script(),
        Some(kind) => plan.post_run_script(kind).unwrap_or_default(),
    };
    if post_run.is_some() && script.is_empty() {
        tracing::debug!(phase, post_run = ?post_run, "no post-run script to run");
        return Ok(());
    }

    ctx.events.publish(Event::ApplyPlan {
        phase: phase.to_owned(),
        post_run,
    });

    let script_path = plan.script_file_path(post_run);
    tracing::trace!(path = %script_path.display(), %script, "writing Dagger script");
    tokio::fs::write(&script_path, script)
        .await
        .map_err(|source| StepError::Write {
            path: script_path.clone(),
            source,
        })?;

    tracing::info!(phase, post_run = ?post_run, script = %script_path.display(), "applying plan with Dagger");
    let request = ExecRequest {
        script_path,
        env: ctx.dagger.env.clone(),
        args: ctx.dagger.args.clone(),
        stderr_log: plan.log_file_path(post_run),
    };
    let outcome = ctx.executor.exec(&request).await;

    // Output is published before the result is looked at so a failing
    // script still surfaces what it printed.
    let output = outcome.stdout.trim();
    tracing::info!(phase, post_run = ?post_run, %output, "Dagger output");
    if !output.is_empty() {
        ctx.events.publish(Event::DaggerOutput {
            source: OutputSource::Apply {
                phase: phase.to_owned(),
                post_run,
            },
            output: output.to_owned(),
        });
    }

    outcome.result.map_err(StepError::from)
}
