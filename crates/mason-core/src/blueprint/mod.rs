//! Blueprints: the bricks of a workspace, and their rendering into a plan.
//!
//! Rendering hands the bricks to their Dagger modules. Each brick is
//! dumped as JSON under a per-module directory, then a generated
//! `render-plan.dagger` script asks every module to render its directory
//! and exports the resulting fragment files into the plan directory.

mod brick;
mod module_ref;
mod selector;

pub use brick::{Brick, BrickMetadata};
pub use module_ref::ModuleRef;
pub use selector::{Everything, LabelSelector, Labels};

use std::path::{Path, PathBuf};

use anyhow::Context;
use uuid::Uuid;

use crate::dagger::{ExecRequest, SCRIPT_EXTENSION, SHEBANG};
use crate::event::{Event, OutputSource};
use crate::plan::Plan;
use crate::workspace::Workspace;
use crate::{BLUEPRINT_DIR_PREFIX, PLAN_DIR_PREFIX};

/// Name of the generated script that renders a plan.
pub const RENDER_SCRIPT_NAME: &str = "render-plan";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Blueprint {
    bricks: Vec<Brick>,
}

impl Blueprint {
    pub fn new(bricks: Vec<Brick>) -> Self {
        Self { bricks }
    }

    pub fn bricks(&self) -> &[Brick] {
        &self.bricks
    }

    pub fn is_empty(&self) -> bool {
        self.bricks.is_empty()
    }

    /// Keep the bricks whose labels match `selector`.
    ///
    /// Post-run bricks are always kept: they report on the whole run, not
    /// on the selected part of it.
    pub fn filter(&self, selector: &dyn LabelSelector) -> Self {
        tracing::debug!(selector = %selector, "filtering blueprint");
        let bricks: Vec<Brick> = self
            .bricks
            .iter()
            .filter(|brick| {
                let keep = !brick.metadata.post_run.is_never()
                    || selector.matches(&brick.selection_labels());
                if keep {
                    tracing::trace!(name = %brick.metadata.name, kind = %brick.kind, "brick matches selector");
                }
                keep
            })
            .cloned()
            .collect();

        if bricks.len() != self.bricks.len() {
            tracing::info!(
                kept = bricks.len(),
                discarded = self.bricks.len() - bricks.len(),
                "filtered blueprint"
            );
        }
        Self { bricks }
    }

    /// Valid bricks grouped by module, modules in order of first appearance.
    pub fn bricks_by_module(&self) -> Vec<(&ModuleRef, Vec<&Brick>)> {
        let mut groups: Vec<(&ModuleRef, Vec<&Brick>)> = Vec::new();
        for brick in self.bricks.iter().filter(|b| b.is_valid()) {
            match groups.iter_mut().find(|(m, _)| **m == brick.module_ref) {
                Some((_, bricks)) => bricks.push(brick),
                None => groups.push((&brick.module_ref, vec![brick])),
            }
        }
        groups
    }

    /// Render the blueprint into a plan, using `workspace`'s work dir and
    /// Dagger settings.
    pub async fn render_plan(&self, workspace: &Workspace) -> anyhow::Result<Plan> {
        let plan_root = workspace
            .work_dir()
            .join(Uuid::new_v4().simple().to_string());
        tracing::debug!(path = %plan_root.display(), "preparing plan");

        let module_dirs = self
            .dump_bricks(&plan_root.join(BLUEPRINT_DIR_PREFIX))
            .await
            .context("failed to dump blueprint to disk")?;

        let plan_dir = plan_root.join(PLAN_DIR_PREFIX);
        tokio::fs::create_dir_all(&plan_dir)
            .await
            .with_context(|| format!("failed to create directory {}", plan_dir.display()))?;

        let workspace_dir = workspace.dir();
        let modules: Vec<(&ModuleRef, PathBuf)> = module_dirs
            .iter()
            .map(|(module, dir)| (*module, relative_to(dir, &workspace_dir)))
            .collect();
        let script = render_script(&modules, &plan_dir);

        let script_path = plan_dir.join(format!("{RENDER_SCRIPT_NAME}.{SCRIPT_EXTENSION}"));
        tracing::trace!(path = %script_path.display(), %script, "writing Dagger script");
        tokio::fs::write(&script_path, &script)
            .await
            .with_context(|| format!("failed to write file {}", script_path.display()))?;

        let ctx = workspace.context();
        tracing::info!(script = %script_path.display(), "rendering plan with Dagger");
        let outcome = ctx
            .executor
            .exec(&ExecRequest {
                script_path,
                env: ctx.dagger.env.clone(),
                args: ctx.dagger.args.clone(),
                stderr_log: plan_dir.join(format!("{RENDER_SCRIPT_NAME}.log")),
            })
            .await;

        let output = outcome.stdout.trim();
        tracing::info!(%output, "Dagger output");
        if !output.is_empty() {
            ctx.events.publish(Event::DaggerOutput {
                source: OutputSource::Render,
                output: output.to_owned(),
            });
        }
        outcome.result.context("failed to render plan")?;

        tracing::debug!(path = %plan_dir.display(), "parsing generated plan");
        Plan::parse_from_dir(&plan_dir, &workspace_dir)
            .with_context(|| format!("failed to parse plan from directory {}", plan_dir.display()))
    }

    /// Write every valid brick as pretty JSON under `blueprint_dir`, one
    /// directory per module. Returns the module directories in module order.
    async fn dump_bricks(
        &self,
        blueprint_dir: &Path,
    ) -> anyhow::Result<Vec<(&ModuleRef, PathBuf)>> {
        let mut module_dirs = Vec::new();
        for (module, bricks) in self.bricks_by_module() {
            let module_dir = blueprint_dir.join(module.sanitized_name());
            tokio::fs::create_dir_all(&module_dir)
                .await
                .with_context(|| format!("failed to create directory {}", module_dir.display()))?;

            for brick in bricks {
                let path = module_dir.join(brick.file_name());
                let json = serde_json::to_string_pretty(brick)
                    .with_context(|| format!("failed to encode brick {}", path.display()))?;
                tokio::fs::write(&path, json + "\n")
                    .await
                    .with_context(|| format!("failed to write file {}", path.display()))?;
            }
            module_dirs.push((module, module_dir));
        }
        Ok(module_dirs)
    }
}

/// The Dagger script asking each module to render its bricks.
///
/// `modules` pairs each module with its brick directory, relative to the
/// workspace.
pub fn render_script(modules: &[(&ModuleRef, PathBuf)], plan_dir: &Path) -> String {
    let mut script = format!("{SHEBANG}\n\ndirectory |\n");
    for (module, dir) in modules {
        script.push_str(&format!(
            "with-directory {} $({module} | render-plan {}) |\n",
            module.sanitized_name(),
            dir.display()
        ));
    }
    script.push_str(&format!("export {}\n", plan_dir.display()));
    script
}

fn relative_to(path: &Path, base: &Path) -> PathBuf {
    path.strip_prefix(base)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| path.to_path_buf())
}
