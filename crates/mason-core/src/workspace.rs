//! A workspace: a directory holding a `.mason` dir of bricks.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::blueprint::{Blueprint, Brick};
use crate::event::Event;
use crate::mason::RunContext;
use crate::phase::{PhaseOutcome, PhaseRequest};
use crate::plan::apply_plan;
use crate::{MASON_DIR_NAME, WORK_DIR_PREFIX};

/// Files in the `.mason` dir that are never read as bricks.
const RESERVED_FILE_NAMES: &[&str] = &["config.yaml", "config.yml"];

#[derive(Debug, Clone)]
pub struct Workspace {
    root_path: PathBuf,
    relative_path: PathBuf,
    work_dir_name: String,
    ctx: Arc<RunContext>,
}

impl Workspace {
    /// A workspace at `root_path/relative_path`, with a fresh work dir name.
    pub fn new(
        root_path: impl Into<PathBuf>,
        relative_path: impl Into<PathBuf>,
        ctx: Arc<RunContext>,
    ) -> Self {
        Self {
            root_path: root_path.into(),
            relative_path: relative_path.into(),
            work_dir_name: Uuid::new_v4().simple().to_string(),
            ctx,
        }
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Relative to the root path; `.` for the root itself.
    pub fn relative_path(&self) -> &Path {
        &self.relative_path
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    pub fn dir(&self) -> PathBuf {
        if self.relative_path.as_os_str().is_empty() || self.relative_path == Path::new(".") {
            self.root_path.clone()
        } else {
            self.root_path.join(&self.relative_path)
        }
    }

    pub fn mason_dir(&self) -> PathBuf {
        self.dir().join(MASON_DIR_NAME)
    }

    /// Scratch directory of this run. Nothing creates it until a plan is
    /// rendered.
    pub fn work_dir(&self) -> PathBuf {
        self.mason_dir()
            .join(WORK_DIR_PREFIX)
            .join(&self.work_dir_name)
    }

    /// Read every brick from the `.json`, `.yaml` and `.yml` files of the
    /// `.mason` dir.
    ///
    /// A file may hold several YAML documents. Empty documents and invalid
    /// bricks are skipped.
    pub fn load_blueprint(&self) -> Result<Blueprint> {
        let mason_dir = self.mason_dir();
        tracing::debug!(workspace = %self.relative_path.display(), "loading blueprint");

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&mason_dir)
            .with_context(|| format!("failed to read directory {}", mason_dir.display()))?
        {
            let entry = entry
                .with_context(|| format!("failed to read directory {}", mason_dir.display()))?;
            if entry.file_type().is_ok_and(|t| t.is_dir()) {
                continue;
            }
            paths.push(entry.path());
        }
        paths.sort();

        let mut bricks = Vec::new();
        for path in paths {
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let is_brick_file = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("json" | "yaml" | "yml")
            );
            if !is_brick_file || RESERVED_FILE_NAMES.contains(&file_name) {
                continue;
            }

            tracing::trace!(file = file_name, "loading file");
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read file {}", path.display()))?;
            for brick in parse_bricks(&content)
                .with_context(|| format!("failed to load bricks from file {file_name}"))?
            {
                if brick.is_valid() {
                    tracing::debug!(name = %brick.metadata.name, kind = %brick.kind, "loaded brick");
                    bricks.push(brick);
                }
            }
        }

        tracing::info!(bricks = bricks.len(), "loaded bricks");
        Ok(Blueprint::new(bricks))
    }

    /// Render and apply one phase.
    pub async fn run_phase(
        &self,
        blueprint: &Blueprint,
        request: &PhaseRequest,
    ) -> Result<PhaseOutcome> {
        let phase = request.phase.as_str();
        let filtered = blueprint.filter(request.selector.as_ref());

        self.ctx.events.publish(Event::RenderPlan {
            phase: phase.to_owned(),
        });
        let plan = filtered
            .render_plan(self)
            .await
            .with_context(|| format!("failed to render plan for phase {phase}"))?;
        let plan = plan.filter_for_phase(phase)?;

        if plan.is_empty() {
            tracing::warn!(phase, "no scripts found, skipping phase");
            return Ok(PhaseOutcome::Skipped);
        }

        apply_plan(&plan, &self.ctx).await?;
        Ok(PhaseOutcome::Applied)
    }

    /// Run `requests` in order, stopping at the first failure.
    pub async fn run_phases(
        &self,
        blueprint: &Blueprint,
        requests: &[PhaseRequest],
    ) -> Result<Vec<PhaseOutcome>> {
        let mut outcomes = Vec::with_capacity(requests.len());
        for request in requests {
            outcomes.push(self.run_phase(blueprint, request).await?);
        }
        Ok(outcomes)
    }
}

/// Decode every non-empty YAML document of `content` as a brick.
///
/// JSON files go through the same path, JSON being a subset of YAML.
pub fn parse_bricks(content: &str) -> Result<Vec<Brick>> {
    use serde::Deserialize;

    let mut bricks = Vec::new();
    for (index, document) in serde_yaml::Deserializer::from_str(content).enumerate() {
        let value = serde_yaml::Value::deserialize(document)
            .with_context(|| format!("failed to decode document {index}"))?;
        if value.is_null() {
            continue;
        }
        let brick: Brick = serde_yaml::from_value(value)
            .with_context(|| format!("failed to decode document {index}"))?;
        bricks.push(brick);
    }
    Ok(bricks)
}
