//! Entry point of a mason run: workspace discovery and work-dir cleanup.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use walkdir::{DirEntry, WalkDir};

use crate::MASON_DIR_NAME;
use crate::dagger::{DaggerExecutor, DaggerSettings, ScriptExecutor};
use crate::event::EventBus;
use crate::workspace::Workspace;

/// Everything a workspace needs to render and apply plans.
pub struct RunContext {
    pub dagger: DaggerSettings,
    pub events: EventBus,
    pub executor: Arc<dyn ScriptExecutor>,
}

impl RunContext {
    /// A context running scripts with the Dagger CLI described by `dagger`.
    pub fn new(dagger: DaggerSettings, events: EventBus) -> Self {
        let executor = Arc::new(DaggerExecutor::new(
            dagger.binary.clone(),
            !dagger.output_disabled,
        ));
        Self {
            dagger,
            events,
            executor,
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn ScriptExecutor>) -> Self {
        self.executor = executor;
        self
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("dagger", &self.dagger)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct Mason {
    root_path: PathBuf,
    ignored_dirs: Vec<String>,
    ctx: Arc<RunContext>,
    workspaces: Vec<Workspace>,
}

impl Mason {
    pub fn new(root_path: impl Into<PathBuf>, ctx: RunContext) -> Self {
        Self {
            root_path: root_path.into(),
            ignored_dirs: vec![".git".to_owned()],
            ctx: Arc::new(ctx),
            workspaces: Vec::new(),
        }
    }

    /// Directory names never descended into while detecting workspaces.
    pub fn with_ignored_dirs(mut self, ignored_dirs: Vec<String>) -> Self {
        self.ignored_dirs = ignored_dirs;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.ctx.events
    }

    pub fn workspaces(&self) -> &[Workspace] {
        &self.workspaces
    }

    /// Find every directory under the root path holding a `.mason` dir.
    ///
    /// Directories are walked in name order without following symlinks.
    /// Ignored directories are skipped wherever they appear, and `.mason`
    /// dirs are never descended into.
    pub fn detect_workspaces(&mut self) -> Result<&[Workspace]> {
        let root = std::path::absolute(&self.root_path).with_context(|| {
            format!("failed to get absolute path of {}", self.root_path.display())
        })?;
        tracing::debug!(dir = %root.display(), "detecting workspaces");

        let mut found = Vec::new();
        let walker = WalkDir::new(&root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !self.skipped(e));
        for entry in walker {
            let entry =
                entry.with_context(|| format!("failed to walk directory {}", root.display()))?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let holds_blueprint = std::fs::symlink_metadata(entry.path().join(MASON_DIR_NAME))
                .is_ok_and(|m| m.is_dir());
            if holds_blueprint {
                found.push(entry.into_path());
            }
        }

        self.workspaces = found
            .into_iter()
            .map(|dir| {
                let relative = match dir.strip_prefix(&root) {
                    Ok(rel) if !rel.as_os_str().is_empty() => rel.to_path_buf(),
                    _ => PathBuf::from("."),
                };
                tracing::debug!(dir = %relative.display(), "found workspace");
                Workspace::new(&root, relative, Arc::clone(&self.ctx))
            })
            .collect();

        tracing::info!(workspaces = self.workspaces.len(), "detected workspaces");
        Ok(&self.workspaces)
    }

    fn skipped(&self, entry: &DirEntry) -> bool {
        let name = entry.file_name().to_string_lossy();
        if name == MASON_DIR_NAME {
            return true;
        }
        let ignored = self.ignored_dirs.iter().any(|ignored| *ignored == name);
        if ignored {
            tracing::trace!(dir = %name, "ignoring directory");
        }
        ignored
    }

    pub fn work_dirs(&self) -> Vec<PathBuf> {
        self.workspaces.iter().map(Workspace::work_dir).collect()
    }

    /// Remove the work dir of every detected workspace.
    pub fn clean_work_dirs(&self) -> Result<()> {
        let mut failures = Vec::new();
        for dir in self.work_dirs() {
            tracing::debug!(dir = %dir.display(), "deleting work directory");
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => failures.push(format!(
                    "failed to remove work directory {}: {e}",
                    dir.display()
                )),
            }
        }
        if !failures.is_empty() {
            bail!("failed to clean work directories: {}", failures.join("; "));
        }
        Ok(())
    }
}
