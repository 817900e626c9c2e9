//! Shared test utilities for mason integration tests.
//!
//! Provides:
//! - [`ScriptedExecutor`]: a [`ScriptExecutor`] that never starts Dagger.
//!   It records each request, fails the scripts it is told to fail, and can
//!   play the renderer by writing fragment files into the exported plan dir.
//! - [`WorkspaceFixture`]: a temporary directory with a `.mason` dir and
//!   brick files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mason_core::dagger::{DaggerSettings, ExecError, ExecOutcome, ExecRequest, ScriptExecutor};
use mason_core::{EventBus, MASON_DIR_NAME, Mason, RunContext};
use tempfile::TempDir;

/// What the scripted executor saw for one request.
#[derive(Debug, Clone)]
pub struct RecordedExec {
    pub request: ExecRequest,
    /// Script content at the time of the call.
    pub script: String,
}

impl RecordedExec {
    pub fn file_name(&self) -> String {
        self.request
            .script_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[derive(Default)]
struct Behavior {
    failing: Vec<String>,
    stdout: BTreeMap<String, String>,
    /// Relative path under the exported plan dir -> content.
    rendered: BTreeMap<String, String>,
}

/// A fake Dagger.
///
/// Scripts are matched by substring of their file name. A `render-plan`
/// script is "rendered" by writing the configured fragment files into the
/// directory named on its `export` line.
#[derive(Default, Clone)]
pub struct ScriptedExecutor {
    behavior: Arc<Mutex<Behavior>>,
    seen: Arc<Mutex<Vec<RecordedExec>>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every script whose file name contains `pattern`.
    pub fn fail_on(self, pattern: &str) -> Self {
        self.behavior.lock().unwrap().failing.push(pattern.to_owned());
        self
    }

    /// Print `stdout` for scripts whose file name contains `pattern`.
    pub fn stdout_for(self, pattern: &str, stdout: &str) -> Self {
        self.behavior
            .lock()
            .unwrap()
            .stdout
            .insert(pattern.to_owned(), stdout.to_owned());
        self
    }

    /// Have the renderer export a fragment at `module/file` with `content`.
    pub fn render_fragment(self, module: &str, file: &str, content: &str) -> Self {
        self.behavior
            .lock()
            .unwrap()
            .rendered
            .insert(format!("{module}/{file}"), content.to_owned());
        self
    }

    pub fn calls(&self) -> Vec<RecordedExec> {
        self.seen.lock().unwrap().clone()
    }

    /// File names of every executed script, in call order.
    pub fn script_names(&self) -> Vec<String> {
        self.calls().iter().map(RecordedExec::file_name).collect()
    }

    fn export_dir(script: &str) -> Option<PathBuf> {
        script
            .lines()
            .rev()
            .find_map(|l| l.strip_prefix("export "))
            .map(|d| PathBuf::from(d.trim()))
    }
}

#[async_trait]
impl ScriptExecutor for ScriptedExecutor {
    async fn exec(&self, request: &ExecRequest) -> ExecOutcome {
        let script = std::fs::read_to_string(&request.script_path).unwrap_or_default();
        let record = RecordedExec {
            request: request.clone(),
            script: script.clone(),
        };
        let name = record.file_name();
        self.seen.lock().unwrap().push(record);

        std::fs::write(&request.stderr_log, format!("ran {name}\n")).ok();

        let behavior = self.behavior.lock().unwrap();
        if name.starts_with("render-plan") {
            if let Some(dir) = Self::export_dir(&script) {
                for (rel, content) in &behavior.rendered {
                    let path = dir.join(rel);
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent).ok();
                    }
                    std::fs::write(path, content).ok();
                }
            }
        }

        let stdout = behavior
            .stdout
            .iter()
            .find(|(pattern, _)| name.contains(pattern.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_default();

        if behavior.failing.iter().any(|p| name.contains(p.as_str())) {
            ExecOutcome::failure(
                stdout,
                ExecError::Failed {
                    script: request.script_path.clone(),
                    code: Some(1),
                },
            )
        } else {
            ExecOutcome::success(stdout)
        }
    }
}

/// A temporary workspace root with a `.mason` directory.
pub struct WorkspaceFixture {
    dir: TempDir,
}

impl WorkspaceFixture {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        std::fs::create_dir_all(dir.path().join(MASON_DIR_NAME)).expect("failed to create .mason");
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write a brick file into the `.mason` directory.
    pub fn with_brick_file(self, name: &str, content: &str) -> Self {
        std::fs::write(self.dir.path().join(MASON_DIR_NAME).join(name), content)
            .expect("failed to write brick file");
        self
    }

    /// A [`Mason`] rooted at the fixture and running scripts with `executor`.
    pub fn mason(&self, executor: &ScriptedExecutor, events: EventBus) -> Mason {
        let ctx = RunContext::new(DaggerSettings::default(), events)
            .with_executor(Arc::new(executor.clone()));
        Mason::new(self.dir.path(), ctx)
    }
}

impl Default for WorkspaceFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Write a rendered plan tree: `files` are `(module/file, content)` pairs.
pub fn write_plan_tree(root: &Path, files: &[(&str, &str)]) {
    for (rel, content) in files {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().expect("fragment path has a parent"))
            .expect("failed to create module dir");
        std::fs::write(path, content).expect("failed to write fragment");
    }
}
