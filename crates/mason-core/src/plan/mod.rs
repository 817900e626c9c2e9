//! Plans: every fragment of one rendered workspace snapshot, plus the
//! scripts computed from them.
//!
//! A plan computes up to three scripts:
//! - the main script, from fragments without a post-run kind;
//! - the post-run on-success script, from `on_success` and `always` fragments;
//! - the post-run on-failure script, from `on_failure` and `always` fragments.
//!
//! Both post-run scripts also get a synthetic `post-run-init` fragment that
//! defines `$log_file_path`, so post-run fragments can read the main log.

pub mod apply;

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::dagger::{SCRIPT_EXTENSION, SHEBANG};
use crate::fragment::{Fragment, PostRun};
use crate::merge::{MergeError, merge_fragments};

pub use apply::{PlanRunError, StepError, apply_plan};

/// Module name of fragments generated by mason itself.
pub const INTERNAL_MODULE_NAME: &str = "mason-internal";
/// Name of the fragment defining `$log_file_path` in post-run scripts.
pub const POST_RUN_INIT_NAME: &str = "post-run-init";

/// One of the three scripts a plan computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptSet {
    Main,
    PostRunOnSuccess,
    PostRunOnFailure,
}

impl fmt::Display for ScriptSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Main => "main",
            Self::PostRunOnSuccess => "post-run on-success",
            Self::PostRunOnFailure => "post-run on-failure",
        })
    }
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to merge {set} scripts: {source}")]
    Merge { set: ScriptSet, source: MergeError },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    dir_path: PathBuf,
    workspace_dir: PathBuf,
    fragments: Vec<Fragment>,
    phase: String,
    merged_script: String,
    post_run_on_success_script: String,
    post_run_on_failure_script: String,
}

impl Plan {
    /// Build an unfiltered plan from already decoded fragments.
    ///
    /// `dir_path` is where the per-run script and log files are written;
    /// `workspace_dir` is only used to shorten the log path handed to
    /// post-run scripts.
    pub fn from_fragments(
        dir_path: impl Into<PathBuf>,
        workspace_dir: impl Into<PathBuf>,
        fragments: Vec<Fragment>,
    ) -> Result<Self, PlanError> {
        let mut plan = Self {
            dir_path: dir_path.into(),
            workspace_dir: workspace_dir.into(),
            fragments,
            ..Default::default()
        };
        plan.compute_scripts()?;
        Ok(plan)
    }

    /// Parse the fragment files the renderer exported into `dir`.
    ///
    /// Every subdirectory of `dir` is a module; each `*.dagger` file directly
    /// inside it is a fragment. Directories and files are read in name order
    /// so the same tree always yields the same plan.
    pub fn parse_from_dir(
        dir: impl Into<PathBuf>,
        workspace_dir: impl Into<PathBuf>,
    ) -> Result<Self, PlanError> {
        let dir = dir.into();
        let mut fragments = Vec::new();

        for module_dir in sorted_entries(&dir)?.into_iter().filter(|p| p.is_dir()) {
            for file in sorted_entries(&module_dir)? {
                if file.is_dir()
                    || file.extension().and_then(|e| e.to_str()) != Some(SCRIPT_EXTENSION)
                {
                    continue;
                }
                let fragment = Fragment::from_file(&file).map_err(|source| PlanError::Read {
                    path: file.clone(),
                    source,
                })?;
                fragments.push(fragment);
            }
        }

        tracing::debug!(
            path = %dir.display(),
            fragments = fragments.len(),
            "parsed plan"
        );
        Self::from_fragments(dir, workspace_dir, fragments)
    }

    /// Keep the fragments of `phase` and those shared by every phase.
    pub fn filter_for_phase(&self, phase: &str) -> Result<Self, PlanError> {
        let fragments: Vec<Fragment> = self
            .fragments
            .iter()
            .filter(|f| f.phase == phase || f.phase.is_empty())
            .cloned()
            .collect();

        if fragments.len() != self.fragments.len() {
            tracing::debug!(
                phase,
                kept = fragments.len(),
                discarded = self.fragments.len() - fragments.len(),
                "filtered plan"
            );
        }

        let mut plan = Self {
            dir_path: self.dir_path.clone(),
            workspace_dir: self.workspace_dir.clone(),
            fragments,
            phase: phase.to_owned(),
            ..Default::default()
        };
        plan.compute_scripts()?;
        Ok(plan)
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty() || self.merged_script.is_empty()
    }

    pub fn dir_path(&self) -> &Path {
        &self.dir_path
    }

    pub fn workspace_dir(&self) -> &Path {
        &self.workspace_dir
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    /// Empty for an unfiltered plan.
    pub fn phase(&self) -> &str {
        &self.phase
    }

    pub fn merged_script(&self) -> &str {
        &self.merged_script
    }

    pub fn post_run_on_success_script(&self) -> &str {
        &self.post_run_on_success_script
    }

    pub fn post_run_on_failure_script(&self) -> &str {
        &self.post_run_on_failure_script
    }

    /// The script run for a post-run outcome. `Always` and `Never` have no
    /// script of their own.
    pub fn post_run_script(&self, kind: PostRun) -> Option<&str> {
        match kind {
            PostRun::OnSuccess => Some(&self.post_run_on_success_script),
            PostRun::OnFailure => Some(&self.post_run_on_failure_script),
            PostRun::Always | PostRun::Never => None,
        }
    }

    /// Where the script for `post_run` (`None` for the main script) is written.
    pub fn script_file_path(&self, post_run: Option<PostRun>) -> PathBuf {
        self.dir_path
            .join(format!("plan_{}.{SCRIPT_EXTENSION}", self.file_suffix(post_run)))
    }

    /// Where Dagger's stderr for `post_run` (`None` for the main script) goes.
    pub fn log_file_path(&self, post_run: Option<PostRun>) -> PathBuf {
        self.dir_path
            .join(format!("dagger_{}.log", self.file_suffix(post_run)))
    }

    fn file_suffix(&self, post_run: Option<PostRun>) -> String {
        match post_run {
            Some(kind) => format!("{}_postrun_{kind}", self.phase),
            None => self.phase.clone(),
        }
    }

    fn compute_scripts(&mut self) -> Result<(), PlanError> {
        let main: Vec<Fragment> = self
            .fragments
            .iter()
            .filter(|f| f.post_run.is_never())
            .cloned()
            .collect();
        self.merged_script = String::new();
        if !main.is_empty() {
            let merged = merge_fragments(&main).map_err(|source| PlanError::Merge {
                set: ScriptSet::Main,
                source,
            })?;
            let mut script = format!("{SHEBANG}\n\n");
            if !self.phase.is_empty() {
                script.push_str(&format!("# Phase: {}\n\n", self.phase));
            }
            script.push_str(&merged);
            self.merged_script = script;
        }

        self.post_run_on_success_script =
            self.compute_post_run_script(PostRun::OnSuccess, ScriptSet::PostRunOnSuccess)?;
        self.post_run_on_failure_script =
            self.compute_post_run_script(PostRun::OnFailure, ScriptSet::PostRunOnFailure)?;
        Ok(())
    }

    fn compute_post_run_script(&self, kind: PostRun, set: ScriptSet) -> Result<String, PlanError> {
        let mut candidates: Vec<Fragment> = self
            .fragments
            .iter()
            .filter(|f| f.post_run == kind || f.post_run == PostRun::Always)
            .cloned()
            .collect();
        if candidates.is_empty() {
            return Ok(String::new());
        }
        candidates.push(self.post_run_init_fragment());

        let merged = merge_fragments(&candidates)
            .map_err(|source| PlanError::Merge { set, source })?;

        let outcome = match kind {
            PostRun::OnFailure => "on-failure",
            _ => "on-success",
        };
        let mut script = format!("{SHEBANG}\n\n# Post run {outcome} script");
        if !self.phase.is_empty() {
            script.push_str(&format!(" for phase {}", self.phase));
        }
        script.push_str("\n\n");
        script.push_str(&merged);
        Ok(script)
    }

    fn post_run_init_fragment(&self) -> Fragment {
        let log_path = self.log_file_path(None);
        let relative = log_path
            .strip_prefix(&self.workspace_dir)
            .ok()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(log_path.as_path());

        Fragment {
            module_name: INTERNAL_MODULE_NAME.to_owned(),
            phase: self.phase.clone(),
            post_run: PostRun::Always,
            name: POST_RUN_INIT_NAME.to_owned(),
            content: format!("log_file_path=$(.echo -n \"{}\")", relative.display()),
        }
    }
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, PlanError> {
    let read_err = |source| PlanError::Read {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(read_err)? {
        entries.push(entry.map_err(read_err)?.path());
    }
    entries.sort();
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn fragment(name: &str, content: &str) -> Fragment {
        Fragment {
            name: name.into(),
            content: content.into(),
            ..Default::default()
        }
    }

    fn post_run(name: &str, kind: PostRun, content: &str) -> Fragment {
        Fragment {
            post_run: kind,
            ..fragment(name, content)
        }
    }

    fn plan_of(fragments: Vec<Fragment>) -> Plan {
        Plan::from_fragments(PathBuf::new(), PathBuf::new(), fragments).unwrap()
    }

    const SINGLE: &str = "\nmy_container=$(container | from alpine)\n$my_container | file \"/etc/alpine-release\" | contents\n";
    const SINGLE_MAIN: &str = "#!/usr/bin/env dagger\n\n# SingleSourceScript\nmy_container=$(container | from alpine)\n$my_container | file \"/etc/alpine-release\" | contents\n.echo";

    #[test]
    fn no_fragments_computes_no_scripts() {
        let plan = plan_of(vec![]);
        assert_eq!(plan.merged_script(), "");
        assert_eq!(plan.post_run_on_success_script(), "");
        assert_eq!(plan.post_run_on_failure_script(), "");
        assert!(plan.is_empty());
    }

    #[test]
    fn single_fragment_gets_a_shebang() {
        let plan = plan_of(vec![fragment("SingleSourceScript", SINGLE)]);
        assert_eq!(plan.merged_script(), SINGLE_MAIN);
        assert_eq!(plan.post_run_on_success_script(), "");
        assert!(!plan.is_empty());
    }

    #[test]
    fn independent_fragments_keep_input_order() {
        let plan = plan_of(vec![
            fragment("AlpineScript", "container | from alpine | file /etc/alpine-release | contents"),
            fragment("DebianScript", "container | from debian | file /etc/debian_version | contents"),
        ]);
        assert_eq!(
            plan.merged_script(),
            "#!/usr/bin/env dagger\n\n# AlpineScript\ncontainer | from alpine | file /etc/alpine-release | contents\n.echo\n\n# DebianScript\ncontainer | from debian | file /etc/debian_version | contents\n.echo"
        );
    }

    #[test]
    fn post_run_on_success_script_is_prefixed_with_log_path() {
        let plan = plan_of(vec![
            fragment("SingleSourceScript", SINGLE),
            post_run("PostRunOnSuccess", PostRun::OnSuccess, ".echo 'Post run on success'"),
        ]);

        assert_eq!(plan.merged_script(), SINGLE_MAIN);
        assert_eq!(
            plan.post_run_on_success_script(),
            "#!/usr/bin/env dagger\n\n# Post run on-success script\n\n# PostRunOnSuccess\n.echo 'Post run on success'\n.echo\n\n# post-run-init\nlog_file_path=$(.echo -n \"dagger_.log\")\n.echo"
        );
        assert_eq!(plan.post_run_on_failure_script(), "");
    }

    #[test]
    fn post_run_on_failure_reading_the_log_runs_after_init() {
        let plan = plan_of(vec![
            fragment("SingleSourceScript", SINGLE),
            post_run(
                "PostRunOnFailure",
                PostRun::OnFailure,
                "host | directory . | file $log_file_path | contents",
            ),
        ]);

        assert_eq!(plan.post_run_on_success_script(), "");
        assert_eq!(
            plan.post_run_on_failure_script(),
            "#!/usr/bin/env dagger\n\n# Post run on-failure script\n\n# post-run-init\nlog_file_path=$(.echo -n \"dagger_.log\")\n.echo\n\n# PostRunOnFailure\nhost | directory . | file $log_file_path | contents\n.echo"
        );
    }

    #[test]
    fn always_fragments_join_both_post_run_scripts() {
        let plan = plan_of(vec![post_run("cleanup", PostRun::Always, ".echo cleanup")]);

        assert!(plan.merged_script().is_empty());
        assert!(plan.is_empty());
        assert!(plan.post_run_on_success_script().contains("# cleanup\n"));
        assert!(plan.post_run_on_failure_script().contains("# cleanup\n"));
    }

    #[test]
    fn merge_errors_name_the_script_set() {
        let err = Plan::from_fragments(
            "",
            "",
            vec![
                fragment("Script1", "alpine_ctr=$(container | from alpine)"),
                fragment("Script2", "alpine_ctr=$(container | from ubuntu)"),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, PlanError::Merge { set: ScriptSet::Main, .. }));
        assert!(
            err.to_string()
                .contains(r#"variable "alpine_ctr" is defined twice: by "Script1" and "Script2""#),
            "{err}"
        );

        let err = Plan::from_fragments(
            "",
            "",
            vec![
                post_run("a", PostRun::OnFailure, "a=$(echo $b)"),
                post_run("b", PostRun::OnFailure, "b=$(echo $a)"),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, PlanError::Merge { set: ScriptSet::PostRunOnFailure, .. }));
        assert!(err.to_string().contains("would create a loop"));
    }

    #[test]
    fn user_defined_log_file_path_conflicts_with_init() {
        let err = Plan::from_fragments(
            "",
            "",
            vec![post_run("mine", PostRun::OnSuccess, "log_file_path=$(.echo -n x)")],
        )
        .unwrap_err();
        assert!(matches!(err, PlanError::Merge { set: ScriptSet::PostRunOnSuccess, .. }));
    }

    #[test]
    fn filter_keeps_phase_and_shared_fragments() {
        let plan = plan_of(vec![
            Fragment { phase: "lint".into(), ..fragment("vet", "go vet") },
            Fragment { phase: "test".into(), ..fragment("unit", "go test") },
            fragment("setup", "go version"),
        ]);

        let lint = plan.filter_for_phase("lint").unwrap();
        let names: Vec<&str> = lint.fragments().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["vet", "setup"]);
        assert_eq!(lint.phase(), "lint");
        assert!(lint.merged_script().starts_with("#!/usr/bin/env dagger\n\n# Phase: lint\n\n"));
    }

    #[test]
    fn filter_for_unknown_phase_with_only_specific_fragments_is_empty() {
        let plan = plan_of(vec![Fragment { phase: "lint".into(), ..fragment("vet", "go vet") }]);
        let filtered = plan.filter_for_phase("package").unwrap();
        assert!(filtered.is_empty());
        assert_eq!(filtered.merged_script(), "");
    }

    #[test]
    fn post_run_header_names_the_phase_and_relative_log() {
        let plan = Plan::from_fragments(
            "/ws/.mason/.work/abc/plan",
            "/ws",
            vec![post_run("notify", PostRun::OnSuccess, ".echo done")],
        )
        .unwrap()
        .filter_for_phase("test")
        .unwrap();

        let script = plan.post_run_on_success_script();
        assert!(script.contains("# Post run on-success script for phase test\n\n"), "{script}");
        assert!(
            script.contains(r#"log_file_path=$(.echo -n ".mason/.work/abc/plan/dagger_test.log")"#),
            "{script}"
        );
    }

    #[test]
    fn log_path_outside_workspace_stays_absolute() {
        let plan = Plan::from_fragments(
            "/tmp/plan",
            "/ws",
            vec![post_run("notify", PostRun::OnFailure, ".echo failed")],
        )
        .unwrap();
        assert!(
            plan.post_run_on_failure_script()
                .contains(r#"log_file_path=$(.echo -n "/tmp/plan/dagger_.log")"#)
        );
    }

    #[test]
    fn per_run_file_names() {
        let plan = Plan::from_fragments("/p", "/", vec![])
            .unwrap()
            .filter_for_phase("lint")
            .unwrap();
        assert_eq!(plan.script_file_path(None), PathBuf::from("/p/plan_lint.dagger"));
        assert_eq!(plan.log_file_path(None), PathBuf::from("/p/dagger_lint.log"));
        assert_eq!(
            plan.script_file_path(Some(PostRun::OnFailure)),
            PathBuf::from("/p/plan_lint_postrun_on_failure.dagger")
        );
        assert_eq!(
            plan.log_file_path(Some(PostRun::OnSuccess)),
            PathBuf::from("/p/dagger_lint_postrun_on_success.log")
        );
    }

    #[test]
    fn post_run_script_lookup() {
        let plan = plan_of(vec![post_run("x", PostRun::OnSuccess, ".echo x")]);
        assert!(plan.post_run_script(PostRun::OnSuccess).is_some_and(|s| !s.is_empty()));
        assert_eq!(plan.post_run_script(PostRun::OnFailure), Some(""));
        assert_eq!(plan.post_run_script(PostRun::Always), None);
    }

    mod parse {
        use pretty_assertions::assert_eq;

        use super::*;

        fn write(root: &Path, rel: &str, content: &str) {
            let path = root.join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }

        #[test]
        fn reads_modules_and_files_in_name_order() {
            let tmp = tempfile::TempDir::new().unwrap();
            write(tmp.path(), "zeta/lint_vet.dagger", "go vet ./...");
            write(tmp.path(), "alpha/test_unit.dagger", "go test ./...");
            write(tmp.path(), "alpha/build.dagger", "go build ./...");
            write(tmp.path(), "alpha/README.md", "not a fragment");
            write(tmp.path(), "alpha/nested/deep.dagger", "ignored");
            write(tmp.path(), "top.dagger", "ignored too");

            let plan = Plan::parse_from_dir(tmp.path(), tmp.path()).unwrap();

            let got: Vec<(&str, &str, &str)> = plan
                .fragments()
                .iter()
                .map(|f| (f.module_name.as_str(), f.phase.as_str(), f.name.as_str()))
                .collect();
            assert_eq!(
                got,
                vec![
                    ("alpha", "", "build"),
                    ("alpha", "test", "unit"),
                    ("zeta", "lint", "vet"),
                ]
            );
            assert_eq!(plan.dir_path(), tmp.path());
        }

        #[test]
        fn empty_dir_is_an_empty_plan() {
            let tmp = tempfile::TempDir::new().unwrap();
            let plan = Plan::parse_from_dir(tmp.path(), tmp.path()).unwrap();
            assert!(plan.is_empty());
        }

        #[test]
        fn missing_dir_is_a_read_error() {
            let tmp = tempfile::TempDir::new().unwrap();
            let missing = tmp.path().join("missing");
            let err = Plan::parse_from_dir(&missing, tmp.path()).unwrap_err();
            match err {
                PlanError::Read { path, .. } => assert_eq!(path, missing),
                other => panic!("unexpected error: {other}"),
            }
        }

        #[test]
        fn conflicting_fragments_fail_the_parse() {
            let tmp = tempfile::TempDir::new().unwrap();
            write(tmp.path(), "a/one.dagger", "x=$(container)");
            write(tmp.path(), "b/two.dagger", "x=$(container)\n.echo different");
            let err = Plan::parse_from_dir(tmp.path(), tmp.path()).unwrap_err();
            assert!(err.to_string().contains("defined twice"), "{err}");
        }
    }
}
