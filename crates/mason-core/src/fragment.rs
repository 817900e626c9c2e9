//! Script fragments rendered by Dagger modules.
//!
//! The renderer writes one file per fragment, one directory per module:
//!
//! ```text
//! <plan-dir>/<module>/<phase>_<name>.dagger                 phase-specific
//! <plan-dir>/<module>/<name>.dagger                         every phase
//! <plan-dir>/<module>/[<phase>_]postrun[_on_success|_on_failure]_<name>.dagger
//! ```
//!
//! The file name is decoded exactly once, in [`Fragment::from_file`].

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::dagger::SCRIPT_EXTENSION;

/// When a fragment runs relative to the outcome of the main script.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PostRun {
    /// Part of the main script.
    #[default]
    #[serde(rename = "")]
    Never,
    /// Runs after the main script, whatever its outcome.
    #[serde(rename = "always")]
    Always,
    #[serde(rename = "on_success")]
    OnSuccess,
    #[serde(rename = "on_failure")]
    OnFailure,
}

impl PostRun {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Never => "",
            Self::Always => "always",
            Self::OnSuccess => "on_success",
            Self::OnFailure => "on_failure",
        }
    }

    pub fn is_never(&self) -> bool {
        matches!(self, Self::Never)
    }
}

impl fmt::Display for PostRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostRun {
    type Err = PostRunParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Ok(Self::Never),
            "always" => Ok(Self::Always),
            "on_success" => Ok(Self::OnSuccess),
            "on_failure" => Ok(Self::OnFailure),
            other => Err(PostRunParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`PostRun`] string.
#[derive(Debug, Clone)]
pub struct PostRunParseError(pub String);

impl fmt::Display for PostRunParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid post-run kind: {:?}", self.0)
    }
}

impl std::error::Error for PostRunParseError {}

/// One script fragment produced by a module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fragment {
    pub module_name: String,
    /// Empty means the fragment applies to every phase.
    pub phase: String,
    pub post_run: PostRun,
    pub name: String,
    pub content: String,
}

impl Fragment {
    /// Read a fragment file and decode its metadata from its path.
    ///
    /// The caller is responsible for only passing files with the
    /// [`SCRIPT_EXTENSION`] extension.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let stem = file_name
            .strip_suffix(SCRIPT_EXTENSION)
            .and_then(|s| s.strip_suffix('.'))
            .unwrap_or(file_name);
        let module_name = path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .unwrap_or_default();

        let (phase, post_run, name) = decode_file_stem(stem);
        Ok(Self {
            module_name: module_name.to_owned(),
            phase,
            post_run,
            name,
            content,
        })
    }
}

/// Split a fragment file stem into `(phase, post_run, name)`.
pub fn decode_file_stem(stem: &str) -> (String, PostRun, String) {
    let (phase, name) = match stem.split_once('_') {
        Some(("postrun", _)) | None => ("", stem),
        Some((phase, name)) => (phase, name),
    };

    let (post_run, name) = if let Some(n) = name.strip_prefix("postrun_on_success_") {
        (PostRun::OnSuccess, n)
    } else if let Some(n) = name.strip_prefix("postrun_on_failure_") {
        (PostRun::OnFailure, n)
    } else if let Some(n) = name.strip_prefix("postrun_") {
        (PostRun::Always, n)
    } else {
        (PostRun::Never, name)
    };

    (phase.to_owned(), post_run, name.to_owned())
}
