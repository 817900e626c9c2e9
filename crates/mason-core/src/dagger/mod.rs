//! Everything that knows about Dagger itself: script variable analysis,
//! the executor boundary, and version lookup.

pub mod exec;
pub mod script;
pub mod version;

pub use exec::{DaggerExecutor, ExecError, ExecOutcome, ExecRequest, ScriptExecutor};
pub use script::{defined_variables, used_variables};
pub use version::dagger_version;

/// Shebang line at the top of every generated script.
pub const SHEBANG: &str = "#!/usr/bin/env dagger";

/// Extension of Dagger shell script files.
pub const SCRIPT_EXTENSION: &str = "dagger";

/// How the Dagger CLI is invoked for every script mason runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaggerSettings {
    pub binary: String,
    /// Environment assignments, as `KEY=VALUE`.
    pub env: Vec<String>,
    pub args: Vec<String>,
    /// When set, Dagger's progress output is only written to log files.
    pub output_disabled: bool,
}

impl Default for DaggerSettings {
    fn default() -> Self {
        Self {
            binary: "dagger".to_owned(),
            env: Vec::new(),
            args: Vec::new(),
            output_disabled: false,
        }
    }
}
