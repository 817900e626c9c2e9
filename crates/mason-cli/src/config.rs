//! Configuration file management for mason.
//!
//! A TOML file is looked up in order at `--config`,
//! `<root>/.mason/config.toml`, then `~/.config/mason/config.toml`.
//! Values resolve through the chain: CLI flag > env var > config file >
//! default.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use mason_core::{MASON_DIR_NAME, PhaseRequest};

use crate::selector::Selector;

const CONFIG_FILE_NAME: &str = "config.toml";

pub const ENV_ROOT_PATH: &str = "MASON_ROOT_PATH";
pub const ENV_SELECTOR: &str = "MASON_SELECTOR";
pub const ENV_KEEP_WORK_DIR: &str = "MASON_KEEP_WORK_DIR";
pub const ENV_DAGGER_BINARY: &str = "MASON_DAGGER_BINARY";

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub root_path: Option<PathBuf>,
    pub ignored_dirs: Option<Vec<String>>,
    pub keep_work_dir: Option<bool>,
    pub selector: Option<String>,
    pub dagger: DaggerSection,
    pub aliases: BTreeMap<String, Vec<AliasEntry>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaggerSection {
    pub binary: Option<String>,
    pub env: Option<Vec<String>>,
    pub args: Option<Vec<String>>,
}

/// One phase of an alias, with the selector narrowing its bricks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AliasEntry {
    pub phase: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub selector: String,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the global mason config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/mason` or `~/.config/mason`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("mason");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("mason")
}

/// Return the path to the global mason config file.
pub fn config_path() -> PathBuf {
    config_dir().join(CONFIG_FILE_NAME)
}

/// The config file to read, if any.
///
/// An explicit path must exist; the implicit ones are skipped when missing.
fn locate_config(explicit: Option<&Path>, root_path: &Path) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        if !path.is_file() {
            anyhow::bail!("config file not found at {}", path.display());
        }
        return Ok(Some(path.to_path_buf()));
    }
    let candidates = [
        root_path.join(MASON_DIR_NAME).join(CONFIG_FILE_NAME),
        config_path(),
    ];
    Ok(candidates.into_iter().find(|p| p.is_file()))
}

/// Load and parse a config file.
pub fn load_config(path: &Path) -> Result<ConfigFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Values given on the command line. Empty or `None` means "not given".
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub config: Option<PathBuf>,
    pub root_path: Option<PathBuf>,
    pub ignored_dirs: Vec<String>,
    pub keep_work_dir: bool,
    pub selector: Option<String>,
    pub dagger_binary: Option<String>,
    pub dagger_env: Vec<String>,
    pub dagger_args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DaggerConfig {
    pub binary: String,
    pub env: Vec<String>,
    pub args: Vec<String>,
}

impl Default for DaggerConfig {
    fn default() -> Self {
        Self {
            binary: "dagger".to_owned(),
            env: vec!["DAGGER_ALLOW_LLM=all".to_owned()],
            args: Vec::new(),
        }
    }
}

impl DaggerConfig {
    /// Ask Dagger for its quiet progress output, unless the user chose
    /// a verbosity for mason or for Dagger itself.
    pub fn add_default_quiet(&mut self, verbosity: u8) {
        let has_quiet = self
            .args
            .iter()
            .any(|a| a.starts_with("-q") || a.starts_with("--quiet"));
        if !has_quiet && verbosity == 0 {
            self.args.push("-q=1".to_owned());
        }
    }
}

/// Fully resolved configuration, ready for use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MasonConfig {
    pub root_path: PathBuf,
    pub ignored_dirs: Vec<String>,
    pub keep_work_dir: bool,
    pub selector: String,
    pub dagger: DaggerConfig,
    pub aliases: BTreeMap<String, Vec<AliasEntry>>,
}

impl Default for MasonConfig {
    fn default() -> Self {
        Self {
            root_path: PathBuf::from("."),
            ignored_dirs: vec![".git".to_owned()],
            keep_work_dir: false,
            selector: String::new(),
            dagger: DaggerConfig::default(),
            aliases: BTreeMap::new(),
        }
    }
}

impl MasonConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// The root path is resolved before the config file is looked up, so
    /// a `root_path` in a config file does not move the file lookup.
    pub fn resolve(cli: &CliOverrides) -> Result<Self> {
        let defaults = Self::default();
        let env_root = env_var(ENV_ROOT_PATH).map(PathBuf::from);

        let lookup_root = cli
            .root_path
            .clone()
            .or_else(|| env_root.clone())
            .unwrap_or_else(|| defaults.root_path.clone());
        let file = match locate_config(cli.config.as_deref(), &lookup_root)? {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading config file");
                load_config(&path)?
            }
            None => ConfigFile::default(),
        };

        let root_path = cli
            .root_path
            .clone()
            .or(env_root)
            .or(file.root_path)
            .unwrap_or(defaults.root_path);

        let ignored_dirs = if !cli.ignored_dirs.is_empty() {
            cli.ignored_dirs.clone()
        } else {
            file.ignored_dirs.unwrap_or(defaults.ignored_dirs)
        };

        let keep_work_dir = if cli.keep_work_dir {
            true
        } else if let Some(value) = env_var(ENV_KEEP_WORK_DIR) {
            parse_bool(&value)
                .with_context(|| format!("{ENV_KEEP_WORK_DIR} is not a boolean: {value:?}"))?
        } else {
            file.keep_work_dir.unwrap_or(defaults.keep_work_dir)
        };

        let selector = cli
            .selector
            .clone()
            .or_else(|| env_var(ENV_SELECTOR))
            .or(file.selector)
            .unwrap_or(defaults.selector);

        let dagger = DaggerConfig {
            binary: cli
                .dagger_binary
                .clone()
                .or_else(|| env_var(ENV_DAGGER_BINARY))
                .or(file.dagger.binary)
                .unwrap_or(defaults.dagger.binary),
            env: if !cli.dagger_env.is_empty() {
                cli.dagger_env.clone()
            } else {
                file.dagger.env.unwrap_or(defaults.dagger.env)
            },
            args: if !cli.dagger_args.is_empty() {
                cli.dagger_args.clone()
            } else {
                file.dagger.args.unwrap_or(defaults.dagger.args)
            },
        };

        let config = Self {
            root_path,
            ignored_dirs,
            keep_work_dir,
            selector,
            dagger,
            aliases: file.aliases,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject selectors that cannot be parsed before anything runs.
    fn validate(&self) -> Result<()> {
        Selector::parse(&self.selector)
            .with_context(|| format!("failed to parse label selector {:?}", self.selector))?;
        for (alias, entries) in &self.aliases {
            for (i, entry) in entries.iter().enumerate() {
                Selector::parse(&entry.selector).with_context(|| {
                    format!(
                        "failed to parse selector of entry {i} ({}) for alias {alias:?}",
                        entry.phase
                    )
                })?;
            }
        }
        Ok(())
    }

    /// Expand phase names and aliases into phase requests.
    ///
    /// A plain phase uses the global selector. An alias expands into its
    /// phases, each using its own selector narrowed by the global one.
    pub fn phase_requests(&self, names: &[String]) -> Result<Vec<PhaseRequest>> {
        let global = Selector::parse(&self.selector)
            .with_context(|| format!("failed to parse label selector {:?}", self.selector))?;

        let mut requests = Vec::new();
        for name in names {
            match self.aliases.get(name) {
                Some(entries) => {
                    for entry in entries {
                        let selector = Selector::parse(&entry.selector)
                            .with_context(|| {
                                format!("failed to parse selector of alias {name:?}")
                            })?
                            .and(&global);
                        requests.push(PhaseRequest::new(entry.phase.clone(), Box::new(selector)));
                    }
                }
                None => requests.push(PhaseRequest::new(name.clone(), Box::new(global.clone()))),
            }
        }
        Ok(requests)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => anyhow::bail!("expected true or false"),
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
