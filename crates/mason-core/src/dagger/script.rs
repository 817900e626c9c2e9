//! Variable analysis for Dagger shell scripts.
//!
//! A script defines a variable with `name=$( ... )` and references it with
//! `$name`. Both scans work on raw text, so several definitions may share a
//! line.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

static VAR_DEFINITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s*([a-zA-Z][a-zA-Z0-9_]*)\s*=\s*\$\(").expect("valid definition regex")
});

static VAR_USAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$([a-zA-Z][a-zA-Z0-9_]*)").expect("valid usage regex"));

/// Names of the variables defined by `content`.
pub fn defined_variables(content: &str) -> BTreeSet<String> {
    extract(&VAR_DEFINITION, content)
}

/// Names of the variables referenced by `content`.
///
/// Environment references (`$HOME`) are reported as well; callers decide
/// whether a name resolves to a script definition.
pub fn used_variables(content: &str) -> BTreeSet<String> {
    extract(&VAR_USAGE, content)
}

fn extract(re: &Regex, content: &str) -> BTreeSet<String> {
    re.captures_iter(content)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_owned())
        .collect()
}
