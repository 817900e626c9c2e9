//! Merging of script fragments into a single Dagger script.
//!
//! Fragments communicate through variables: `name=$( ... )` defines one and
//! `$name` uses it. The merger turns those definitions and usages into
//! a dependency graph, rejects conflicting definitions and cycles, and
//! renders the fragments in dependency order.
//!
//! A variable that is used but never defined among the merged fragments is
//! an environment reference and adds no ordering constraint.

pub mod graph;

use std::collections::HashMap;

use thiserror::Error;

use crate::dagger::{defined_variables, used_variables};
use crate::fragment::Fragment;

use graph::{ContentKey, ScriptGraph};

/// Separator emitted after each fragment so its output is flushed before the
/// next fragment runs.
pub const FRAGMENT_SEPARATOR: &str = ".echo";

/// Errors that abort a merge. No partial script is produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    #[error("variable {variable:?} is defined twice: by {first:?} and {second:?}")]
    DefinedTwice {
        variable: String,
        first: String,
        second: String,
    },

    #[error("failed to add edge for variable {variable:?} from {from:?} to {to:?}: would create a loop")]
    WouldCreateLoop {
        variable: String,
        from: String,
        to: String,
    },
}

/// Merge `fragments` into one script body, without header.
///
/// The output only depends on the input order and content, so merging the
/// same fragments twice yields identical text.
pub fn merge_fragments(fragments: &[Fragment]) -> Result<String, MergeError> {
    if fragments.is_empty() {
        return Ok(String::new());
    }

    let mut graph = ScriptGraph::new();
    let mut definitions: HashMap<String, usize> = HashMap::new();
    // Insertion-ordered: variable name -> users, in first-use order.
    let mut usage_index: HashMap<String, usize> = HashMap::new();
    let mut usages: Vec<(String, Vec<usize>)> = Vec::new();

    for fragment in fragments {
        let Some(id) = graph.add_vertex(fragment) else {
            tracing::trace!(
                name = %fragment.name,
                module = %fragment.module_name,
                key = %ContentKey::of(&fragment.content),
                "skipping fragment with duplicate content"
            );
            continue;
        };

        for variable in defined_variables(&fragment.content) {
            if let Some(&existing) = definitions.get(&variable) {
                return Err(MergeError::DefinedTwice {
                    variable,
                    first: graph.fragment(existing).name.clone(),
                    second: fragment.name.clone(),
                });
            }
            definitions.insert(variable, id);
        }

        for variable in used_variables(&fragment.content) {
            match usage_index.get(&variable) {
                Some(&pos) => usages[pos].1.push(id),
                None => {
                    usage_index.insert(variable.clone(), usages.len());
                    usages.push((variable, vec![id]));
                }
            }
        }
    }

    for (variable, users) in &usages {
        let Some(&definer) = definitions.get(variable) else {
            continue;
        };
        for &user in users.iter().filter(|&&user| user != definer) {
            if graph.add_edge(definer, user).is_err() {
                return Err(MergeError::WouldCreateLoop {
                    variable: variable.clone(),
                    from: graph.fragment(definer).name.clone(),
                    to: graph.fragment(user).name.clone(),
                });
            }
        }
    }

    let mut merged = String::new();
    for id in graph.linearize() {
        let fragment = graph.fragment(id);
        merged.push_str(&format!(
            "# {}\n{}\n{FRAGMENT_SEPARATOR}\n\n",
            fragment.name,
            fragment.content.trim()
        ));
    }
    Ok(merged.trim().to_owned())
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

    #[test]
    fn empty_input_merges_to_empty_text() {
        assert_eq!(merge_fragments(&[]).unwrap(), "");
    }

    #[test]
    fn single_fragment_is_rendered_with_name_and_separator() {
        let merged = merge_fragments(&[fragment("Only", "\n  container | from alpine  \n")]).unwrap();
        assert_eq!(merged, "# Only\ncontainer | from alpine\n.echo");
    }

    #[test]
    fn definer_precedes_user_in_any_input_order() {
        let definer = fragment("A", "x=$(container | from alpine)");
        let user = fragment("B", "$x | file /etc/alpine-release | contents");
        let expected = "# A\nx=$(container | from alpine)\n.echo\n\n# B\n$x | file /etc/alpine-release | contents\n.echo";

        assert_eq!(merge_fragments(&[definer.clone(), user.clone()]).unwrap(), expected);
        assert_eq!(merge_fragments(&[user, definer]).unwrap(), expected);
    }

    #[test]
    fn double_definition_names_both_fragments_in_any_order() {
        let one = fragment("Script1", "alpine_ctr=$(container | from alpine)");
        let two = fragment("Script2", "alpine_ctr=$(container | from ubuntu)");

        let err = merge_fragments(&[one.clone(), two.clone()]).unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"variable "alpine_ctr" is defined twice: by "Script1" and "Script2""#
        );

        let err = merge_fragments(&[two, one]).unwrap_err();
        assert!(matches!(err, MergeError::DefinedTwice { .. }));
        let msg = err.to_string();
        assert!(msg.contains("Script1") && msg.contains("Script2"), "{msg}");
    }

    #[test]
    fn cycle_is_rejected() {
        let err = merge_fragments(&[
            fragment("Script1", "a=$(echo $b)"),
            fragment("Script2", "b=$(echo $a)"),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            MergeError::WouldCreateLoop {
                variable: "a".into(),
                from: "Script1".into(),
                to: "Script2".into(),
            }
        );
        assert!(err.to_string().contains("would create a loop"));
    }

    #[test]
    fn transitive_cycle_is_rejected() {
        let err = merge_fragments(&[
            fragment("A", "a=$(echo $c)"),
            fragment("B", "b=$(echo $a)"),
            fragment("C", "c=$(echo $b)"),
        ])
        .unwrap_err();
        assert!(matches!(err, MergeError::WouldCreateLoop { .. }), "{err}");
    }

    #[test]
    fn undefined_variable_is_an_environment_reference() {
        let merged = merge_fragments(&[fragment("Script", "container | from $CTR_SRC")]).unwrap();
        assert_eq!(merged, "# Script\ncontainer | from $CTR_SRC\n.echo");
    }

    #[test]
    fn self_reference_adds_no_edge() {
        let merged = merge_fragments(&[fragment("S", "c=$(container)\n$c | contents")]).unwrap();
        assert_eq!(merged, "# S\nc=$(container)\n$c | contents\n.echo");
    }

    #[test]
    fn identical_content_is_rendered_once() {
        let merged = merge_fragments(&[
            fragment("first", "x=$(container | from alpine)"),
            fragment("alias", "x=$(container | from alpine)"),
            fragment("user", "$x | contents"),
        ])
        .unwrap();
        assert_eq!(merged.matches("x=$(container | from alpine)").count(), 1);
        assert!(merged.starts_with("# first\n"));
        assert!(!merged.contains("# alias"));
    }

    #[test]
    fn merging_twice_is_byte_identical() {
        let fragments = vec![
            fragment("S1", r#"debian_ctr=$(container | from debian); os_file=$($alpine_ctr | file "/etc/os-release")"#),
            fragment("S2", "etc_dir=$($alpine_ctr | directory /etc)"),
            fragment("S3", "$etc_dir | file alpine-release"),
            fragment("S4", "alpine_ctr=$(container | from alpine)"),
            fragment("S5", "$debian_ctr | file /etc/debian_version\n$os_file | contents"),
            fragment("S6", "$alpine_ctr | file /etc/alpine-release"),
        ];
        let first = merge_fragments(&fragments).unwrap();
        let second = merge_fragments(&fragments).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn reused_variables_follow_dependency_order() {
        let fragments = vec![
            fragment("Script1", r#"debian_ctr=$(container | from debian); alpine_os_release_file=$($alpine_ctr | file "/etc/os-release")"#),
            fragment("Script2", "alpine_etc_dir=$($alpine_ctr | directory /etc)"),
            fragment("Script3", r#"$alpine_etc_dir | file "alpine-release" | export "/path/to/alpine_release""#),
            fragment("Script4", "alpine_ctr=$(container | from alpine)"),
            fragment("Script5", "\n$debian_ctr | file \"/etc/debian_version\" | export \"/path/to/debian_version\"\n$alpine_os_release_file | export \"/path/to/alpine_release\"\n"),
            fragment("Script6", r#"$alpine_ctr | file "/etc/alpine-release" | export "/path/to/alpine_release""#),
        ];

        let merged = merge_fragments(&fragments).unwrap();
        let names: Vec<&str> = merged
            .lines()
            .filter_map(|l| l.strip_prefix("# "))
            .collect();
        assert_eq!(
            names,
            vec!["Script4", "Script1", "Script5", "Script2", "Script3", "Script6"]
        );
    }
}
